use clap::{Parser, Subcommand};
use query_diagnostics::runner::{
    CONNECT_TIMEOUT, DEFAULT_CONTACT_POINT, DEFAULT_DATACENTER, DEFAULT_KEYSPACE,
    DEFAULT_REPLICATION_FACTOR, DEFAULT_TABLE, DiagnosticsArgsBuilder, NUM_ROWS, RunSummary,
    SCHEMA_AGREEMENT_TIMEOUT, ScyllaConnector, SessionArgsBuilder, run_diagnostics,
};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Clone)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand)]
enum Command {
    /// Create the schema, write and read rows, and log the trace of every query
    Run {
        /// Cluster contact points (host or host:port, comma separated)
        #[arg(
            short,
            long,
            env = "CASSANDRA_CONTACT_POINTS",
            value_delimiter = ',',
            default_value = DEFAULT_CONTACT_POINT
        )]
        contact_points: Vec<String>,

        /// Username for password authentication
        #[arg(short, long, env = "CASSANDRA_USERNAME")]
        username: Option<String>,

        /// Password for password authentication
        #[arg(long, env = "CASSANDRA_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Keyspace to create and write into
        #[arg(short, long, default_value_t = DEFAULT_KEYSPACE.to_string())]
        keyspace: String,

        /// Table to create and write into
        #[arg(short, long, default_value_t = DEFAULT_TABLE.to_string())]
        table: String,

        /// Datacenter named in the keyspace replication settings
        #[arg(long, default_value_t = DEFAULT_DATACENTER.to_string())]
        datacenter: String,

        /// Replication factor for the datacenter
        #[arg(long, default_value_t = DEFAULT_REPLICATION_FACTOR)]
        replication_factor: u32,

        /// Number of rows to write and read back
        #[arg(short, long, default_value_t = NUM_ROWS)]
        rows: i32,

        /// Do not request tracing for inserts and selects
        #[arg(long)]
        no_trace: bool,

        /// Seconds to wait when opening connections
        #[arg(long, default_value_t = CONNECT_TIMEOUT.as_secs())]
        connect_timeout: u64,

        /// Seconds to wait for schema agreement after each DDL statement
        #[arg(long, default_value_t = SCHEMA_AGREEMENT_TIMEOUT.as_secs())]
        schema_agreement_timeout: u64,

        /// Quiet mode - only warnings, errors, and the summary
        #[arg(short, long)]
        quiet: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            contact_points,
            username,
            password,
            keyspace,
            table,
            datacenter,
            replication_factor,
            rows,
            no_trace,
            connect_timeout,
            schema_agreement_timeout,
            quiet,
        } => {
            // Initialize tracing based on quiet mode, RUST_LOG wins when set
            use tracing_subscriber::{EnvFilter, FmtSubscriber};
            let default_filter = if quiet {
                "query_diagnostics=warn,scylla=warn"
            } else {
                "query_diagnostics=info,scylla=warn"
            };
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter));
            let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
            let _ = tracing::subscriber::set_global_default(subscriber);

            if rows < 0 {
                anyhow::bail!("--rows must not be negative, got {}", rows);
            }

            let contact_points = contact_points
                .iter()
                .map(|point| cli::normalize_contact_point(point))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut session_args = SessionArgsBuilder::default();
            session_args
                .contact_points(contact_points)
                .connect_timeout(Duration::from_secs(connect_timeout))
                .schema_agreement_timeout(Duration::from_secs(schema_agreement_timeout));
            if let Some(username) = username {
                session_args.username(username);
            }
            if let Some(password) = password {
                session_args.password(password);
            }
            let connector = ScyllaConnector::new(session_args.build()?);

            let diagnostics_args = DiagnosticsArgsBuilder::default()
                .keyspace(keyspace)
                .table(table)
                .datacenter(datacenter)
                .replication_factor(replication_factor)
                .num_rows(rows)
                .trace_queries(!no_trace)
                .build()?;

            // Failures are logged by the runner; only the exit code is left to set
            match run_diagnostics(&connector, &diagnostics_args).await {
                Ok(summary) => {
                    print_summary(&summary);
                    Ok(ExitCode::SUCCESS)
                }
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Diagnostics Summary");
    println!("===================");
    println!("Schema statements: {}", summary.schema_statements);
    println!("Rows written: {}", summary.rows_written);
    println!("Rows read: {}", summary.rows_read);
    println!("Rows mismatched: {}", summary.rows_mismatched);
    println!(
        "Trace reports: {} (write: {}, read: {})",
        summary.traces_reported, summary.write_traces, summary.read_traces
    );
    if let (Some(p50), Some(p90), Some(p99)) = summary.trace_percentiles {
        println!("Trace duration p50/p90/p99: {}μs / {}μs / {}μs", p50, p90, p99);
    }
    println!("Duration: {:.2}s", summary.duration.as_secs_f64());
}

/// CLI utility functions for parsing command-line arguments
mod cli {
    use query_diagnostics::runner::DEFAULT_CQL_PORT;

    /// Append the default CQL port to a contact point given without one
    ///
    /// Accepts `host`, `host:port`, bare IPv6 addresses, and `[v6]:port`.
    pub fn normalize_contact_point(point: &str) -> anyhow::Result<String> {
        let point = point.trim();
        if point.is_empty() {
            anyhow::bail!("Contact point cannot be empty");
        }

        if let Some(rest) = point.strip_prefix('[') {
            let (host, port) = rest
                .split_once(']')
                .ok_or_else(|| anyhow::anyhow!("Unterminated IPv6 address in '{}'", point))?;
            return match port.strip_prefix(':') {
                Some(port) => Ok(format!("[{}]:{}", host, parse_port(port, point)?)),
                None if port.is_empty() => Ok(format!("[{}]:{}", host, DEFAULT_CQL_PORT)),
                None => Err(anyhow::anyhow!("Invalid contact point '{}'", point)),
            };
        }

        match point.matches(':').count() {
            0 => Ok(format!("{}:{}", point, DEFAULT_CQL_PORT)),
            1 => {
                let (host, port) = point.split_once(':').unwrap_or((point, ""));
                if host.is_empty() {
                    anyhow::bail!("Missing host in contact point '{}'", point);
                }
                Ok(format!("{}:{}", host, parse_port(port, point)?))
            }
            // Bare IPv6 address
            _ => Ok(format!("[{}]:{}", point, DEFAULT_CQL_PORT)),
        }
    }

    fn parse_port(port: &str, point: &str) -> anyhow::Result<u16> {
        port.parse::<u16>()
            .map_err(|e| anyhow::anyhow!("Invalid port in contact point '{}': {}", point, e))
    }

}
