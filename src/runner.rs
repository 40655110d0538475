//! High-level runner API for query diagnostics.
//!
//! Drives a session through schema setup, a write phase and a read phase,
//! logging the server-side trace of every traced statement along the way.
//!
//! This is the primary API for external users and for the CLI.

use anyhow::{Context, Result};
use derive_builder::Builder;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::TRACE_QUERIES;
use crate::error::DiagnosticsError;
use crate::report::render_report;
use crate::telemetry::RunEvent;

pub use crate::config::{
    CONNECT_TIMEOUT, DEFAULT_CONTACT_POINT, DEFAULT_CQL_PORT, DEFAULT_DATACENTER,
    DEFAULT_KEYSPACE, DEFAULT_REPLICATION_FACTOR, DEFAULT_TABLE, NUM_ROWS,
    SCHEMA_AGREEMENT_TIMEOUT,
};
pub use crate::db::{
    BoundStatement, Connector, CqlSession, ExecutionInfo, ScyllaConnector, SessionArgs,
    SessionArgsBuilder, SimpleStatement, Statement,
};
pub use crate::telemetry::{Phase, RunStats};

/// Workload parameters for a diagnostics run
#[derive(Debug, Clone, Builder)]
pub struct DiagnosticsArgs {
    #[builder(setter(into), default = "DEFAULT_KEYSPACE.to_string()")]
    pub keyspace: String,
    #[builder(setter(into), default = "DEFAULT_TABLE.to_string()")]
    pub table: String,
    #[builder(setter(into), default = "DEFAULT_DATACENTER.to_string()")]
    pub datacenter: String,
    #[builder(default = "DEFAULT_REPLICATION_FACTOR")]
    pub replication_factor: u32,
    /// Rows are written and read with ids `0..num_rows`
    #[builder(default = "NUM_ROWS")]
    pub num_rows: i32,
    /// Request tracing on inserts and selects. Schema statements are always traced.
    #[builder(default = "TRACE_QUERIES")]
    pub trace_queries: bool,
}

impl Default for DiagnosticsArgs {
    fn default() -> Self {
        Self {
            keyspace: DEFAULT_KEYSPACE.to_string(),
            table: DEFAULT_TABLE.to_string(),
            datacenter: DEFAULT_DATACENTER.to_string(),
            replication_factor: DEFAULT_REPLICATION_FACTOR,
            num_rows: NUM_ROWS,
            trace_queries: TRACE_QUERIES,
        }
    }
}

impl DiagnosticsArgs {
    pub fn keyspace_definition(&self) -> String {
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'NetworkTopologyStrategy', '{}' : {}}};",
            self.keyspace, self.datacenter, self.replication_factor
        )
    }

    pub fn table_definition(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}.{} (id int PRIMARY KEY, value int);",
            self.keyspace, self.table
        )
    }

    pub fn insert_statement(&self) -> String {
        format!(
            "INSERT INTO {}.{} (id, value) values (?, ?);",
            self.keyspace, self.table
        )
    }

    pub fn select_statement(&self) -> String {
        format!(
            "select id, value from {}.{} where id = ?",
            self.keyspace, self.table
        )
    }
}

/// Result of a completed diagnostics run
#[derive(Debug)]
pub struct RunSummary {
    pub schema_statements: usize,
    pub rows_written: usize,
    pub rows_read: usize,
    pub rows_mismatched: usize,
    pub traces_reported: usize,
    pub write_traces: usize,
    pub read_traces: usize,
    pub duration: Duration,
    /// p50, p90, p99 of reported trace durations in microseconds
    pub trace_percentiles: (Option<i32>, Option<i32>, Option<i32>),
}

impl RunSummary {
    fn from_stats(stats: &RunStats, duration: Duration) -> Self {
        Self {
            schema_statements: stats.schema_statements,
            rows_written: stats.rows_written,
            rows_read: stats.rows_read,
            rows_mismatched: stats.rows_mismatched,
            traces_reported: stats.traces_reported(),
            write_traces: stats.write_traces,
            read_traces: stats.read_traces,
            duration,
            trace_percentiles: stats.get_percentiles(),
        }
    }
}

/// Sequences the diagnostics phases over a borrowed session
pub struct DiagnosticRunner<'a, S: CqlSession> {
    session: &'a S,
    args: &'a DiagnosticsArgs,
    phase: Phase,
    stats: RunStats,
}

impl<'a, S: CqlSession> DiagnosticRunner<'a, S> {
    pub fn new(session: &'a S, args: &'a DiagnosticsArgs) -> Self {
        Self {
            session,
            args,
            phase: Phase::Schema,
            stats: RunStats::new(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn into_stats(self) -> RunStats {
        self.stats
    }

    /// Run schema setup, writes, and reads in order, stopping at the first error
    pub async fn run(&mut self) -> Result<()> {
        self.setup_schema().await?;
        self.write_data().await?;
        self.read_data().await?;
        Ok(())
    }

    /// Create the keyspace and table if absent, requiring schema agreement after each
    pub async fn setup_schema(&mut self) -> Result<()> {
        self.phase = Phase::Schema;
        let args = self.args;

        info!("Creating keyspace {}", args.keyspace);
        self.execute_schema_change(args.keyspace_definition()).await?;
        info!("Created keyspace {}", args.keyspace);

        info!("Creating table {}", args.table);
        self.execute_schema_change(args.table_definition()).await?;
        info!("Created table {}", args.table);

        Ok(())
    }

    async fn execute_schema_change(&mut self, cql: String) -> Result<()> {
        let statement = SimpleStatement::schema_change(cql).with_tracing(true);
        let cql = statement.cql().to_string();
        let execution_info = self.execute(statement.into()).await?;
        if !execution_info.schema_in_agreement {
            return Err(DiagnosticsError::SchemaAgreement { statement: cql }.into());
        }
        Ok(())
    }

    /// Insert `(i, i)` for every id, one statement at a time
    pub async fn write_data(&mut self) -> Result<()> {
        self.phase = Phase::Write;
        let session = self.session;
        let prepared = session
            .prepare(&self.args.insert_statement())
            .await
            .context("Failed to prepare insert statement")?;

        for i in 0..self.args.num_rows {
            info!("Writing with id {}", i);
            let bound =
                BoundStatement::new(&prepared, vec![i, i]).with_tracing(self.args.trace_queries);
            self.execute(bound.into())
                .await
                .with_context(|| format!("Failed to write row with id {}", i))?;
        }
        Ok(())
    }

    /// Read every id back and check it holds the value written for it
    pub async fn read_data(&mut self) -> Result<()> {
        self.phase = Phase::Read;
        let session = self.session;
        let prepared = session
            .prepare(&self.args.select_statement())
            .await
            .context("Failed to prepare select statement")?;

        for i in 0..self.args.num_rows {
            info!("Reading with id {}", i);
            let bound = BoundStatement::new(&prepared, vec![i]).with_tracing(self.args.trace_queries);
            let execution_info = self
                .execute(bound.into())
                .await
                .with_context(|| format!("Failed to read row with id {}", i))?;

            match execution_info.rows.first() {
                Some(&(id, value)) if id == i && value == i => {
                    self.stats.update(&RunEvent::RowVerified);
                }
                Some(&(id, value)) => {
                    warn!(id, value, expected = i, "read returned unexpected row");
                    self.stats.update(&RunEvent::RowMismatched);
                }
                None => {
                    warn!(id = i, "read returned no row");
                    self.stats.update(&RunEvent::RowMismatched);
                }
            }
        }
        Ok(())
    }

    /// Execute a statement and log its trace when the server recorded one
    pub async fn execute(&mut self, statement: Statement<'_, S::Prepared>) -> Result<ExecutionInfo> {
        let execution_info = self.session.execute(&statement).await?;
        self.stats
            .update(&RunEvent::StatementExecuted { phase: self.phase });

        if let Some(tracing_id) = execution_info.tracing_id {
            let trace = self
                .session
                .query_trace(tracing_id)
                .await
                .with_context(|| format!("Failed to fetch query trace {}", tracing_id))?;
            info!(
                %tracing_id,
                phase = %self.phase,
                started_at = ?trace.started_at,
                "{}",
                render_report(&trace)
            );
            self.stats.update(&RunEvent::TraceReported {
                phase: self.phase,
                duration_micros: trace.duration_micros,
            });
        }

        Ok(execution_info)
    }
}

/// Connect, run every phase, and close the session
///
/// This is the single place failures are handled: any error from connecting
/// or from a phase is logged here with its full context chain and returned.
/// A session that was opened is closed exactly once whether or not the
/// phases succeeded.
///
/// # Example
///
/// ```no_run
/// use query_diagnostics::runner::{
///     DiagnosticsArgs, ScyllaConnector, SessionArgsBuilder, run_diagnostics,
/// };
///
/// # async fn example() -> anyhow::Result<()> {
/// let session_args = SessionArgsBuilder::default()
///     .contact_points(vec!["127.0.0.1:9042".to_string()])
///     .build()?;
/// let connector = ScyllaConnector::new(session_args);
///
/// let summary = run_diagnostics(&connector, &DiagnosticsArgs::default()).await?;
/// println!("Reported {} traces in {:?}", summary.traces_reported, summary.duration);
/// # Ok(())
/// # }
/// ```
pub async fn run_diagnostics<C: Connector>(
    connector: &C,
    args: &DiagnosticsArgs,
) -> Result<RunSummary> {
    let started = Instant::now();

    let session = match connector.connect().await {
        Ok(session) => session,
        Err(e) => {
            error!("{:?}", e);
            return Err(e);
        }
    };

    let mut runner = DiagnosticRunner::new(&session, args);
    let outcome = runner.run().await;
    let stats = runner.into_stats();

    let closed = session.close().await.context("Failed to close session");

    match (outcome, closed) {
        (Ok(()), Ok(())) => Ok(RunSummary::from_stats(&stats, started.elapsed())),
        (Err(e), closed) => {
            error!("{:?}", e);
            if let Err(close_err) = closed {
                warn!("{:#}", close_err);
            }
            Err(e)
        }
        (Ok(()), Err(close_err)) => {
            error!("{:?}", close_err);
            Err(close_err)
        }
    }
}
