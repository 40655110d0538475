//! Adapter between the runner's session abstraction and the scylla driver.
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use derive_builder::Builder;
use scylla::prepared_statement::PreparedStatement;
use scylla::query::Query;
use scylla::tracing::TracingInfo;
use scylla::transport::errors::QueryError;
use scylla::{QueryResult, Session, SessionBuilder};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{CONNECT_TIMEOUT, DEFAULT_CONTACT_POINT, SCHEMA_AGREEMENT_TIMEOUT};
use crate::db::session::{Connector, CqlSession, ExecutionInfo, Statement};
use crate::report::{QueryTrace, TraceEvent};

const UNKNOWN: &str = "unknown";

#[derive(Builder, Debug, Clone)]
pub struct SessionArgs {
    #[builder(default = "vec![DEFAULT_CONTACT_POINT.to_string()]")]
    contact_points: Vec<String>,
    #[builder(setter(into, strip_option), default)]
    username: Option<String>,
    #[builder(setter(into, strip_option), default)]
    password: Option<String>,
    #[builder(default = "CONNECT_TIMEOUT")]
    connect_timeout: Duration,
    #[builder(default = "SCHEMA_AGREEMENT_TIMEOUT")]
    schema_agreement_timeout: Duration,
}

/// Opens sessions with the scylla driver
#[derive(Debug, Clone)]
pub struct ScyllaConnector {
    args: SessionArgs,
}

impl ScyllaConnector {
    pub fn new(args: SessionArgs) -> Self {
        Self { args }
    }
}

#[async_trait]
impl Connector for ScyllaConnector {
    type Session = ScyllaSession;

    async fn connect(&self) -> Result<ScyllaSession> {
        let SessionArgs {
            contact_points,
            username,
            password,
            connect_timeout,
            schema_agreement_timeout,
        } = &self.args;

        tracing::info!(contact_points = ?contact_points, "connecting to cluster");

        // Schema agreement is awaited explicitly after each DDL statement so
        // that a timeout is reported as disagreement instead of a failed query.
        let mut builder = SessionBuilder::new()
            .known_nodes(contact_points)
            .connection_timeout(*connect_timeout)
            .auto_await_schema_agreement(false)
            .schema_agreement_timeout(*schema_agreement_timeout);

        match (username, password) {
            (Some(username), Some(password)) => {
                builder = builder.user(username, password);
            }
            (Some(_), None) | (None, Some(_)) => {
                anyhow::bail!("Username and password must be provided together");
            }
            (None, None) => {}
        }

        let session = builder
            .build()
            .await
            .with_context(|| format!("Failed to connect to cluster at {:?}", contact_points))?;

        Ok(ScyllaSession { session })
    }
}

pub struct ScyllaSession {
    session: Session,
}

impl ScyllaSession {
    async fn schema_in_agreement(&self) -> Result<bool> {
        agreement_outcome(self.session.await_schema_agreement().await)
    }
}

fn agreement_outcome(result: Result<Uuid, QueryError>) -> Result<bool> {
    match result {
        Ok(schema_version) => {
            tracing::debug!(%schema_version, "schema agreement reached");
            Ok(true)
        }
        // The driver reports an elapsed agreement timeout as a request timeout
        Err(QueryError::RequestTimeout(message)) => {
            tracing::warn!(%message, "schema agreement not reached");
            Ok(false)
        }
        Err(e) => Err(e).context("Failed to check schema agreement"),
    }
}

fn decode_rows(result: QueryResult) -> Result<Vec<(i32, i32)>> {
    if result.rows.is_none() {
        return Ok(Vec::new());
    }
    result
        .rows_typed::<(i32, i32)>()
        .context("Result is not a rows response")?
        .map(|row| row.context("Failed to decode (id, value) row"))
        .collect()
}

#[async_trait]
impl CqlSession for ScyllaSession {
    type Prepared = PreparedStatement;

    async fn prepare(&self, cql: &str) -> Result<PreparedStatement> {
        self.session
            .prepare(cql)
            .await
            .with_context(|| format!("Failed to prepare statement: {}", cql))
    }

    async fn execute(&self, statement: &Statement<'_, PreparedStatement>) -> Result<ExecutionInfo> {
        let (result, schema_change) = match statement {
            Statement::Simple(simple) => {
                let mut query = Query::new(simple.cql());
                query.set_tracing(statement.tracing());
                let result = self
                    .session
                    .query_unpaged(query, ())
                    .await
                    .with_context(|| format!("Failed to execute: {}", simple.cql()))?;
                (result, simple.is_schema_change())
            }
            Statement::Bound(bound) => {
                // Cloning only bumps the shared metadata refcount
                let mut prepared = bound.prepared().clone();
                prepared.set_tracing(statement.tracing());
                let result = self
                    .session
                    .execute_unpaged(&prepared, bound.values().to_vec())
                    .await
                    .with_context(|| {
                        format!(
                            "Failed to execute {} with values {:?}",
                            prepared.get_statement(),
                            bound.values()
                        )
                    })?;
                (result, false)
            }
        };

        let schema_in_agreement = if schema_change {
            self.schema_in_agreement().await?
        } else {
            true
        };

        let tracing_id = result.tracing_id;
        Ok(ExecutionInfo {
            tracing_id,
            schema_in_agreement,
            rows: decode_rows(result)?,
        })
    }

    async fn query_trace(&self, tracing_id: Uuid) -> Result<QueryTrace> {
        let info = self
            .session
            .get_tracing_info(&tracing_id)
            .await
            .with_context(|| format!("Failed to fetch trace {}", tracing_id))?;
        Ok(query_trace_from(info))
    }

    async fn close(self) -> Result<()> {
        // Dropping the driver session shuts down its connection pools
        tracing::debug!("closing session");
        drop(self.session);
        Ok(())
    }
}

fn query_trace_from(info: TracingInfo) -> QueryTrace {
    QueryTrace {
        request_type: info.request.unwrap_or_else(|| UNKNOWN.to_string()),
        coordinator: info
            .coordinator
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| UNKNOWN.to_string()),
        duration_micros: info.duration.unwrap_or(0),
        started_at: info
            .started_at
            .and_then(|timestamp| DateTime::from_timestamp_millis(timestamp.0)),
        events: info
            .events
            .into_iter()
            .map(|event| TraceEvent {
                source_elapsed_micros: event.source_elapsed.unwrap_or(0),
                source: event
                    .source
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|| UNKNOWN.to_string()),
                activity: event.activity.unwrap_or_default(),
            })
            .collect(),
    }
}
