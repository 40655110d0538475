use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::report::QueryTrace;

/// Unprepared CQL statement, executed as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleStatement {
    cql: String,
    tracing: bool,
    schema_change: bool,
}

impl SimpleStatement {
    pub fn new(cql: impl Into<String>) -> Self {
        Self {
            cql: cql.into(),
            tracing: false,
            schema_change: false,
        }
    }

    /// A DDL statement; executing it waits for the cluster to agree on the
    /// resulting schema version
    pub fn schema_change(cql: impl Into<String>) -> Self {
        Self {
            schema_change: true,
            ..Self::new(cql)
        }
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn cql(&self) -> &str {
        &self.cql
    }

    pub fn is_schema_change(&self) -> bool {
        self.schema_change
    }
}

/// A prepared statement instantiated with concrete `int` values
///
/// Bound statements are built per row and consumed by a single execution.
#[derive(Debug)]
pub struct BoundStatement<'a, P> {
    prepared: &'a P,
    values: Vec<i32>,
    tracing: bool,
}

impl<'a, P> BoundStatement<'a, P> {
    pub fn new(prepared: &'a P, values: Vec<i32>) -> Self {
        Self {
            prepared,
            values,
            tracing: false,
        }
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn prepared(&self) -> &P {
        self.prepared
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }
}

#[derive(Debug)]
pub enum Statement<'a, P> {
    Simple(SimpleStatement),
    Bound(BoundStatement<'a, P>),
}

impl<P> Statement<'_, P> {
    /// Whether the server should record a trace for this execution
    pub fn tracing(&self) -> bool {
        match self {
            Statement::Simple(statement) => statement.tracing,
            Statement::Bound(statement) => statement.tracing,
        }
    }
}

impl<P> From<SimpleStatement> for Statement<'_, P> {
    fn from(statement: SimpleStatement) -> Self {
        Statement::Simple(statement)
    }
}

impl<'a, P> From<BoundStatement<'a, P>> for Statement<'a, P> {
    fn from(statement: BoundStatement<'a, P>) -> Self {
        Statement::Bound(statement)
    }
}

/// Metadata returned for every executed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionInfo {
    /// Set when the statement requested tracing and the server recorded it
    pub tracing_id: Option<Uuid>,
    /// False only when a schema change did not converge across the cluster
    pub schema_in_agreement: bool,
    /// `(id, value)` rows returned by the statement, empty for writes and DDL
    pub rows: Vec<(i32, i32)>,
}

/// Capability the runner needs from a cluster connection
///
/// Implemented over the scylla driver for real clusters and by an in-memory
/// fake in tests.
#[async_trait]
pub trait CqlSession: Send + Sync {
    type Prepared: Send + Sync;

    async fn prepare(&self, cql: &str) -> Result<Self::Prepared>;

    async fn execute(&self, statement: &Statement<'_, Self::Prepared>) -> Result<ExecutionInfo>;

    /// Fetch the server-side trace recorded under `tracing_id`
    ///
    /// This is a separate round-trip to the cluster's trace tables.
    async fn query_trace(&self, tracing_id: Uuid) -> Result<QueryTrace>;

    /// Release the connection. Consumes the session so it can only happen once.
    async fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Establishes sessions against a cluster
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: CqlSession;

    async fn connect(&self) -> Result<Self::Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_statement_defaults() {
        let statement = SimpleStatement::new("SELECT now() FROM system.local");
        assert!(!statement.is_schema_change());

        let statement: Statement<'_, ()> = statement.into();
        assert!(!statement.tracing());
    }

    #[test]
    fn test_schema_change_statement_with_tracing() {
        let statement =
            SimpleStatement::schema_change("CREATE TABLE IF NOT EXISTS ks.t (id int PRIMARY KEY)")
                .with_tracing(true);
        assert!(statement.is_schema_change());
        assert_eq!(
            statement.cql(),
            "CREATE TABLE IF NOT EXISTS ks.t (id int PRIMARY KEY)"
        );

        let statement: Statement<'_, ()> = statement.into();
        assert!(statement.tracing());
    }

    #[test]
    fn test_bound_statement_carries_values() {
        let prepared = "INSERT INTO ks.t (id, value) values (?, ?);".to_string();
        let bound = BoundStatement::new(&prepared, vec![3, 3]).with_tracing(true);

        assert_eq!(bound.values(), &[3, 3]);
        assert_eq!(bound.prepared(), &prepared);

        let statement: Statement<'_, String> = bound.into();
        assert!(statement.tracing());
    }
}
