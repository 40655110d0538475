//! Database layer - session abstraction, the scylla-backed implementation,
//! and an in-memory cluster for tests

pub mod cluster;
pub mod session;

#[cfg(test)]
pub mod fake;

pub use cluster::{ScyllaConnector, SessionArgs, SessionArgsBuilder};
pub use session::{
    BoundStatement, Connector, CqlSession, ExecutionInfo, SimpleStatement, Statement,
};
