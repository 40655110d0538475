//! Configuration constants for the diagnostics runner
//!
//! This module centralizes the default workload shape and the connection
//! parameters used when nothing is overridden on the command line.

use std::time::Duration;

// ============================================================================
// Connection Configuration
// ============================================================================

pub const DEFAULT_CONTACT_POINT: &str = "127.0.0.1:9042";

pub const DEFAULT_CQL_PORT: u16 = 9042;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for schema agreement after a DDL statement
///
/// Matches the ten second default the drivers ship with. When the cluster
/// has not converged by then the run is aborted rather than risking reads
/// against nodes that have not seen the new table.
pub const SCHEMA_AGREEMENT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Workload Configuration
// ============================================================================

pub const DEFAULT_KEYSPACE: &str = "foo";

pub const DEFAULT_TABLE: &str = "bar";

pub const DEFAULT_DATACENTER: &str = "dc1";

pub const DEFAULT_REPLICATION_FACTOR: u32 = 1;

/// Number of rows written and then read back, ids `0..NUM_ROWS`
pub const NUM_ROWS: i32 = 10;

pub const TRACE_QUERIES: bool = true;
