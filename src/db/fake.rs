//! In-memory stand-in for a single-node cluster
//!
//! Understands just enough CQL to run the diagnostics workload: keyspace and
//! table creation, `(id, value)` inserts, and point selects by id. Every
//! execution, trace fetch, and close is recorded for assertions.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::db::session::{Connector, CqlSession, ExecutionInfo, Statement};
use crate::report::{QueryTrace, TraceEvent};

pub const COORDINATOR: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub cql: String,
    pub values: Vec<i32>,
    pub tracing: bool,
}

#[derive(Debug, Default)]
pub struct ClusterState {
    pub keyspaces: BTreeSet<String>,
    pub tables: BTreeSet<String>,
    pub rows: BTreeMap<i32, i32>,
    pub executed: Vec<ExecutedStatement>,
    pub prepared: Vec<String>,
    pub traces: HashMap<Uuid, QueryTrace>,
    pub trace_fetches: usize,
    pub connects: usize,
    pub closes: usize,

    // Fault injection
    pub refuse_connections: bool,
    pub schema_disagreement: bool,
    pub fail_insert_id: Option<i32>,
    pub fail_select_id: Option<i32>,
    pub corrupt_value_for_id: Option<i32>,
    pub fail_trace_fetch: bool,
    pub fail_close: bool,
}

/// Shared handle to the fake cluster; clones observe the same state
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            cluster: self.clone(),
        }
    }

    /// Executions whose CQL starts with `prefix` (case-insensitive)
    pub fn executions_starting_with(&self, prefix: &str) -> Vec<ExecutedStatement> {
        let prefix = prefix.to_ascii_lowercase();
        self.state()
            .executed
            .iter()
            .filter(|e| e.cql.to_ascii_lowercase().starts_with(&prefix))
            .cloned()
            .collect()
    }
}

pub struct FakeConnector {
    cluster: FakeCluster,
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession> {
        let mut state = self.cluster.state();
        if state.refuse_connections {
            bail!("Connection refused: {}:9042", COORDINATOR);
        }
        state.connects += 1;
        Ok(FakeSession {
            cluster: self.cluster.clone(),
        })
    }
}

pub struct FakeSession {
    cluster: FakeCluster,
}

/// Object name following `IF NOT EXISTS`
fn object_name(cql: &str) -> Result<String> {
    let upper = cql.to_ascii_uppercase();
    let marker = "IF NOT EXISTS ";
    let start = upper
        .find(marker)
        .ok_or_else(|| anyhow!("Unsupported DDL: {}", cql))?
        + marker.len();
    let name = cql[start..]
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default();
    Ok(name.to_string())
}

fn trace_for(request_type: &str) -> QueryTrace {
    // Stored out of order on purpose: replicas append events independently
    let events = [
        (180, "Executing single-partition query"),
        (25, "Parsing statement"),
        (61, "Preparing statement"),
        (240, "Request complete"),
    ];
    QueryTrace {
        request_type: request_type.to_string(),
        coordinator: COORDINATOR.to_string(),
        duration_micros: 240,
        started_at: None,
        events: events
            .iter()
            .map(|(elapsed, activity)| TraceEvent {
                source_elapsed_micros: *elapsed,
                source: COORDINATOR.to_string(),
                activity: activity.to_string(),
            })
            .collect(),
    }
}

impl FakeSession {
    fn apply(state: &mut ClusterState, cql: &str, values: &[i32]) -> Result<Vec<(i32, i32)>> {
        let lower = cql.to_ascii_lowercase();
        if lower.starts_with("create keyspace") {
            state.keyspaces.insert(object_name(cql)?);
            Ok(Vec::new())
        } else if lower.starts_with("create table") {
            let table = object_name(cql)?;
            let keyspace = table.split('.').next().unwrap_or_default();
            if !state.keyspaces.contains(keyspace) {
                bail!("Keyspace {} does not exist", keyspace);
            }
            state.tables.insert(table);
            Ok(Vec::new())
        } else if lower.starts_with("insert") {
            let [id, value] = values else {
                bail!("Insert expects (id, value), got {:?}", values);
            };
            if state.fail_insert_id == Some(*id) {
                bail!("Operation timed out for id {}", id);
            }
            state.rows.insert(*id, *value);
            Ok(Vec::new())
        } else if lower.starts_with("select") {
            let [id] = values else {
                bail!("Select expects (id), got {:?}", values);
            };
            if state.fail_select_id == Some(*id) {
                bail!("Read timed out for id {}", id);
            }
            let Some(value) = state.rows.get(id).copied() else {
                return Ok(Vec::new());
            };
            if state.corrupt_value_for_id == Some(*id) {
                return Ok(vec![(*id, value + 1)]);
            }
            Ok(vec![(*id, value)])
        } else {
            bail!("Unsupported statement: {}", cql)
        }
    }
}

#[async_trait]
impl CqlSession for FakeSession {
    type Prepared = String;

    async fn prepare(&self, cql: &str) -> Result<String> {
        self.cluster.state().prepared.push(cql.to_string());
        Ok(cql.to_string())
    }

    async fn execute(&self, statement: &Statement<'_, String>) -> Result<ExecutionInfo> {
        let (cql, values, request_type, schema_change) = match statement {
            Statement::Simple(simple) => (
                simple.cql().to_string(),
                Vec::new(),
                "Execute CQL3 query",
                simple.is_schema_change(),
            ),
            Statement::Bound(bound) => (
                bound.prepared().clone(),
                bound.values().to_vec(),
                "Execute CQL3 prepared query",
                false,
            ),
        };

        let mut state = self.cluster.state();
        state.executed.push(ExecutedStatement {
            cql: cql.clone(),
            values: values.clone(),
            tracing: statement.tracing(),
        });
        let rows = Self::apply(&mut state, &cql, &values)?;

        let tracing_id = statement.tracing().then(|| {
            let id = Uuid::new_v4();
            state.traces.insert(id, trace_for(request_type));
            id
        });

        Ok(ExecutionInfo {
            tracing_id,
            schema_in_agreement: !(schema_change && state.schema_disagreement),
            rows,
        })
    }

    async fn query_trace(&self, tracing_id: Uuid) -> Result<QueryTrace> {
        let mut state = self.cluster.state();
        state.trace_fetches += 1;
        if state.fail_trace_fetch {
            bail!("Trace {} is not yet complete", tracing_id);
        }
        state
            .traces
            .get(&tracing_id)
            .cloned()
            .ok_or_else(|| anyhow!("Trace {} not found", tracing_id))
    }

    async fn close(self) -> Result<()> {
        let mut state = self.cluster.state();
        state.closes += 1;
        if state.fail_close {
            bail!("Connection reset while closing");
        }
        Ok(())
    }
}
