//! Query trace records and the fixed-layout text report logged for them

use chrono::{DateTime, Utc};

/// One timestamped step of a traced request, as recorded by a cluster node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Microseconds since the request started on the node that logged the event
    pub source_elapsed_micros: i32,
    pub source: String,
    pub activity: String,
}

/// Server-side trace of a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTrace {
    pub request_type: String,
    pub coordinator: String,
    pub duration_micros: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub events: Vec<TraceEvent>,
}

impl QueryTrace {
    /// Events in chronological order
    ///
    /// Nodes append to the trace independently, so the stored order can
    /// interleave hops. The sort is stable: events logged at the same
    /// elapsed time keep their stored order.
    pub fn chronological_events(&self) -> Vec<&TraceEvent> {
        let mut events: Vec<&TraceEvent> = self.events.iter().collect();
        events.sort_by_key(|event| event.source_elapsed_micros);
        events
    }
}

/// Render a trace as the multi-line report emitted in the run log
pub fn render_report(trace: &QueryTrace) -> String {
    let mut report = String::from("Query Trace:\n");
    report.push_str(&format!(
        "'{}' to {} took {}μs\n",
        trace.request_type, trace.coordinator, trace.duration_micros
    ));
    report.push_str(&format!("{:>10} | {:>20} | {}\n", "Elapsed", "Source", "Activity"));
    for event in trace.chronological_events() {
        report.push_str(&format!(
            "{:>10} | {:>20} | {}\n",
            event.source_elapsed_micros, event.source, event.activity
        ));
    }
    report
}
