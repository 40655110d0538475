/// Phase of a diagnostics run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Schema,
    Write,
    Read,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Schema => write!(f, "schema"),
            Phase::Write => write!(f, "write"),
            Phase::Read => write!(f, "read"),
        }
    }
}

/// Events recorded by the runner as statements complete
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A statement finished executing
    StatementExecuted { phase: Phase },
    /// A trace report was emitted for a statement
    TraceReported { phase: Phase, duration_micros: i32 },
    /// A read returned the value that was written for its id
    RowVerified,
    /// A read returned no row, or a value other than the one written
    RowMismatched,
}

/// Statistics aggregated from run events
#[derive(Debug, Default, Clone)]
pub struct RunStats {
    pub schema_statements: usize,
    pub rows_written: usize,
    pub rows_read: usize,
    pub rows_verified: usize,
    pub rows_mismatched: usize,
    pub schema_traces: usize,
    pub write_traces: usize,
    pub read_traces: usize,
    pub trace_durations_micros: Vec<i32>,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a run event
    pub fn update(&mut self, event: &RunEvent) {
        match event {
            RunEvent::StatementExecuted { phase } => match phase {
                Phase::Schema => self.schema_statements += 1,
                Phase::Write => self.rows_written += 1,
                Phase::Read => self.rows_read += 1,
            },
            RunEvent::TraceReported {
                phase,
                duration_micros,
            } => {
                match phase {
                    Phase::Schema => self.schema_traces += 1,
                    Phase::Write => self.write_traces += 1,
                    Phase::Read => self.read_traces += 1,
                }
                self.trace_durations_micros.push(*duration_micros);
            }
            RunEvent::RowVerified => self.rows_verified += 1,
            RunEvent::RowMismatched => self.rows_mismatched += 1,
        }
    }

    pub fn traces_reported(&self) -> usize {
        self.schema_traces + self.write_traces + self.read_traces
    }

    /// Calculate percentile from reported trace durations
    pub fn percentile(&self, p: f64) -> Option<i32> {
        if self.trace_durations_micros.is_empty() {
            return None;
        }

        let mut sorted = self.trace_durations_micros.clone();
        sorted.sort_unstable();

        let index = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let index = index.saturating_sub(1).min(sorted.len() - 1);

        Some(sorted[index])
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<i32>, Option<i32>, Option<i32>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
