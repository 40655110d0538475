// Public API - the runner and the trace report types it emits
pub mod report;
pub mod runner;

// Internal modules - organized by concern
mod config;
mod db;
mod error;
mod telemetry;

pub use error::DiagnosticsError;
