//! Errors raised by the runner itself, as opposed to driver failures.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagnosticsError {
    #[error("Cannot reach schema agreement after: {statement}")]
    SchemaAgreement { statement: String },
}
