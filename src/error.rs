use crate::validate::ValidationReport;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to the device. Always fatal to the run.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("no prompt from device after {} s", .0.as_secs())]
    Timeout(Duration),

    #[error("session closed by device")]
    Closed,

    #[error("device rejected the session: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{} of {} declarations failed validation", .0.failures().count(), .0.declarations.len())]
    Invalid(ValidationReport),

    #[error("declaration {index} of '{group}' is malformed: {message}")]
    Malformed {
        group: String,
        index: usize,
        message: String,
    },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
