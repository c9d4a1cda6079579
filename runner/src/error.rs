use std::path::PathBuf;

use judgerlib::errors::{QueueError, ResultError, TaskError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Device Unavailable {path}: {source}")]
    DeviceUnavailable {
        path: String,
        source: tokio_serial::Error,
    },

    #[error("Relay IO Error {source:?}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Malformed relay frame {0:02x?}")]
    Frame([u8; 4]),
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Device Unavailable {path}: {source}")]
    DeviceUnavailable {
        path: String,
        source: tokio_serial::Error,
    },

    #[error("Relay Error {source}")]
    Relay {
        #[from]
        source: RelayError,
    },

    #[error("Staging Failure {}: {source}", .path.display())]
    StagingFailure {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Capture IO Error {source:?}")]
    CaptureIo { source: std::io::Error },

    #[error("Artifact Error {}: {source}", .path.display())]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Result Error {source}")]
    Result {
        #[from]
        source: ResultError,
    },

    #[error("Task Error {source}")]
    Task {
        #[from]
        source: TaskError,
    },

    #[error("Queue Error {source}")]
    Queue {
        #[from]
        source: QueueError,
    },
}
