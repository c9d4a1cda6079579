use judgerlib::errors::{QueueError, ResultError, TaskError};
use log::error;
use rocket::{http::Status, response::Responder, Request};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Queue Error {source:?}")]
    Queue {
        #[from]
        source: QueueError,
    },

    #[error("Result Error {source:?}")]
    ResultLog {
        #[from]
        source: ResultError,
    },

    #[error("Task Error {source:?}")]
    Task {
        #[from]
        source: TaskError,
    },

    #[error("IO Error {source:?}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("HTTP Error {0:?}")]
    HttpError(Status),
}

impl AppError {
    fn status(&self) -> Status {
        match self {
            Self::HttpError(x) => *x,
            Self::Queue {
                source: QueueError::BrokerUnavailable { .. },
            }
            | Self::ResultLog {
                source: ResultError::BrokerUnavailable { .. },
            } => Status::ServiceUnavailable,
            Self::Task { .. } => Status::BadRequest,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        error!("Error: {}", self);

        self.status().respond_to(req)
    }
}
