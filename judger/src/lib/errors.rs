use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Redis Error {source:?}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    #[error("Malformed entry id {0:?}")]
    EntryId(String),

    #[error("Malformed entry {0}")]
    Entry(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("task id must not be empty")]
    EmptyId,

    #[error(
        "time limit must be between 1 and {max} seconds, got {0}",
        max = crate::task::MAX_TIME_LIMIT
    )]
    TimeLimit(u64),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker Unavailable {source:?}")]
    BrokerUnavailable {
        #[from]
        source: BrokerError,
    },

    #[error("Invalid Payload {source:?}")]
    InvalidPayload {
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ResultError {
    #[error("Broker Unavailable {source:?}")]
    BrokerUnavailable {
        #[from]
        source: BrokerError,
    },

    #[error("Artifact Error {source:?}")]
    Artifact {
        #[from]
        source: std::io::Error,
    },
}
