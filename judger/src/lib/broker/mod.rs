use std::fmt::{self, Display};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::BrokerError;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Position of an entry inside a result log, ordered like Redis stream ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    /// Sits before every entry that can ever be appended.
    pub const START: EntryId = EntryId { ms: 0, seq: 0 };

    pub fn new(ms: u64, seq: u64) -> Self {
        EntryId { ms, seq }
    }
}

impl Default for EntryId {
    fn default() -> Self {
        EntryId::START
    }
}

impl Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s.split_once('-').unwrap_or((s, "0"));
        let ms = ms.parse().map_err(|_| BrokerError::EntryId(s.to_string()))?;
        let seq = seq.parse().map_err(|_| BrokerError::EntryId(s.to_string()))?;
        Ok(EntryId { ms, seq })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub chunk: Vec<u8>,
    pub done: bool,
}

/// Backing store for both the job queue (a FIFO list) and the per-task
/// result logs (append-only, offset addressed, expiring once terminated).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn push_back(&self, list: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    async fn list_len(&self, list: &str) -> Result<usize, BrokerError>;

    async fn append(&self, log: &str, chunk: &[u8]) -> Result<EntryId, BrokerError>;

    /// Appends the `done` entry and lets the whole log expire after `ttl`.
    async fn append_terminal(&self, log: &str, ttl: Duration) -> Result<EntryId, BrokerError>;

    async fn exists(&self, log: &str) -> Result<bool, BrokerError>;

    /// A connection of its own for one blocking reader. Callers keep it for
    /// as long as they keep reading.
    async fn blocking_conn(&self) -> Result<Box<dyn BlockingConn>, BrokerError>;
}

/// The calls that wait on the broker. They stall whatever else shares the
/// connection, so each reader owns one.
#[async_trait]
pub trait BlockingConn: Send {
    /// Atomically removes the head of `list`, waiting at most `wait` for one
    /// to show up.
    async fn pop_front(&mut self, list: &str, wait: Duration)
        -> Result<Option<Vec<u8>>, BrokerError>;

    /// Up to `count` entries strictly after `after`, waiting at most `wait`
    /// when none are there yet. An empty result means the window elapsed.
    async fn read_after(
        &mut self,
        log: &str,
        after: EntryId,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<LogEntry>, BrokerError>;
}
