use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use log::{debug, info};

use crate::broker::{BlockingConn, Broker, EntryId};
use crate::config::BrokerConfig;
use crate::errors::ResultError;

pub mod artifact;
pub mod reader;

pub use self::artifact::{ArtifactStore, ArtifactWriter};
pub use self::reader::{ResultReader, TaskPhase};

const READ_BATCH: usize = 128;

/// One piece of console output as stored in a task's result log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub id: EntryId,
    pub payload: Vec<u8>,
}

/// Per-task, append-only log of output chunks closed by a single terminal
/// entry. The runner is the only writer; any number of readers subscribe.
#[derive(Clone)]
pub struct ResultChannel {
    broker: Arc<dyn Broker>,
    prefix: String,
    ttl: Duration,
    poll: Duration,
}

impl ResultChannel {
    pub fn new(broker: Arc<dyn Broker>, cfg: &BrokerConfig) -> Self {
        ResultChannel {
            broker,
            prefix: cfg.result_key_prefix.clone(),
            ttl: cfg.result_ttl(),
            poll: cfg.poll_block(),
        }
    }

    fn key(&self, task_id: &str) -> String {
        format!("{}:{}", self.prefix, task_id)
    }

    /// Appends a non-terminal entry. An empty payload only makes the log
    /// exist, readers never see it.
    pub async fn publish(&self, task_id: &str, payload: &[u8]) -> Result<EntryId, ResultError> {
        Ok(self.broker.append(&self.key(task_id), payload).await?)
    }

    /// Appends the terminal entry; the log expires shortly afterwards.
    pub async fn finalize(&self, task_id: &str) -> Result<EntryId, ResultError> {
        let id = self.broker.append_terminal(&self.key(task_id), self.ttl).await?;
        info!("result log closed: {} (expires in {:?})", task_id, self.ttl);
        Ok(id)
    }

    pub async fn exists(&self, task_id: &str) -> Result<bool, ResultError> {
        Ok(self.broker.exists(&self.key(task_id)).await?)
    }

    /// Chunks strictly after `from`, ending at the terminal entry.
    ///
    /// Ends right away if the log does not exist, and also when a poll window
    /// passes empty and the log has disappeared in the meantime (expired).
    /// An empty window on a log that is still there is polled again.
    pub fn subscribe(
        &self,
        task_id: &str,
        from: EntryId,
    ) -> impl Stream<Item = Result<Chunk, ResultError>> + Send + 'static {
        let state = Subscription {
            broker: self.broker.clone(),
            key: self.key(task_id),
            poll: self.poll,
            last: from,
            pending: VecDeque::new(),
            conn: None,
            checked: false,
            done: false,
        };

        stream::unfold(state, |mut sub| async move {
            match sub.next_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), sub)),
                Ok(None) => None,
                Err(e) => {
                    sub.done = true;
                    sub.pending.clear();
                    Some((Err(e), sub))
                }
            }
        })
    }
}

struct Subscription {
    broker: Arc<dyn Broker>,
    key: String,
    poll: Duration,
    last: EntryId,
    pending: VecDeque<Chunk>,
    // opened on the first read, kept for the life of the subscription
    conn: Option<Box<dyn BlockingConn>>,
    checked: bool,
    done: bool,
}

impl Subscription {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, ResultError> {
        loop {
            if let Some(chunk) = self.pending.pop_front() {
                return Ok(Some(chunk));
            }
            if self.done {
                return Ok(None);
            }
            if !self.checked {
                self.checked = true;
                if !self.broker.exists(&self.key).await? {
                    debug!("no result log at {}", self.key);
                    return Ok(None);
                }
            }

            if self.conn.is_none() {
                self.conn = Some(self.broker.blocking_conn().await?);
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };
            let entries = conn
                .read_after(&self.key, self.last, READ_BATCH, self.poll)
                .await?;

            if entries.is_empty() {
                if !self.broker.exists(&self.key).await? {
                    debug!("result log {} vanished before its terminal entry", self.key);
                    return Ok(None);
                }
                continue;
            }

            for entry in entries {
                self.last = entry.id;
                if entry.done {
                    self.done = true;
                    break;
                }
                if !entry.chunk.is_empty() {
                    self.pending.push_back(Chunk {
                        id: entry.id,
                        payload: entry.chunk,
                    });
                }
            }
        }
    }
}
