use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::broker::{BlockingConn, Broker};
use crate::config::BrokerConfig;
use crate::errors::QueueError;
use crate::task::Task;

/// FIFO of pending tasks, stored as JSON on a single broker list.
///
/// There is no acknowledgement: a dequeued task belongs to whoever popped it.
/// Clones share the blocking connection used by `dequeue`.
#[derive(Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    key: String,
    poll: Duration,
    conn: Arc<Mutex<Option<Box<dyn BlockingConn>>>>,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>, cfg: &BrokerConfig) -> Self {
        JobQueue {
            broker,
            key: cfg.queue_key.clone(),
            poll: cfg.poll_block(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn enqueue(&self, task: &Task) -> Result<(), QueueError> {
        let payload = task.encode()?;
        self.broker.push_back(&self.key, payload.into_bytes()).await?;
        info!("task enqueued: {}", task.id());
        Ok(())
    }

    /// Waits for the next task. The entry is removed from the queue even if
    /// it fails to decode.
    ///
    /// The blocking connection is opened on first use and kept; a broker
    /// error drops it so the next call reconnects.
    pub async fn dequeue(&self) -> Result<Task, QueueError> {
        let mut slot = self.conn.lock().await;
        loop {
            if slot.is_none() {
                *slot = Some(self.broker.blocking_conn().await?);
            }
            let Some(conn) = slot.as_mut() else {
                continue;
            };

            match conn.pop_front(&self.key, self.poll).await {
                Ok(Some(payload)) => return Ok(Task::decode(&payload)?),
                Ok(None) => debug!("no work available..."),
                Err(e) => {
                    *slot = None;
                    return Err(e.into());
                }
            }
        }
    }

    pub async fn size(&self) -> Result<usize, QueueError> {
        Ok(self.broker.list_len(&self.key).await?)
    }
}
