use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::broker::{BlockingConn, Broker, EntryId, LogEntry};
use crate::errors::BrokerError;

/// In-process broker with the same contract as [`RedisBroker`](super::RedisBroker).
/// Used by the test suites and for running the pipeline without a Redis.
///
/// Clones share the same store; a blocking connection is just a clone.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    logs: HashMap<String, MemoryLog>,
}

#[derive(Default)]
struct MemoryLog {
    entries: Vec<LogEntry>,
    next: u64,
    expires_at: Option<Instant>,
}

impl State {
    fn live_log(&mut self, name: &str) -> Option<&mut MemoryLog> {
        let expired = self
            .logs
            .get(name)
            .and_then(|log| log.expires_at)
            .is_some_and(|at| at <= Instant::now());
        if expired {
            self.logs.remove(name);
        }
        self.logs.get_mut(name)
    }

    fn append(&mut self, name: &str, chunk: &[u8], done: bool) -> EntryId {
        // an expired log is gone, appending starts a fresh one
        self.live_log(name);
        let log = self.logs.entry(name.to_string()).or_default();
        log.next += 1;
        let id = EntryId::new(log.next, 0);
        log.entries.push(LogEntry {
            id,
            chunk: chunk.to_vec(),
            done,
        });
        id
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        MemoryBroker::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn pop_front(
        &self,
        list: &str,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        Ok(self
            .wait_for(wait, |state| state.lists.get_mut(list)?.pop_front())
            .await)
    }

    pub async fn read_after(
        &self,
        log: &str,
        after: EntryId,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<LogEntry>, BrokerError> {
        let entries = self
            .wait_for(wait, |state| {
                let live = state.live_log(log)?;
                let batch: Vec<LogEntry> = live
                    .entries
                    .iter()
                    .filter(|entry| entry.id > after)
                    .take(count)
                    .cloned()
                    .collect();
                (!batch.is_empty()).then_some(batch)
            })
            .await;
        Ok(entries.unwrap_or_default())
    }

    /// Runs `check` until it yields a value or `wait` has elapsed.
    async fn wait_for<T, F>(&self, wait: Duration, mut check: F) -> Option<T>
    where
        T: Send,
        F: FnMut(&mut State) -> Option<T> + Send,
    {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let found = check(&mut self.lock());
            if found.is_some() {
                return found;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push_back(&self, list: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.lock()
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(payload);
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn list_len(&self, list: &str) -> Result<usize, BrokerError> {
        Ok(self.lock().lists.get(list).map_or(0, VecDeque::len))
    }

    async fn append(&self, log: &str, chunk: &[u8]) -> Result<EntryId, BrokerError> {
        let id = self.lock().append(log, chunk, false);
        self.shared.changed.notify_waiters();
        Ok(id)
    }

    async fn append_terminal(&self, log: &str, ttl: Duration) -> Result<EntryId, BrokerError> {
        let id = {
            let mut state = self.lock();
            let id = state.append(log, b"", true);
            if let Some(live) = state.live_log(log) {
                live.expires_at = Some(Instant::now() + ttl);
            }
            id
        };
        self.shared.changed.notify_waiters();
        Ok(id)
    }

    async fn exists(&self, log: &str) -> Result<bool, BrokerError> {
        Ok(self.lock().live_log(log).is_some())
    }

    async fn blocking_conn(&self) -> Result<Box<dyn BlockingConn>, BrokerError> {
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl BlockingConn for MemoryBroker {
    async fn pop_front(
        &mut self,
        list: &str,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        MemoryBroker::pop_front(self, list, wait).await
    }

    async fn read_after(
        &mut self,
        log: &str,
        after: EntryId,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<LogEntry>, BrokerError> {
        MemoryBroker::read_after(self, log, after, count, wait).await
    }
}

/// Memory broker that counts the blocking connections handed out.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct CountingBroker {
    inner: MemoryBroker,
    pub(crate) opened: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
#[async_trait]
impl Broker for CountingBroker {
    async fn push_back(&self, list: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.inner.push_back(list, payload).await
    }

    async fn list_len(&self, list: &str) -> Result<usize, BrokerError> {
        self.inner.list_len(list).await
    }

    async fn append(&self, log: &str, chunk: &[u8]) -> Result<EntryId, BrokerError> {
        self.inner.append(log, chunk).await
    }

    async fn append_terminal(&self, log: &str, ttl: Duration) -> Result<EntryId, BrokerError> {
        self.inner.append_terminal(log, ttl).await
    }

    async fn exists(&self, log: &str) -> Result<bool, BrokerError> {
        self.inner.exists(log).await
    }

    async fn blocking_conn(&self) -> Result<Box<dyn BlockingConn>, BrokerError> {
        self.opened
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.blocking_conn().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_is_fifo() {
        let broker = MemoryBroker::new();
        broker.push_back("q", "a".into()).await.unwrap();
        broker.push_back("q", "b".into()).await.unwrap();

        assert_eq!(broker.list_len("q").await.unwrap(), 2);
        let wait = Duration::from_millis(10);
        assert_eq!(broker.pop_front("q", wait).await.unwrap(), Some(b"a".to_vec()));
        assert_eq!(broker.pop_front("q", wait).await.unwrap(), Some(b"b".to_vec()));
        assert_eq!(broker.pop_front("q", wait).await.unwrap(), None);
        assert_eq!(broker.list_len("q").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn pop_wakes_up_on_push() {
        let broker = Arc::new(MemoryBroker::new());
        let pusher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pusher.push_back("q", "late".into()).await.unwrap();
        });

        let popped = broker.pop_front("q", Duration::from_secs(5)).await.unwrap();
        assert_eq!(popped, Some(b"late".to_vec()));
    }

    #[tokio::test]
    async fn reads_strictly_after_offset() {
        let broker = MemoryBroker::new();
        let first = broker.append("log", b"one").await.unwrap();
        broker.append("log", b"two").await.unwrap();

        let wait = Duration::from_millis(10);
        let all = broker.read_after("log", EntryId::START, 10, wait).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].id < all[1].id);

        let rest = broker.read_after("log", first, 10, wait).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].chunk, b"two");

        let none = broker.read_after("log", all[1].id, 10, wait).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn blocking_conn_sees_the_shared_store() {
        let broker = MemoryBroker::new();
        let mut conn = broker.blocking_conn().await.unwrap();
        broker.push_back("q", b"\xff\xfe".to_vec()).await.unwrap();
        broker.append("log", b"one").await.unwrap();

        let wait = Duration::from_millis(10);
        assert_eq!(conn.pop_front("q", wait).await.unwrap(), Some(vec![0xff, 0xfe]));
        let entries = conn.read_after("log", EntryId::START, 10, wait).await.unwrap();
        assert_eq!(entries[0].chunk, b"one");
    }

    #[tokio::test]
    async fn terminated_log_expires() {
        let broker = MemoryBroker::new();
        broker.append("log", b"x").await.unwrap();
        broker
            .append_terminal("log", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(broker.exists("log").await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!broker.exists("log").await.unwrap());
        let gone = broker
            .read_after("log", EntryId::START, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(gone.is_empty());
    }
}
