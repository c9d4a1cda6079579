use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamReadReply;

use crate::broker::{BlockingConn, Broker, EntryId, LogEntry};
use crate::errors::BrokerError;

/// Redis lists back the queue, Redis streams back the result logs.
///
/// Blocking commands (`BLPOP`, `XREAD BLOCK`) stall every other command on
/// the same connection. They run on a [`RedisBlockingConn`] owned by the
/// reader, while the shared multiplexed connection serves everything else.
#[derive(Clone)]
pub struct RedisBroker {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<RedisBroker, BrokerError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(RedisBroker { client, conn })
    }
}

pub struct RedisBlockingConn {
    conn: MultiplexedConnection,
}

// BLPOP and XREAD read a zero timeout as "block forever".
fn block_ms(wait: Duration) -> u64 {
    (wait.as_millis() as u64).max(1)
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push_back(&self, list: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let _len: i64 = redis::cmd("RPUSH")
            .arg(list)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn list_len(&self, list: &str) -> Result<usize, BrokerError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(list).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn append(&self, log: &str, chunk: &[u8]) -> Result<EntryId, BrokerError> {
        let mut conn = self.conn.clone();
        let id: String = redis::cmd("XADD")
            .arg(log)
            .arg("*")
            .arg("chunk")
            .arg(chunk)
            .query_async(&mut conn)
            .await?;
        id.parse()
    }

    async fn append_terminal(&self, log: &str, ttl: Duration) -> Result<EntryId, BrokerError> {
        let mut conn = self.conn.clone();
        let (id,): (String,) = redis::pipe()
            .atomic()
            .cmd("XADD")
            .arg(log)
            .arg("*")
            .arg("chunk")
            .arg(b"".as_slice())
            .arg("done")
            .arg(1)
            .cmd("PEXPIRE")
            .arg(log)
            .arg(block_ms(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        id.parse()
    }

    async fn exists(&self, log: &str) -> Result<bool, BrokerError> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS").arg(log).query_async(&mut conn).await?;
        Ok(exists)
    }

    async fn blocking_conn(&self) -> Result<Box<dyn BlockingConn>, BrokerError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("opened a blocking broker connection");
        Ok(Box::new(RedisBlockingConn { conn }))
    }
}

#[async_trait]
impl BlockingConn for RedisBlockingConn {
    async fn pop_front(
        &mut self,
        list: &str,
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, BrokerError> {
        let secs = block_ms(wait) as f64 / 1000.0;
        let popped: Option<(String, Vec<u8>)> = redis::cmd("BLPOP")
            .arg(list)
            .arg(secs)
            .query_async(&mut self.conn)
            .await?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn read_after(
        &mut self,
        log: &str,
        after: EntryId,
        count: usize,
        wait: Duration,
    ) -> Result<Vec<LogEntry>, BrokerError> {
        let reply: Option<StreamReadReply> = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms(wait))
            .arg("STREAMS")
            .arg(log)
            .arg(after.to_string())
            .query_async(&mut self.conn)
            .await?;

        let Some(reply) = reply else {
            debug!("no entries on {} after {}", log, after);
            return Ok(vec![]);
        };

        let mut entries = vec![];
        for key in reply.keys {
            for stream_id in key.ids {
                let chunk: Vec<u8> = stream_id.get("chunk").unwrap_or_default();
                let done = stream_id.get::<i64>("done") == Some(1);
                entries.push(LogEntry {
                    id: stream_id.id.parse()?,
                    chunk,
                    done,
                });
            }
        }
        Ok(entries)
    }
}
