use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use log::warn;
use serde::Serialize;

use crate::broker::EntryId;
use crate::errors::ResultError;
use crate::results::{ArtifactStore, Chunk, ResultChannel};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    /// No output yet: queued, unknown, or not picked up by the runner.
    Pending,
    /// The live result log exists.
    Running,
    /// The artifact is written and the live log is gone.
    Finished,
}

/// Everything a status or result endpoint needs, without touching the runner.
#[derive(Clone)]
pub struct ResultReader {
    channel: ResultChannel,
    artifacts: ArtifactStore,
}

impl ResultReader {
    pub fn new(channel: ResultChannel, artifacts: ArtifactStore) -> Self {
        ResultReader { channel, artifacts }
    }

    pub async fn is_live(&self, task_id: &str) -> Result<bool, ResultError> {
        self.channel.exists(task_id).await
    }

    pub async fn artifact_exists(&self, task_id: &str) -> Result<bool, ResultError> {
        Ok(self.artifacts.exists(task_id).await?)
    }

    pub async fn phase(&self, task_id: &str) -> Result<TaskPhase, ResultError> {
        let live = self.is_live(task_id).await?;
        let archived = self.artifact_exists(task_id).await?;

        Ok(match (live, archived) {
            (true, archived) => {
                // the runner creates the artifact before the first entry
                if !archived {
                    warn!("task {} has a live result log but no artifact", task_id);
                }
                TaskPhase::Running
            }
            (false, true) => TaskPhase::Finished,
            (false, false) => TaskPhase::Pending,
        })
    }

    pub async fn is_finished(&self, task_id: &str) -> Result<bool, ResultError> {
        Ok(self.phase(task_id).await? == TaskPhase::Finished)
    }

    pub fn subscribe(
        &self,
        task_id: &str,
        from: EntryId,
    ) -> impl Stream<Item = Result<Chunk, ResultError>> + Send + 'static {
        self.channel.subscribe(task_id, from)
    }

    /// Whole output of a task in whatever phase it is: the live chunks while
    /// the log exists, then the part of the artifact that was not delivered
    /// live. A finished task is served entirely from its artifact.
    pub fn follow(
        &self,
        task_id: &str,
    ) -> impl Stream<Item = Result<Vec<u8>, ResultError>> + Send + 'static {
        let delivered = Arc::new(AtomicU64::new(0));

        let counter = delivered.clone();
        let live = self
            .channel
            .subscribe(task_id, EntryId::START)
            .map(move |chunk| {
                chunk.map(|chunk| {
                    counter.fetch_add(chunk.payload.len() as u64, Ordering::SeqCst);
                    chunk.payload
                })
            });

        let artifacts = self.artifacts.clone();
        let task_id = task_id.to_string();
        let tail = stream::once(async move {
            let offset = delivered.load(Ordering::SeqCst);
            Ok::<_, ResultError>(artifacts.read_from(&task_id, offset).await?)
        })
        .filter(|tail: &Result<Vec<u8>, ResultError>| {
            let keep = !matches!(tail, Ok(bytes) if bytes.is_empty());
            async move { keep }
        });

        live.chain(tail)
    }
}
