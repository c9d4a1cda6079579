use judgerlib::results::{ArtifactStore, ArtifactWriter, ResultChannel};

use crate::error::RunnerError;

/// Output of one task, written to the artifact file and the live result
/// channel in the same order.
///
/// The artifact exists before the start entry is published, and the log is
/// finalized exactly once: by `finish`, or from drop if `finish` was never
/// reached.
pub struct TaskLog {
    task_id: String,
    channel: ResultChannel,
    artifacts: ArtifactStore,
    artifact: Option<ArtifactWriter>,
    started: bool,
    finalized: bool,
}

impl TaskLog {
    pub fn new(task_id: &str, channel: ResultChannel, artifacts: ArtifactStore) -> Self {
        TaskLog {
            task_id: task_id.to_string(),
            channel,
            artifacts,
            artifact: None,
            started: false,
            finalized: false,
        }
    }

    /// Creates the artifact and publishes the empty start entry.
    pub async fn start(&mut self) -> Result<(), RunnerError> {
        if self.started {
            return Ok(());
        }
        let artifact = self.artifacts.create(&self.task_id).await;
        self.channel.publish(&self.task_id, b"").await?;
        self.started = true;

        let artifact = artifact.map_err(|source| RunnerError::Artifact {
            path: self.artifacts.path(&self.task_id),
            source,
        })?;
        self.artifact = Some(artifact);
        Ok(())
    }

    pub async fn append(&mut self, bytes: &[u8]) -> Result<(), RunnerError> {
        let path = self.artifacts.path(&self.task_id);
        let artifact = self.artifact.as_mut().ok_or_else(|| RunnerError::Artifact {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "log not started"),
        })?;
        artifact
            .append(bytes)
            .await
            .map_err(|source| RunnerError::Artifact { path, source })?;
        self.channel.publish(&self.task_id, bytes).await?;
        log::debug!("logged {} byte(s) from task {}", bytes.len(), self.task_id);
        Ok(())
    }

    /// Appends the terminal entry. A log that never started gets its start
    /// entry first.
    pub async fn finish(mut self) -> Result<(), RunnerError> {
        if !self.started {
            if let Err(e) = self.start().await {
                log::warn!("could not start result log of {}: {}", self.task_id, e);
            }
        }
        self.finalized = true;
        self.channel.finalize(&self.task_id).await?;
        Ok(())
    }
}

impl Drop for TaskLog {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        let channel = self.channel.clone();
        let task_id = std::mem::take(&mut self.task_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = channel.finalize(&task_id).await {
                        log::error!("could not finalize result log of {}: {}", task_id, e);
                    }
                });
            }
            Err(_) => log::error!("result log of {} left open", task_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use judgerlib::broker::{EntryId, MemoryBroker};
    use judgerlib::config::BrokerConfig;

    use super::*;

    const KEY: &str = "riscv-kernel-judger:task:a1";

    fn sink(broker: Arc<MemoryBroker>, dir: &std::path::Path) -> (TaskLog, ArtifactStore) {
        let channel = ResultChannel::new(broker, &BrokerConfig::default());
        let artifacts = ArtifactStore::new(dir);
        (TaskLog::new("a1", channel, artifacts.clone()), artifacts)
    }

    async fn entries(broker: &MemoryBroker) -> Vec<(Vec<u8>, bool)> {
        broker
            .read_after(KEY, EntryId::START, 100, std::time::Duration::ZERO)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.chunk, e.done))
            .collect()
    }

    #[tokio::test]
    async fn start_append_finish() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let (mut log, artifacts) = sink(broker.clone(), dir.path());

        log.start().await.unwrap();
        log.start().await.unwrap();
        assert!(artifacts.exists("a1").await.unwrap());
        log.append(b"boot\n").await.unwrap();
        log.finish().await.unwrap();

        assert_eq!(
            entries(&broker).await,
            vec![(vec![], false), (b"boot\n".to_vec(), false), (vec![], true)]
        );
        assert_eq!(std::fs::read(artifacts.path("a1")).unwrap(), b"boot\n");
    }

    #[tokio::test]
    async fn finish_without_start_still_starts() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let (log, artifacts) = sink(broker.clone(), dir.path());

        log.finish().await.unwrap();

        assert_eq!(entries(&broker).await, vec![(vec![], false), (vec![], true)]);
        assert!(artifacts.exists("a1").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_log_is_finalized() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let (mut log, _) = sink(broker.clone(), dir.path());

        log.start().await.unwrap();
        log.append(b"half").await.unwrap();
        drop(log);
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let got = entries(&broker).await;
        assert_eq!(got.len(), 3);
        assert_eq!(got.last(), Some(&(vec![], true)));
    }

    #[tokio::test]
    async fn append_before_start_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let broker = Arc::new(MemoryBroker::new());
        let (mut log, _) = sink(broker.clone(), dir.path());

        assert!(matches!(
            log.append(b"early").await,
            Err(RunnerError::Artifact { .. })
        ));
        log.finish().await.unwrap();
    }
}
