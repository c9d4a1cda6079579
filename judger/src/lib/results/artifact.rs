use std::io::{ErrorKind, SeekFrom};
use std::path::PathBuf;

use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// On-disk copies of task output, one plain file per task id. They outlive
/// the live result logs and are the source of truth once a log expired.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        ArtifactStore { dir: dir.into() }
    }

    pub fn path(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.txt"))
    }

    /// Creates (or truncates) the artifact of `task_id`.
    pub async fn create(&self, task_id: &str) -> std::io::Result<ArtifactWriter> {
        fs::create_dir_all(&self.dir).await?;
        let file = File::create(self.path(task_id)).await?;
        Ok(ArtifactWriter { file })
    }

    pub async fn exists(&self, task_id: &str) -> std::io::Result<bool> {
        fs::try_exists(self.path(task_id)).await
    }

    /// Artifact content starting at byte `offset`; empty when there is no
    /// artifact or nothing past `offset`.
    pub async fn read_from(&self, task_id: &str, offset: u64) -> std::io::Result<Vec<u8>> {
        let mut file = match File::open(self.path(task_id)).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![];
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

pub struct ArtifactWriter {
    file: File,
}

impl ArtifactWriter {
    /// Appends `bytes` and flushes them before returning.
    pub async fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.file.write_all(bytes).await?;
        self.file.flush().await
    }
}
