use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::RunnerError;

/// Read side of the board's serial console.
#[async_trait]
pub trait Console: Send {
    /// Reads whatever arrives within `wait`. `Ok(0)` means nothing did.
    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize>;
}

/// Opens a fresh console handle per task.
#[async_trait]
pub trait ConsoleSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Console>, RunnerError>;
}

pub struct SerialConsoleSource {
    path: String,
    baudrate: u32,
}

impl SerialConsoleSource {
    pub fn new(path: String, baudrate: u32) -> Self {
        SerialConsoleSource { path, baudrate }
    }
}

#[async_trait]
impl ConsoleSource for SerialConsoleSource {
    async fn open(&self) -> Result<Box<dyn Console>, RunnerError> {
        let port = tokio_serial::new(&self.path, self.baudrate)
            .open_native_async()
            .map_err(|source| RunnerError::DeviceUnavailable {
                path: self.path.clone(),
                source,
            })?;
        log::debug!("console opened on {} at {} baud", self.path, self.baudrate);
        Ok(Box::new(SerialConsole { port }))
    }
}

pub struct SerialConsole {
    port: SerialStream,
}

#[async_trait]
impl Console for SerialConsole {
    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize> {
        read_within(&mut self.port, buf, wait).await
    }
}

/// A read that returns nothing before `wait` ran out is a hang-up, not
/// silence.
async fn read_within<R>(port: &mut R, buf: &mut [u8], wait: Duration) -> io::Result<usize>
where
    R: AsyncRead + Unpin + Send,
{
    match tokio::time::timeout(wait, port.read(buf)).await {
        Ok(Ok(0)) if !buf.is_empty() => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "console hung up",
        )),
        Ok(read) => read,
        Err(_elapsed) => Ok(0),
    }
}

/// How console bytes are grouped into result chunks.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Forward every read as it arrived.
    #[default]
    Chunk,
    /// Hold bytes back until a newline, the remainder goes out at the end.
    Line,
}

pub struct Framer {
    mode: CaptureMode,
    pending: Vec<u8>,
}

impl Framer {
    pub fn new(mode: CaptureMode) -> Self {
        Framer {
            mode,
            pending: Vec::new(),
        }
    }

    /// Next chunk to forward, if any.
    pub fn feed(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.is_empty() {
            return None;
        }
        match self.mode {
            CaptureMode::Chunk => Some(bytes.to_vec()),
            CaptureMode::Line => {
                self.pending.extend_from_slice(bytes);
                let end = self.pending.iter().rposition(|&b| b == b'\n')? + 1;
                let rest = self.pending.split_off(end);
                Some(std::mem::replace(&mut self.pending, rest))
            }
        }
    }

    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}
