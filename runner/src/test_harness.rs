//! Fakes for the hardware seams: an in-memory relay port and a console that
//! plays back a script.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RunnerConfig;
use crate::console::{CaptureMode, Console, ConsoleSource};
use crate::error::RunnerError;
use crate::tasks::staging::StagingMode;

#[derive(Clone, Default)]
pub struct MemoryPort {
    written: Arc<Mutex<Vec<u8>>>,
    responses: Arc<Mutex<VecDeque<u8>>>,
    broken: Arc<Mutex<bool>>,
}

impl MemoryPort {
    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    /// `(address, command)` of every frame written so far.
    pub fn frames(&self) -> Vec<(u8, u8)> {
        self.written()
            .chunks(4)
            .map(|frame| (frame[1], frame[2]))
            .collect()
    }

    pub fn respond(&self, bytes: &[u8]) {
        self.responses.lock().unwrap().extend(bytes);
    }

    pub fn fail_writes(&self) {
        *self.broken.lock().unwrap() = true;
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if *self.broken.lock().unwrap() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "relay unplugged"));
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no response"));
        }
        let n = buf.len().min(responses.len());
        for (slot, byte) in buf.iter_mut().zip(responses.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

pub enum Step {
    Data(Duration, &'static [u8]),
    Fail(Duration),
}

/// Plays back `steps`, each delay counted from the previous step, then
/// stays silent.
pub struct ScriptedConsole {
    steps: VecDeque<Step>,
    waits: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize> {
        self.waits.lock().unwrap().push(wait);

        let delay = match self.steps.front_mut() {
            None => {
                tokio::time::sleep(wait).await;
                return Ok(0);
            }
            Some(Step::Data(delay, _)) | Some(Step::Fail(delay)) => delay,
        };
        if *delay > wait {
            *delay -= wait;
            tokio::time::sleep(wait).await;
            return Ok(0);
        }
        let delay = *delay;
        tokio::time::sleep(delay).await;

        match self.steps.pop_front() {
            Some(Step::Data(_, bytes)) => {
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            Some(Step::Fail(_)) => Err(io::Error::new(io::ErrorKind::BrokenPipe, "console gone")),
            None => Ok(0),
        }
    }
}

/// Hands out one scripted console per open, in order. Once the scripts run
/// out every console is silent.
#[derive(Clone, Default)]
pub struct ScriptedSource {
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    waits: Arc<Mutex<Vec<Duration>>>,
    unavailable: Arc<Mutex<bool>>,
}

impl ScriptedSource {
    pub fn push(&self, steps: Vec<Step>) {
        self.scripts.lock().unwrap().push_back(steps);
    }

    pub fn unplug(&self) {
        *self.unavailable.lock().unwrap() = true;
    }

    /// Every read bound requested so far, across consoles.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConsoleSource for ScriptedSource {
    async fn open(&self) -> Result<Box<dyn Console>, RunnerError> {
        if *self.unavailable.lock().unwrap() {
            return Err(RunnerError::DeviceUnavailable {
                path: "/dev/scripted".into(),
                source: tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "unplugged"),
            });
        }
        let steps = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedConsole {
            steps: steps.into(),
            waits: self.waits.clone(),
        }))
    }
}

pub fn runner_config(dir: &Path) -> RunnerConfig {
    RunnerConfig {
        tftp_kernel_path: dir.join("tftp/boot/kernel.img"),
        staging_mode: StagingMode::Symlink,
        tty_power: "/dev/ttyUSB0".into(),
        power_baudrate: 9600,
        power_addrs: vec![1, 2],
        tty_board: "/dev/ttyUSB1".into(),
        board_baudrate: 115200,
        capture_mode: CaptureMode::Chunk,
        read_chunk_size: 4096,
    }
}
