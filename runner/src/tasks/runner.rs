use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use judgerlib::broker::{Broker, RedisBroker};
use judgerlib::errors::{QueueError, TaskError};
use judgerlib::queue::JobQueue;
use judgerlib::results::{ArtifactStore, ResultChannel};
use judgerlib::task::Task;
use tokio::time::Instant;

use crate::config::{AppConfig, RunnerConfig};
use crate::console::{ConsoleSource, Framer, SerialConsoleSource};
use crate::error::RunnerError;
use crate::power::PowerSession;
use crate::relay::RelayController;
use crate::tasks::log_sink::TaskLog;
use crate::tasks::staging;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Staged,
    Capturing,
    Finalizing,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Idle => "idle",
            RunnerState::Staged => "staged",
            RunnerState::Capturing => "capturing",
            RunnerState::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// The single board's worker. Takes one task at a time off the queue and
/// owns the relay and the console while doing so.
pub struct Runner<P: Read + Write> {
    queue: JobQueue,
    channel: ResultChannel,
    artifacts: ArtifactStore,
    relay: RelayController<P>,
    console: Box<dyn ConsoleSource>,
    cfg: RunnerConfig,
    state: RunnerState,
}

fn transition(state: &mut RunnerState, next: RunnerState, task: &Task) {
    log::info!("task {}: {} -> {}", task.id(), state, next);
    *state = next;
}

impl<P: Read + Write + Send> Runner<P> {
    /// Switches every configured channel off before taking any work.
    pub fn new(
        queue: JobQueue,
        channel: ResultChannel,
        artifacts: ArtifactStore,
        mut relay: RelayController<P>,
        console: Box<dyn ConsoleSource>,
        cfg: RunnerConfig,
    ) -> Result<Self, RunnerError> {
        relay.off(&cfg.power_addrs)?;
        Ok(Runner {
            queue,
            channel,
            artifacts,
            relay,
            console,
            cfg,
            state: RunnerState::Idle,
        })
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Only a broker failure ends the loop.
    pub async fn run_forever(&mut self) -> Result<(), RunnerError> {
        loop {
            self.run_once().await?;
        }
    }

    /// Waits for one task and runs it. Task failures are logged here and
    /// do not surface.
    pub async fn run_once(&mut self) -> Result<(), RunnerError> {
        let task = match self.queue.dequeue().await {
            Ok(task) => task,
            Err(QueueError::InvalidPayload { source }) => {
                log::error!("dropped invalid queue entry: {}", source);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        log::info!("task claimed: {} {}s", task.id(), task.time_limit());
        match self.run_task(&task).await {
            Ok(()) => log::info!("task finished: {}", task.id()),
            Err(e) => log::error!("task failed: {} {}", task.id(), e),
        }
        Ok(())
    }

    pub async fn run_task(&mut self, task: &Task) -> Result<(), RunnerError> {
        let mut log = TaskLog::new(task.id(), self.channel.clone(), self.artifacts.clone());
        let outcome = self.stage_and_capture(task, &mut log).await;

        transition(&mut self.state, RunnerState::Finalizing, task);
        let finalized = log.finish().await;
        transition(&mut self.state, RunnerState::Idle, task);

        outcome.and(finalized)
    }

    async fn stage_and_capture(
        &mut self,
        task: &Task,
        log: &mut TaskLog,
    ) -> Result<(), RunnerError> {
        let Runner {
            relay,
            console,
            cfg,
            state,
            ..
        } = self;

        transition(state, RunnerState::Staged, task);
        staging::stage(task.image_path(), &cfg.tftp_kernel_path, cfg.staging_mode).await?;

        transition(state, RunnerState::Capturing, task);
        relay.off(&cfg.power_addrs)?;
        log.start().await?;

        let session = PowerSession::open(relay, &cfg.power_addrs)?;
        let captured = capture(&**console, cfg, task, log).await;
        let powered_off = session.close().map_err(RunnerError::from);
        captured.and(powered_off)
    }
}

fn capture_deadline(start: Instant, time_limit: u64) -> Result<Instant, RunnerError> {
    start
        .checked_add(Duration::from_secs(time_limit))
        .ok_or(RunnerError::Task {
            source: TaskError::TimeLimit(time_limit),
        })
}

/// Forwards console output until the task's time limit runs out. Every read
/// is bounded by the time left.
async fn capture(
    source: &dyn ConsoleSource,
    cfg: &RunnerConfig,
    task: &Task,
    log: &mut TaskLog,
) -> Result<(), RunnerError> {
    let mut console = source.open().await?;
    let deadline = capture_deadline(Instant::now(), task.time_limit())?;
    let mut framer = Framer::new(cfg.capture_mode);
    let mut buf = vec![0u8; cfg.read_chunk_size.max(1)];

    let read = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break Ok(());
        }
        let n = match console.read_chunk(&mut buf, remaining).await {
            Ok(n) => n,
            Err(source) => break Err(RunnerError::CaptureIo { source }),
        };
        if let Some(chunk) = framer.feed(&buf[..n]) {
            if let Err(e) = log.append(&chunk).await {
                break Err(e);
            }
        }
    };

    let flushed = match framer.flush() {
        Some(rest) => log.append(&rest).await,
        None => Ok(()),
    };
    read.and(flushed)
}

#[tokio::main(flavor = "current_thread")]
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(&cfg.broker.url).await?);
    log::info!("connected to broker at {}", cfg.broker.url);

    let relay = RelayController::open(&cfg.runner.tty_power, cfg.runner.power_baudrate)?;
    let console = SerialConsoleSource::new(cfg.runner.tty_board.clone(), cfg.runner.board_baudrate);

    let mut runner = Runner::new(
        JobQueue::new(broker.clone(), &cfg.broker),
        ResultChannel::new(broker, &cfg.broker),
        ArtifactStore::new(cfg.results.artifact_dir.clone()),
        relay,
        Box::new(console),
        cfg.runner,
    )?;

    log::info!("config valid, waiting for tasks...");
    runner.run_forever().await?;
    Ok(())
}
