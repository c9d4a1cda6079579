use std::path::PathBuf;

use judgerlib::config::{BrokerConfig, ResultsConfig};
use serde::Deserialize;

use crate::console::CaptureMode;
use crate::tasks::staging::StagingMode;

fn default_tftp_kernel_path() -> PathBuf {
    PathBuf::from("./static/boot/kernel.img")
}

fn default_power_baudrate() -> u32 {
    9600
}

fn default_board_baudrate() -> u32 {
    115200
}

fn default_read_chunk_size() -> usize {
    4096
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct RunnerConfig {
    /// Where the board's boot loader fetches the kernel from.
    #[serde(default = "default_tftp_kernel_path")]
    pub(crate) tftp_kernel_path: PathBuf,
    #[serde(default)]
    pub(crate) staging_mode: StagingMode,

    pub(crate) tty_power: String,
    #[serde(default = "default_power_baudrate")]
    pub(crate) power_baudrate: u32,
    pub(crate) power_addrs: Vec<u8>,

    pub(crate) tty_board: String,
    #[serde(default = "default_board_baudrate")]
    pub(crate) board_baudrate: u32,
    #[serde(default)]
    pub(crate) capture_mode: CaptureMode,
    #[serde(default = "default_read_chunk_size")]
    pub(crate) read_chunk_size: usize,
}

#[derive(Deserialize, Debug)]
pub(crate) struct AppConfig {
    #[serde(default)]
    pub(crate) broker: BrokerConfig,
    #[serde(default)]
    pub(crate) results: ResultsConfig,
    pub(crate) runner: RunnerConfig,
}
