use std::io::{Read, Write};
use std::time::Duration;

use tokio_serial::SerialPort;

use crate::error::RelayError;

pub const FRAME_MARKER: u8 = 0xA0;
pub const CMD_OFF: u8 = 0;
pub const CMD_ON: u8 = 1;

const PORT_TIMEOUT: Duration = Duration::from_secs(1);

/// One 4-byte relay frame: marker, address, command, checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayFrame {
    pub address: u8,
    pub command: u8,
}

impl RelayFrame {
    pub fn new(address: u8, command: u8) -> Self {
        RelayFrame { address, command }
    }

    fn checksum(address: u8, command: u8) -> u8 {
        FRAME_MARKER.wrapping_add(address).wrapping_add(command)
    }

    pub fn encode(&self) -> [u8; 4] {
        [
            FRAME_MARKER,
            self.address,
            self.command,
            Self::checksum(self.address, self.command),
        ]
    }

    pub fn decode(bytes: [u8; 4]) -> Result<RelayFrame, RelayError> {
        let [marker, address, command, sum] = bytes;
        if marker != FRAME_MARKER || sum != Self::checksum(address, command) {
            return Err(RelayError::Frame(bytes));
        }
        Ok(RelayFrame { address, command })
    }
}

/// Multi-channel power relay behind a serial line.
///
/// Nothing is retried and on/off get no acknowledgement, so the controller
/// only knows what it sent.
pub struct RelayController<P> {
    port: P,
}

impl RelayController<Box<dyn SerialPort>> {
    pub fn open(path: &str, baudrate: u32) -> Result<Self, RelayError> {
        let port = tokio_serial::new(path, baudrate)
            .timeout(PORT_TIMEOUT)
            .open()
            .map_err(|source| RelayError::DeviceUnavailable {
                path: path.to_string(),
                source,
            })?;
        log::info!("relay opened on {} at {} baud", path, baudrate);
        Ok(RelayController { port })
    }
}

impl<P: Read + Write> RelayController<P> {
    pub fn new(port: P) -> Self {
        RelayController { port }
    }

    /// Sends `cmd` to every address in order. Commands above `CMD_ON` are
    /// queries and read one response frame per address.
    pub fn run_cmd(&mut self, addrs: &[u8], cmd: u8) -> Result<Vec<[u8; 4]>, RelayError> {
        let mut responses = Vec::new();
        for &addr in addrs {
            self.port.write_all(&RelayFrame::new(addr, cmd).encode())?;
            self.port.flush()?;

            if cmd > CMD_ON {
                let mut response = [0u8; 4];
                self.port.read_exact(&mut response)?;
                responses.push(response);
            }
        }
        Ok(responses)
    }

    pub fn on(&mut self, addrs: &[u8]) -> Result<(), RelayError> {
        log::debug!("relay on {:?}", addrs);
        self.run_cmd(addrs, CMD_ON).map(|_| ())
    }

    pub fn off(&mut self, addrs: &[u8]) -> Result<(), RelayError> {
        log::debug!("relay off {:?}", addrs);
        self.run_cmd(addrs, CMD_OFF).map(|_| ())
    }
}
