//! Client side of the pigpio daemon socket protocol.
//!
//! Two TCP connections are opened to the daemon: a command socket for
//! request/response exchanges and a notification socket that, once
//! switched to in-band mode, streams level reports.

use std::collections::VecDeque;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8888;

pub const ENV_ADDRESS: &str = "PIGPIO_ADDR";
pub const ENV_PORT: &str = "PIGPIO_PORT";

const COMMAND_SIZE: usize = 16;
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PigpioCommand {
    HardwareVersion = 17,
    NotifyBegin = 19,
    NotifyClose = 21,
    NotifyOpenInBand = 99,
}

impl PigpioCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PigpioCommand::HardwareVersion => "HWVER",
            PigpioCommand::NotifyBegin => "NB",
            PigpioCommand::NotifyClose => "NC",
            PigpioCommand::NotifyOpenInBand => "NOIB",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceLinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Can't connect to pigpio at {address}: {source}")]
    ConnectionFailure {
        address: String,
        source: std::io::Error,
    },

    #[error("Command {command} failed with status {status}")]
    CommandFailed { command: &'static str, status: i32 },

    #[error("Not connected to the pigpio daemon")]
    NotConnected,
}

/// Source of level reports.
pub trait DeviceLink {
    /// Copy whatever report bytes are available into `buf` without
    /// waiting. `Ok(0)` means nothing is pending right now; a closed link
    /// is an error.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, DeviceLinkError>;

    /// Select the channels reports are sent for.
    fn set_notify_mask(&mut self, mask: u32) -> Result<(), DeviceLinkError>;

    fn hardware_version(&mut self) -> Result<i32, DeviceLinkError>;

    /// Close the link. Calling it again does nothing.
    fn disconnect(&mut self);
}

impl fmt::Debug for dyn DeviceLink + Send {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeviceLink")
    }
}

fn encode_command(command: PigpioCommand, p1: u32, p2: u32) -> [u8; COMMAND_SIZE] {
    let mut frame = [0u8; COMMAND_SIZE];
    frame[0..4].copy_from_slice(&(command as u32).to_le_bytes());
    frame[4..8].copy_from_slice(&p1.to_le_bytes());
    frame[8..12].copy_from_slice(&p2.to_le_bytes());
    frame
}

/// Status word of a response frame.
fn decode_status(frame: &[u8; COMMAND_SIZE]) -> i32 {
    i32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]])
}

/// Send one command and wait for its response. Negative statuses are
/// daemon errors.
fn exchange<S: Read + Write>(
    stream: &mut S,
    command: PigpioCommand,
    p1: u32,
    p2: u32,
) -> Result<i32, DeviceLinkError> {
    stream.write_all(&encode_command(command, p1, p2))?;

    let mut response = [0u8; COMMAND_SIZE];
    stream.read_exact(&mut response)?;

    let status = decode_status(&response);
    log::debug!("{} -> {}", command.as_str(), status);
    if status < 0 {
        return Err(DeviceLinkError::CommandFailed {
            command: command.as_str(),
            status,
        });
    }
    Ok(status)
}

#[derive(Debug)]
pub struct PigpioLink {
    address: String,
    command: Option<TcpStream>,
    notify: Option<TcpStream>,
    handle: u32,
}

impl PigpioLink {
    /// Open the command and notification sockets and switch the latter to
    /// in-band notifications.
    pub fn connect(address: &str, port: u16) -> Result<Self, DeviceLinkError> {
        let display = format!("{}:{}", address, port);
        log::debug!("Connecting to pigpio at {}", display);

        let open = || -> Result<TcpStream, DeviceLinkError> {
            let stream = TcpStream::connect((address, port)).map_err(|source| {
                DeviceLinkError::ConnectionFailure {
                    address: display.clone(),
                    source,
                }
            })?;
            stream.set_read_timeout(Some(COMMAND_TIMEOUT))?;
            stream.set_nodelay(true)?;
            Ok(stream)
        };

        let command = open()?;
        let mut notify = open()?;

        let handle = exchange(&mut notify, PigpioCommand::NotifyOpenInBand, 0, 0)? as u32;
        notify.set_nonblocking(true)?;
        log::info!("Connected to pigpio at {}, notification handle {}", display, handle);

        Ok(Self {
            address: display,
            command: Some(command),
            notify: Some(notify),
            handle,
        })
    }

    /// Connect using `PIGPIO_ADDR` / `PIGPIO_PORT` when set, the defaults
    /// otherwise.
    pub fn connect_from_env() -> Result<Self, DeviceLinkError> {
        let address = std::env::var(ENV_ADDRESS)
            .ok()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let port = std::env::var(ENV_PORT)
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        Self::connect(&address, port)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn command(&mut self, command: PigpioCommand, p1: u32, p2: u32) -> Result<i32, DeviceLinkError> {
        let stream = self.command.as_mut().ok_or(DeviceLinkError::NotConnected)?;
        exchange(stream, command, p1, p2)
    }
}

impl DeviceLink for PigpioLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, DeviceLinkError> {
        let notify = self.notify.as_mut().ok_or(DeviceLinkError::NotConnected)?;
        match notify.read(buf) {
            Ok(0) => {
                log::info!("pigpio at {} closed the notification stream", self.address);
                Err(DeviceLinkError::NotConnected)
            }
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_notify_mask(&mut self, mask: u32) -> Result<(), DeviceLinkError> {
        log::debug!("Notify mask {:08X}", mask);
        let handle = self.handle;
        self.command(PigpioCommand::NotifyBegin, handle, mask).map(|_| ())
    }

    fn hardware_version(&mut self) -> Result<i32, DeviceLinkError> {
        self.command(PigpioCommand::HardwareVersion, 0, 0)
    }

    fn disconnect(&mut self) {
        if self.command.is_none() {
            return;
        }
        let handle = self.handle;
        if let Err(e) = self.command(PigpioCommand::NotifyClose, handle, 0) {
            log::debug!("Closing notifications failed: {}", e);
        }
        self.command = None;
        self.notify = None;
        log::info!("Disconnected from pigpio at {}", self.address);
    }
}

impl Drop for PigpioLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Link fed from bytes held in memory, for replaying a recorded report
/// stream or driving the capture in tests.
#[derive(Debug, Default)]
pub struct MemoryLink {
    chunks: VecDeque<Vec<u8>>,
    hardware_version: i32,
    notify_mask: u32,
    hang_up_when_drained: bool,
    connected: bool,
}

impl MemoryLink {
    pub fn new(hardware_version: i32) -> Self {
        Self {
            hardware_version,
            connected: true,
            ..Self::default()
        }
    }

    /// Queue bytes to be returned by a later `read_available`.
    pub fn push(&mut self, bytes: impl Into<Vec<u8>>) {
        self.chunks.push_back(bytes.into());
    }

    /// Report a closed link once every queued chunk has been read.
    pub fn hang_up_when_drained(mut self) -> Self {
        self.hang_up_when_drained = true;
        self
    }

    pub fn notify_mask(&self) -> u32 {
        self.notify_mask
    }
}

impl DeviceLink for MemoryLink {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, DeviceLinkError> {
        if !self.connected {
            return Err(DeviceLinkError::NotConnected);
        }
        let Some(mut chunk) = self.chunks.pop_front() else {
            if self.hang_up_when_drained {
                self.connected = false;
                return Err(DeviceLinkError::NotConnected);
            }
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunk.drain(..n);
            self.chunks.push_front(chunk);
        }
        Ok(n)
    }

    fn set_notify_mask(&mut self, mask: u32) -> Result<(), DeviceLinkError> {
        if !self.connected {
            return Err(DeviceLinkError::NotConnected);
        }
        self.notify_mask = mask;
        Ok(())
    }

    fn hardware_version(&mut self) -> Result<i32, DeviceLinkError> {
        Ok(self.hardware_version)
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.chunks.clear();
    }
}
