//! Transport abstraction for the debug port.
//!
//! The debug-port protocol is written against the [`Transport`] trait and runs
//! unmodified over either transport:
//!
//! ```text
//! +---------------------------+
//! |   DebugPort / Bridge      |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |      Transport trait      |
//! +------+-------------+------+
//!        |             |
//!        v             v
//! +------+------+ +----+--------+
//! | NativePort  | |  TcpPort    |
//! | (serialport)| | (TcpStream) |
//! +-------------+ +-------------+
//!   local UART     TCP-serial bridge
//! ```
//!
//! An endpoint string containing a colon selects the TCP transport, anything
//! else is treated as a serial device name (see [`Endpoint`]).

pub mod native;
pub mod tcp;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};

/// Default TCP port of the serial bridge.
pub const DEFAULT_BRIDGE_PORT: u16 = 2560;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout, applied to every operation on the port.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 6_000_000,
            timeout: Duration::from_secs(60),
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Byte-stream connection to a debug port.
///
/// Implementations know nothing about the protocol. They are owned by whoever
/// opened them and release the underlying device when closed or dropped.
pub trait Transport: Read + Write + Send {
    /// Get the port name or peer address.
    fn name(&self) -> &str;

    /// Whether the transport can still be used for I/O.
    fn is_open(&self) -> bool;

    /// Close the transport and release resources.
    ///
    /// Closing an already closed transport is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Read exactly `n` bytes.
    ///
    /// The underlying reads may return fewer bytes than requested, so this
    /// keeps reading until `n` bytes have arrived, the stream ends or a read
    /// times out.
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;

        while filled < n {
            match self.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(Error::Connection(format!(
                        "{}: stream closed after {filled} of {n} bytes",
                        self.name()
                    )));
                },
                Ok(count) => filled += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Err(Error::Timeout(format!(
                        "{}: read timed out after {filled} of {n} bytes",
                        self.name()
                    )));
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }

        Ok(buf)
    }

    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Write `buf`, returning how many bytes actually went out.
    ///
    /// A device that stops accepting data (zero-length write or write
    /// timeout) ends the loop early; callers compare the count against the
    /// buffer length.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;

        while written < buf.len() {
            match self.write(&buf[written..]) {
                Ok(0) => break,
                Ok(count) => written += count,
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    trace!("{}: write timed out after {written} bytes", self.name());
                    break;
                },
                Err(e) => return Err(Error::Io(e)),
            }
        }

        if written < buf.len() {
            // A stalled line may not drain; the short count is what matters.
            if let Err(e) = self.flush() {
                trace!("{}: flush after short write failed: {e}", self.name());
            }
        } else {
            self.flush()?;
        }

        Ok(written)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(n)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write_bytes(buf)
    }
}

/// Where the debug port lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A locally attached serial device.
    Serial(String),
    /// A TCP-serial bridge.
    Tcp {
        /// Host name or address.
        host: String,
        /// TCP port.
        port: u16,
    },
}

impl Endpoint {
    /// Parse an endpoint string.
    ///
    /// Anything containing a colon is `host:port`; everything else is a serial
    /// device name.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("no debug port configured".into()));
        }

        match s.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return Err(Error::Config(format!("missing host in endpoint '{s}'")));
                }
                let port = if port.is_empty() {
                    DEFAULT_BRIDGE_PORT
                } else {
                    port.parse::<u16>()
                        .map_err(|e| Error::Config(format!("invalid TCP port in '{s}': {e}")))?
                };
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port,
                })
            },
            None => Ok(Self::Serial(s.to_string())),
        }
    }

    /// Open a transport for this endpoint.
    ///
    /// The serial settings supply the baud rate for serial endpoints and the
    /// I/O timeout for both kinds.
    pub fn open(&self, serial: &SerialConfig) -> Result<Box<dyn Transport>> {
        match self {
            Self::Serial(name) => {
                let config = SerialConfig {
                    port_name: name.clone(),
                    ..serial.clone()
                };
                Ok(Box::new(native::NativePort::open(&config)?))
            },
            Self::Tcp { host, port } => Ok(Box::new(tcp::TcpPort::connect(
                host,
                *port,
                serial.timeout,
            )?)),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(name) => write!(f, "{name}"),
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
        }
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

pub use native::{NativePort, NativePortEnumerator};
pub use tcp::TcpPort;
