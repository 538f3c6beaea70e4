//! Debug-port protocol engine.
//!
//! [`DebugPort`] frames requests, sends them over a [`Transport`] and blocks
//! until the matching response arrives. Every transaction is a full
//! synchronous round trip; there is no pipelining and no retry.
//!
//! ## Example
//!
//! ```rust,no_run
//! use foenixmgr::{DebugPort, Endpoint, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = Endpoint::parse("/dev/ttyUSB0")?;
//!     let port = DebugPort::open(&endpoint, &SerialConfig::default())?;
//!
//!     // enter_debug / exit_debug / close happen even if the closure fails
//!     let revision = port.session(|port| port.revision())?;
//!     println!("Debug port revision {revision:X}");
//!
//!     Ok(())
//! }
//! ```

use {
    crate::{
        error::{Error, Result},
        port::{Endpoint, SerialConfig, Transport},
        protocol::frame::{Command, RESPONSE_SYNC, RequestFrame, Response},
    },
    byteorder::{ByteOrder, LittleEndian},
    log::{debug, info, trace, warn},
    std::{thread, time::Duration},
};

/// Size of a logical flash sector.
pub const SECTOR_SIZE: usize = 8 * 1024;

/// RAM address the sector-programming command reads its data from.
pub const SECTOR_STAGING_ADDRESS: u32 = 0x00_0000;

/// Largest sector index whose two 4 KiB blocks fit the address field.
pub const MAX_SECTOR: u8 = 0x7F;

/// Settling delays the flash needs after destructive commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// Wait after each 4 KiB block erase.
    pub erase_sector: Duration,
    /// Wait after programming a sector.
    pub program_sector: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            erase_sector: Duration::from_secs(1),
            program_sector: Duration::from_secs(2),
        }
    }
}

impl Delays {
    /// No waiting at all (for simulated targets).
    pub const NONE: Self = Self {
        erase_sector: Duration::ZERO,
        program_sector: Duration::ZERO,
    };
}

/// Where the target loads its LUTs from at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSource {
    /// Boot from RAM.
    Ram,
    /// Boot from flash.
    Flash,
}

/// Debug-port client.
pub struct DebugPort<T: Transport> {
    transport: T,
    delays: Delays,
    status0: u8,
    status1: u8,
}

impl DebugPort<Box<dyn Transport>> {
    /// Open the transport selected by `endpoint`.
    pub fn open(endpoint: &Endpoint, serial: &SerialConfig) -> Result<Self> {
        info!("Connecting to {endpoint}");
        Ok(Self::new(endpoint.open(serial)?))
    }
}

impl<T: Transport> DebugPort<T> {
    /// Wrap an already opened transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            delays: Delays::default(),
            status0: 0,
            status1: 0,
        }
    }

    /// Override the flash settling delays.
    #[must_use]
    pub fn with_delays(mut self, delays: Delays) -> Self {
        self.delays = delays;
        self
    }

    /// Get a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Status bytes of the last response.
    pub fn status(&self) -> (u8, u8) {
        (self.status0, self.status1)
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.transport
            .is_open()
    }

    /// Close the transport.
    pub fn close(&mut self) -> Result<()> {
        self.transport
            .close()
    }

    /// Run `f` inside a debug session and close the connection afterwards.
    ///
    /// `exit_debug` runs even if `f` fails, and the transport is closed even
    /// if entering or leaving debug mode fails. The first error wins.
    pub fn session<R, F>(mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self) -> Result<R>,
    {
        let result = match self.enter_debug() {
            Ok(()) => {
                let result = f(&mut self);
                if let Err(e) = &result {
                    warn!("Operation failed, leaving debug mode: {e}");
                }
                let exited = self.exit_debug();
                result.and_then(|value| exited.map(|()| value))
            },
            Err(e) => Err(e),
        };

        let closed = self.close();
        result.and_then(|value| closed.map(|()| value))
    }

    /// Send one request and wait for its response.
    ///
    /// With a non-empty `data` the request carries it as payload; otherwise the
    /// length field holds `read_length` and, if that is non-zero, the response
    /// carries that many payload bytes.
    pub fn transfer(
        &mut self,
        command: Command,
        address: u32,
        data: Option<&[u8]>,
        read_length: u16,
    ) -> Result<Response> {
        self.status0 = 0;
        self.status1 = 0;

        let data = data.unwrap_or_default();
        let frame = RequestFrame::new(command, address, data, read_length)?;
        let bytes = frame.build();
        trace!(
            "Sending {:?} addr=0x{:06X} len={} ({} bytes)",
            command,
            address,
            frame.length(),
            bytes.len()
        );

        let written = self
            .transport
            .write_bytes(&bytes)?;
        if written != bytes.len() {
            return Err(Error::Protocol(format!(
                "could not write {command:?} request: wrote {written} of {} bytes",
                bytes.len()
            )));
        }

        self.wait_for_sync()?;

        let status = self
            .transport
            .read_bytes(2)?;
        let payload = if data.is_empty() && read_length > 0 {
            self.transport
                .read_bytes(usize::from(read_length))?
        } else {
            Vec::new()
        };
        let lrc = self
            .transport
            .read_byte()?;

        self.status0 = status[0];
        self.status1 = status[1];
        trace!(
            "Response status=0x{:02X},0x{:02X} payload={} bytes lrc=0x{lrc:02X}",
            self.status0,
            self.status1,
            payload.len()
        );

        Ok(Response {
            status0: status[0],
            status1: status[1],
            data: payload,
            lrc,
        })
    }

    /// Discard bytes until the response sync byte arrives.
    fn wait_for_sync(&mut self) -> Result<()> {
        let mut skipped = 0usize;
        loop {
            match self
                .transport
                .read_byte()
            {
                Ok(RESPONSE_SYNC) => break,
                Ok(b) => {
                    trace!("Skipping 0x{b:02X} while waiting for response");
                    skipped += 1;
                },
                Err(e) => {
                    return Err(Error::Timeout(format!(
                        "no response from {} ({e})",
                        self.transport
                            .name()
                    )));
                },
            }
        }
        if skipped > 0 {
            debug!("Discarded {skipped} bytes before response sync");
        }
        Ok(())
    }

    /// Halt the target and enter debug mode.
    pub fn enter_debug(&mut self) -> Result<()> {
        debug!("Entering debug mode");
        self.transfer(Command::EnterDebug, 0, None, 0)?;
        Ok(())
    }

    /// Leave debug mode. The target resets.
    pub fn exit_debug(&mut self) -> Result<()> {
        debug!("Leaving debug mode");
        self.transfer(Command::ExitDebug, 0, None, 0)?;
        Ok(())
    }

    /// Write `data` to target memory at `address`.
    pub fn write_block(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.transfer(Command::WriteMem, address, Some(data), 0)?;
        Ok(())
    }

    /// Read `length` bytes of target memory starting at `address`.
    pub fn read_block(&mut self, address: u32, length: u16) -> Result<Vec<u8>> {
        Ok(self
            .transfer(Command::ReadMem, address, None, length)?
            .data)
    }

    /// Read the 24-bit little-endian pointer stored at `address`.
    pub fn read_pointer(&mut self, address: u32) -> Result<u32> {
        let data = self.read_block(address, 3)?;
        Ok(LittleEndian::read_u24(&data))
    }

    /// Get the debug interface revision code.
    pub fn revision(&mut self) -> Result<u8> {
        Ok(self
            .transfer(Command::Revision, 0, None, 0)?
            .status1)
    }

    /// Erase the whole flash.
    pub fn erase_flash(&mut self) -> Result<()> {
        info!("Erasing flash");
        self.transfer(Command::EraseFlash, 0, None, 0)?;
        Ok(())
    }

    /// Erase an 8 KiB sector.
    ///
    /// The hardware erases 4 KiB blocks, so this issues two erases (blocks
    /// `2 * sector` and `2 * sector + 1`), each followed by the settling delay.
    pub fn erase_sector(&mut self, sector: u8) -> Result<()> {
        let block = sector_block(sector)?;
        info!("Erasing flash sector 0x{sector:02X}");

        for block in [block, block + 1] {
            self.transfer(Command::EraseSector, block << 16, None, 0)?;
            thread::sleep(self.delays.erase_sector);
        }
        Ok(())
    }

    /// Program an 8 KiB sector from the data staged at
    /// [`SECTOR_STAGING_ADDRESS`].
    pub fn program_sector(&mut self, sector: u8) -> Result<()> {
        let block = sector_block(sector)?;
        info!("Programming flash sector 0x{sector:02X}");

        self.transfer(Command::ProgramSector, block << 16, None, 0)?;
        thread::sleep(self.delays.program_sector);
        Ok(())
    }

    /// Program the whole flash from the image already in RAM at `address`.
    pub fn program_flash(&mut self, address: u32) -> Result<()> {
        info!("Programming flash from 0x{address:06X}");
        self.transfer(Command::ProgramFlash, address, None, 0)?;
        Ok(())
    }

    /// Select where the target boots from.
    pub fn set_boot_source(&mut self, source: BootSource) -> Result<()> {
        let command = match source {
            BootSource::Ram => Command::BootRam,
            BootSource::Flash => Command::BootFlash,
        };
        self.transfer(command, 0, None, 0)?;
        Ok(())
    }
}

impl<T: Transport> Drop for DebugPort<T> {
    fn drop(&mut self) {
        if self
            .transport
            .is_open()
        {
            let _ = self
                .transport
                .close();
        }
    }
}

/// First 4 KiB block of a logical sector.
fn sector_block(sector: u8) -> Result<u32> {
    if sector > MAX_SECTOR {
        return Err(Error::Protocol(format!(
            "sector 0x{sector:02X} out of range (max 0x{MAX_SECTOR:02X})"
        )));
    }
    Ok(u32::from(sector) * 2)
}
