//! Debug-port frame format.
//!
//! ## Request
//!
//! ```text
//! +------+-----+-----------+--------+-----------+-----+
//! | Sync | CMD |  Address  | Length |  Payload  | LRC |
//! +------+-----+-----------+--------+-----------+-----+
//! |  1   |  1  | 3 (BE)    | 2 (BE) |  Length   |  1  |
//! +------+-----+-----------+--------+-----------+-----+
//! | 0x55 | cmd | addr      | len    | WRITE_MEM | xor |
//! +------+-----+-----------+--------+-----------+-----+
//! ```
//!
//! ## Response
//!
//! ```text
//! +------+---------+---------+-----------+-----+
//! | Sync | Status0 | Status1 |  Payload  | LRC |
//! +------+---------+---------+-----------+-----+
//! | 0xAA |    1    |    1    | READ_MEM  |  1  |
//! +------+---------+---------+-----------+-----+
//! ```
//!
//! Responses carry no length; the payload size is the length of the request
//! that produced them.

use {
    crate::error::{Error, Result},
    byteorder::{BigEndian, ByteOrder, WriteBytesExt},
};

/// First byte of every request.
pub const REQUEST_SYNC: u8 = 0x55;

/// First byte of every response.
pub const RESPONSE_SYNC: u8 = 0xAA;

/// Size of the request header (sync, command, address, length).
pub const HEADER_LEN: usize = 7;

/// Number of leading header bytes folded into the LRC.
///
/// The target firmware leaves the low length byte out of the checksum.
pub const LRC_HEADER_SPAN: usize = 6;

/// Largest address the 3-byte address field can carry.
pub const MAX_ADDRESS: u32 = 0x00FF_FFFF;

/// Largest payload the 2-byte length field can describe.
pub const MAX_LENGTH: usize = 0xFFFF;

/// Debug-port commands.
///
/// The numeric values are fixed by the target firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Read a block of memory.
    ReadMem = 0x00,
    /// Write a block of memory.
    WriteMem = 0x01,
    /// Program the whole flash from RAM.
    ProgramFlash = 0x10,
    /// Erase the whole flash.
    EraseFlash = 0x11,
    /// Erase one 4 KiB flash block.
    EraseSector = 0x12,
    /// Program one 8 KiB flash sector from the RAM staging window.
    ProgramSector = 0x13,
    /// Halt the CPU and take over the bus.
    EnterDebug = 0x80,
    /// Release the bus; resets the target.
    ExitDebug = 0x81,
    /// Boot from the RAM LUTs.
    BootRam = 0x90,
    /// Boot from the flash LUTs.
    BootFlash = 0x91,
    /// Query the debug interface revision.
    Revision = 0xFE,
}

impl Command {
    /// All commands, in wire-code order.
    pub const ALL: [Self; 11] = [
        Self::ReadMem,
        Self::WriteMem,
        Self::ProgramFlash,
        Self::EraseFlash,
        Self::EraseSector,
        Self::ProgramSector,
        Self::EnterDebug,
        Self::ExitDebug,
        Self::BootRam,
        Self::BootFlash,
        Self::Revision,
    ];

    /// Decode a wire command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cmd| *cmd as u8 == byte)
    }

    /// Whether requests with this command carry `length` payload bytes.
    pub fn carries_payload(self) -> bool {
        self == Self::WriteMem
    }

    /// Whether responses to this command carry `length` payload bytes.
    pub fn returns_payload(self) -> bool {
        self == Self::ReadMem
    }
}

/// Compute the LRC of a request.
///
/// `header` is the 7-byte request header; only its first
/// [`LRC_HEADER_SPAN`] bytes are included.
pub fn lrc(header: &[u8], payload: &[u8]) -> u8 {
    header
        .iter()
        .take(LRC_HEADER_SPAN)
        .chain(payload)
        .fold(0, |acc, b| acc ^ b)
}

/// Request frame builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    command: Command,
    address: u32,
    length: u16,
    payload: Vec<u8>,
}

impl RequestFrame {
    /// Create a request.
    ///
    /// A non-empty `payload` fixes the length field to its size; otherwise
    /// `read_length` goes in the length field and nothing follows the header.
    pub fn new(command: Command, address: u32, payload: &[u8], read_length: u16) -> Result<Self> {
        if address > MAX_ADDRESS {
            return Err(Error::Protocol(format!(
                "address 0x{address:X} does not fit in 24 bits"
            )));
        }

        let length = if payload.is_empty() {
            read_length
        } else {
            u16::try_from(payload.len()).map_err(|_| {
                Error::Protocol(format!(
                    "payload of {} bytes exceeds the {MAX_LENGTH}-byte frame limit",
                    payload.len()
                ))
            })?
        };

        Ok(Self {
            command,
            address,
            length,
            payload: payload.to_vec(),
        })
    }

    /// Get the command.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Get the address field.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Get the length field.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Get the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Build the complete frame data.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len() + 1);

        buf.push(REQUEST_SYNC);
        buf.push(self.command as u8);
        buf.write_u24::<BigEndian>(self.address)
            .unwrap();
        buf.write_u16::<BigEndian>(self.length)
            .unwrap();
        buf.extend_from_slice(&self.payload);

        let lrc = lrc(&buf[..HEADER_LEN], &self.payload);
        buf.push(lrc);

        buf
    }

    /// Parse a complete request frame.
    ///
    /// Used by tests and tools that sit on the wire; the LRC is checked.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + 1 {
            return Err(Error::Protocol(format!(
                "request frame too short ({} bytes)",
                data.len()
            )));
        }
        if data[0] != REQUEST_SYNC {
            return Err(Error::Protocol(format!(
                "bad request sync byte 0x{:02X}",
                data[0]
            )));
        }

        let command = Command::from_byte(data[1])
            .ok_or_else(|| Error::Protocol(format!("unknown command 0x{:02X}", data[1])))?;
        let address = BigEndian::read_u24(&data[2..5]);
        let length = BigEndian::read_u16(&data[5..7]);

        let payload_len = if command.carries_payload() {
            usize::from(length)
        } else {
            0
        };
        let expected = HEADER_LEN + payload_len + 1;
        if data.len() != expected {
            return Err(Error::Protocol(format!(
                "request frame is {} bytes, expected {expected}",
                data.len()
            )));
        }

        let payload = &data[HEADER_LEN..HEADER_LEN + payload_len];
        let received = data[expected - 1];
        let computed = lrc(&data[..HEADER_LEN], payload);
        if received != computed {
            return Err(Error::Protocol(format!(
                "LRC mismatch: expected 0x{computed:02X}, got 0x{received:02X}"
            )));
        }

        Ok(Self {
            command,
            address,
            length,
            payload: payload.to_vec(),
        })
    }
}

/// Parsed response frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// First status byte (command dependent).
    pub status0: u8,
    /// Second status byte (command dependent).
    pub status1: u8,
    /// Payload of a READ_MEM response.
    pub data: Vec<u8>,
    /// LRC byte as received. Not verified.
    pub lrc: u8,
}
