//! Intel HEX decoder.
//!
//! Record layout (hex digits after the colon):
//!
//! ```text
//! :LLAAAATTDD...DDCC
//!  |  |   | |      +-- checksum
//!  |  |   | +--------- LL data bytes
//!  |  |   +----------- record type
//!  |  +--------------- 16-bit offset (big-endian)
//!  +------------------ data byte count
//! ```
//!
//! Type 00 emits data at `base + offset`, 02 sets `base = value << 4`, 04 sets
//! `base = value << 16` and 01 ends the file. Other record types are skipped.
//! The record checksum is not checked.

use {
    crate::{
        error::{Error, Result},
        image::{Block, BlockStream, RecordSource, decode_hex},
    },
    byteorder::{BigEndian, ByteOrder},
    log::trace,
    std::{collections::VecDeque, fs, path::Path, str::Lines},
};

const DATA: u8 = 0x00;
const END_OF_FILE: u8 = 0x01;
const EXTENDED_SEGMENT_ADDRESS: u8 = 0x02;
const EXTENDED_LINEAR_ADDRESS: u8 = 0x04;

/// An Intel HEX file.
#[derive(Debug, Clone)]
pub struct IntelHex {
    text: String,
}

impl IntelHex {
    /// Read a file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_text(fs::read_to_string(path)?))
    }

    /// Wrap the text of a HEX file.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Decode the data records in file order.
    pub fn blocks(&self) -> impl Iterator<Item = Result<Block>> + '_ {
        BlockStream::new(Records {
            lines: self
                .text
                .lines(),
            line_no: 0,
            base: 0,
        })
    }
}

struct Records<'a> {
    lines: Lines<'a>,
    line_no: usize,
    base: u32,
}

impl Records<'_> {
    fn error(&self, msg: impl std::fmt::Display) -> Error {
        Error::Format(format!("Intel HEX line {}: {msg}", self.line_no))
    }
}

impl RecordSource for Records<'_> {
    fn next_record(&mut self, out: &mut VecDeque<Block>) -> Result<bool> {
        let line = loop {
            let Some(line) = self
                .lines
                .next()
            else {
                return Ok(false);
            };
            self.line_no += 1;
            let line = line.trim();
            if !line.is_empty() {
                break line;
            }
        };

        let digits = line
            .strip_prefix(':')
            .ok_or_else(|| self.error("record does not start with ':'"))?;
        let bytes = decode_hex(digits).map_err(|e| self.error(e))?;
        if bytes.len() < 5 {
            return Err(self.error("record too short"));
        }

        let count = usize::from(bytes[0]);
        let offset = u32::from(BigEndian::read_u16(&bytes[1..3]));
        let record_type = bytes[3];
        let data = &bytes[4..bytes.len() - 1];
        if data.len() != count {
            return Err(self.error(format!(
                "byte count says {count} but record holds {}",
                data.len()
            )));
        }

        match record_type {
            DATA => {
                let address = self.base + offset;
                trace!("HEX data: {count} bytes at 0x{address:06X}");
                if !data.is_empty() {
                    out.push_back(Block::new(address, data));
                }
            },
            END_OF_FILE => return Ok(false),
            EXTENDED_SEGMENT_ADDRESS | EXTENDED_LINEAR_ADDRESS => {
                if data.len() != 2 {
                    return Err(self.error("base address record must hold 2 bytes"));
                }
                let value = u32::from(BigEndian::read_u16(data));
                self.base = if record_type == EXTENDED_SEGMENT_ADDRESS {
                    value << 4
                } else {
                    value << 16
                };
                trace!("HEX base address 0x{:06X}", self.base);
            },
            other => trace!("Skipping HEX record type {other:02X}"),
        }

        Ok(true)
    }
}
