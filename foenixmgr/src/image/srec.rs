//! Motorola S-record decoder.
//!
//! Only the data records are used: `S1`, `S2` and `S3` carry 16, 24 and
//! 32-bit addresses. Header, count and start-address records are skipped.

use {
    crate::{
        error::{Error, Result},
        image::{Block, BlockStream, RecordSource, decode_hex},
    },
    byteorder::{BigEndian, ByteOrder},
    log::trace,
    std::{collections::VecDeque, fs, path::Path, str::Lines},
};

/// A Motorola S-record file.
#[derive(Debug, Clone)]
pub struct SRecord {
    text: String,
}

impl SRecord {
    /// Read a file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_text(fs::read_to_string(path)?))
    }

    /// Wrap the text of an S-record file.
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
        })
    }
}

struct Records<'a> {
    lines: Lines<'a>,
    line_no: usize,
}

impl Records<'_> {
    fn error(&self, msg: impl std::fmt::Display) -> Error {
        Error::Format(format!("S-record line {}: {msg}", self.line_no))
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

        let mut chars = line.chars();
        if chars.next() != Some('S') {
            return Err(self.error("record does not start with 'S'"));
        }
        let record_type = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .ok_or_else(|| self.error("missing record type"))?;

        let bytes = decode_hex(chars.as_str()).map_err(|e| self.error(e))?;
        let Some((&count, rest)) = bytes.split_first() else {
            return Err(self.error("missing byte count"));
        };
        if usize::from(count) != rest.len() {
            return Err(self.error(format!(
                "byte count says {count} but record holds {}",
                rest.len()
            )));
        }

        let address_width = match record_type {
            1 => 2,
            2 => 3,
            3 => 4,
            other => {
                trace!("Skipping S{other} record");
                return Ok(true);
            },
        };
        if rest.len() < address_width + 1 {
            return Err(self.error("record too short for its address"));
        }

        let address = BigEndian::read_uint(&rest[..address_width], address_width) as u32;
        let data = &rest[address_width..rest.len() - 1];
        trace!("S{record_type} data: {} bytes at 0x{address:06X}", data.len());
        if !data.is_empty() {
            out.push_back(Block::new(address, data));
        }

        Ok(true)
    }
}
