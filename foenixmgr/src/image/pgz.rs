//! PGZ executable decoder.
//!
//! A PGZ file starts with a tag selecting the width of every address and
//! length field: `Z` for 3 bytes, `z` for 4 bytes. Then come blocks:
//!
//! ```text
//! [addr][len][data:len]   data block
//! [addr][0]               start address, becomes reset-vector blocks
//! [0]                     end of file
//! ```
//!
//! All fields are little-endian.

use {
    crate::{
        error::{Error, Result},
        image::{Block, BlockStream, ByteCursor, Cpu, RecordSource, reset_vector_blocks},
    },
    log::{debug, trace},
    std::{collections::VecDeque, fs, path::Path},
};

/// Tag of a PGZ file with 24-bit fields.
pub const PGZ_TAG_24: u8 = b'Z';

/// Tag of a PGZ file with 32-bit fields.
pub const PGZ_TAG_32: u8 = b'z';

/// A PGZ executable.
#[derive(Debug, Clone)]
pub struct Pgz {
    data: Vec<u8>,
    field_width: usize,
    cpu: Cpu,
}

impl Pgz {
    /// Read a file from disk.
    pub fn from_file(path: impl AsRef<Path>, cpu: Cpu) -> Result<Self> {
        Self::from_bytes(fs::read(path)?, cpu)
    }

    /// Wrap the bytes of a PGZ file, checking the tag.
    ///
    /// `cpu` selects how a start-address block is turned into a reset vector.
    pub fn from_bytes(data: Vec<u8>, cpu: Cpu) -> Result<Self> {
        let field_width = match data.first() {
            Some(&PGZ_TAG_24) => 3,
            Some(&PGZ_TAG_32) => 4,
            Some(b) => {
                return Err(Error::Format(format!(
                    "bad PGZ tag 0x{b:02X} (expected 'Z' or 'z')"
                )));
            },
            None => return Err(Error::Format("empty PGZ file".into())),
        };

        Ok(Self {
            data,
            field_width,
            cpu,
        })
    }

    /// Width in bytes of the address and length fields.
    pub fn field_width(&self) -> usize {
        self.field_width
    }

    /// Decode the blocks in file order.
    pub fn blocks(&self) -> impl Iterator<Item = Result<Block>> + '_ {
        BlockStream::new(Records {
            cursor: ByteCursor::new(&self.data, 1),
            width: self.field_width,
            cpu: self.cpu,
        })
    }
}

struct Records<'a> {
    cursor: ByteCursor<'a>,
    width: usize,
    cpu: Cpu,
}

impl RecordSource for Records<'_> {
    fn next_record(&mut self, out: &mut VecDeque<Block>) -> Result<bool> {
        if self
            .cursor
            .at_end()
        {
            return Ok(false);
        }

        // A zero address ends the file whether or not a length follows.
        let address = self
            .cursor
            .read_le(self.width, "PGZ block address")?;
        if address == 0 {
            return Ok(false);
        }

        let length = self
            .cursor
            .read_le(self.width, "PGZ block length")? as usize;
        if length == 0 {
            debug!("PGZ start address 0x{address:06X}");
            out.extend(reset_vector_blocks(self.cpu, address));
            return Ok(true);
        }

        let data = self
            .cursor
            .take(length, "PGZ block data")?;
        trace!("PGZ block: {length} bytes at 0x{address:06X}");
        out.push_back(Block::new(address, data));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8], cpu: Cpu) -> Result<Vec<Block>> {
        Pgz::from_bytes(data.to_vec(), cpu)?
            .blocks()
            .collect()
    }

    #[test]
    fn test_24_bit_fields() {
        let data = [
            b'Z', //
            0x00, 0x20, 0x00, 0x03, 0x00, 0x00, 0xAA, 0xBB, 0xCC, //
            0x00, 0x20, 0x00, 0x00, 0x00, 0x00,
        ];
        let pgz = Pgz::from_bytes(data.to_vec(), Cpu::W65816).unwrap();
        assert_eq!(pgz.field_width(), 3);
        assert_eq!(
            decode(&data, Cpu::W65816).unwrap(),
            vec![
                Block::new(0x2000, [0xAA, 0xBB, 0xCC]),
                Block::new(0xFFFC, [0x00, 0x20]),
            ]
        );
    }

    #[test]
    fn test_32_bit_fields() {
        let data = [
            b'z', //
            0x00, 0x10, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x11, 0x22,
        ];
        assert_eq!(Pgz::from_bytes(data.to_vec(), Cpu::W65C02).unwrap().field_width(), 4);
        assert_eq!(
            decode(&data, Cpu::W65C02).unwrap(),
            vec![Block::new(0x01_1000, [0x11, 0x22])]
        );
    }

    #[test]
    fn test_start_record_high_bank_65816() {
        let data = [b'Z', 0x56, 0x34, 0x12, 0x00, 0x00, 0x00];
        assert_eq!(
            decode(&data, Cpu::W65816).unwrap(),
            vec![
                Block::new(0xFF80, [0x18, 0xFB, 0x5C, 0x56, 0x34, 0x12]),
                Block::new(0xFFFC, [0x80, 0xFF]),
            ]
        );
    }

    #[test]
    fn test_start_record_high_bank_65c02() {
        let data = [b'Z', 0x56, 0x34, 0x12, 0x00, 0x00, 0x00];
        assert_eq!(
            decode(&data, Cpu::W65C02).unwrap(),
            vec![Block::new(0xFFFC, [0x56, 0x34])]
        );
    }

    #[test]
    fn test_zero_address_ends_before_length_is_read() {
        // Terminator with no length field, followed by junk that must not be
        // decoded.
        let data = [
            b'Z', //
            0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x42, //
            0x00, 0x00, 0x00, //
            0xFF, 0xFF,
        ];
        assert_eq!(
            decode(&data, Cpu::W65816).unwrap(),
            vec![Block::new(0x1000, [0x42])]
        );
    }

    #[test]
    fn test_zero_address_with_zero_length_is_end_not_start_record() {
        let data = [b'Z', 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert!(decode(&data, Cpu::W65816).unwrap().is_empty());
    }

    #[test]
    fn test_bad_tag() {
        assert!(matches!(
            Pgz::from_bytes(vec![b'P', b'G', b'X'], Cpu::W65816),
            Err(Error::Format(_))
        ));
        assert!(matches!(Pgz::from_bytes(Vec::new(), Cpu::W65816), Err(Error::Format(_))));
    }

    #[test]
    fn test_truncated() {
        assert!(matches!(decode(&[b'Z', 0x00, 0x10], Cpu::W65816), Err(Error::Format(_))));
        assert!(matches!(
            decode(&[b'Z', 0x00, 0x10, 0x00, 0x05, 0x00], Cpu::W65816),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            decode(&[b'Z', 0x00, 0x10, 0x00, 0x05, 0x00, 0x00, 0x01], Cpu::W65816),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_blocks_are_lazy() {
        // The first block is produced before the truncated second one is seen.
        let data = [b'Z', 0x00, 0x10, 0x00, 0x01, 0x00, 0x00, 0x42, 0x00, 0x20];
        let pgz = Pgz::from_bytes(data.to_vec(), Cpu::W65816).unwrap();
        let mut blocks = pgz.blocks();
        assert_eq!(blocks.next().unwrap().unwrap(), Block::new(0x1000, [0x42]));
        assert!(blocks.next().unwrap().is_err());
        assert!(blocks.next().is_none());
    }
}
