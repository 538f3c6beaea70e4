//! WDC linker binary decoder.
//!
//! ```text
//! 'Z'
//! [addr:3 LE][len:3 LE][data:len]   repeated
//! [0x000000]                        end of image
//! ```

use {
    crate::{
        error::{Error, Result},
        image::{Block, BlockStream, ByteCursor, RecordSource},
    },
    log::trace,
    std::{collections::VecDeque, fs, path::Path},
};

/// Signature byte of a WDC binary.
pub const WDC_SIGNATURE: u8 = b'Z';

const FIELD_WIDTH: usize = 3;

/// A binary produced by the WDC linker.
#[derive(Debug, Clone)]
pub struct WdcBinary {
    data: Vec<u8>,
}

impl WdcBinary {
    /// Read a file from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(fs::read(path)?)
    }

    /// Wrap the bytes of a WDC binary, checking the signature.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        match data.first() {
            Some(&WDC_SIGNATURE) => Ok(Self { data }),
            Some(b) => Err(Error::Format(format!(
                "bad WDC binary signature 0x{b:02X} (expected 'Z')"
            ))),
            None => Err(Error::Format("empty WDC binary".into())),
        }
    }

    /// Decode the blocks in file order.
    pub fn blocks(&self) -> impl Iterator<Item = Result<Block>> + '_ {
        BlockStream::new(Records {
            cursor: ByteCursor::new(&self.data, 1),
        })
    }
}

struct Records<'a> {
    cursor: ByteCursor<'a>,
}

impl RecordSource for Records<'_> {
    fn next_record(&mut self, out: &mut VecDeque<Block>) -> Result<bool> {
        if self
            .cursor
            .at_end()
        {
            return Ok(false);
        }

        let address = self
            .cursor
            .read_le(FIELD_WIDTH, "WDC block address")?;
        if address == 0 {
            return Ok(false);
        }
        let length = self
            .cursor
            .read_le(FIELD_WIDTH, "WDC block length")? as usize;
        let data = self
            .cursor
            .take(length, "WDC block data")?;

        trace!("WDC block: {length} bytes at 0x{address:06X}");
        if !data.is_empty() {
            out.push_back(Block::new(address, data));
        }
        Ok(true)
    }
}
