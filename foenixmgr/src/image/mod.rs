//! Firmware image decoders.
//!
//! Every supported encoding is turned into a sequence of [`Block`]s, each a
//! run of bytes to be written at a target address:
//!
//! | Format        | Type          | Encoding                                    |
//! |---------------|---------------|---------------------------------------------|
//! | Intel HEX     | [`IntelHex`]  | text, `:`-records with segment/linear bases |
//! | Motorola SREC | [`SRecord`]   | text, `S1`/`S2`/`S3` data records           |
//! | WDC binary    | [`WdcBinary`] | `Z`, then address/length/data blocks        |
//! | PGZ           | [`Pgz`]       | `Z`/`z`, then address/length/data blocks    |
//! | PGX           | [`Pgx`]       | fixed header, single block                  |
//!
//! Decoders hold the whole file in memory and expose `blocks()`, a lazy
//! iterator that decodes one record at a time and stops at the first error.

pub mod ihex;
pub mod pgx;
pub mod pgz;
pub mod srec;
pub mod wdc;

use {
    crate::error::{Error, Result},
    byteorder::{ByteOrder, LittleEndian},
    std::{collections::VecDeque, fmt, fs, path::Path, str::FromStr},
};

pub use {ihex::IntelHex, pgx::Pgx, pgz::Pgz, srec::SRecord, wdc::WdcBinary};

/// A run of bytes destined for a target address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Target address of the first byte.
    pub address: u32,
    /// Bytes to write.
    pub data: Vec<u8>,
}

impl Block {
    /// Create a new block.
    pub fn new(address: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            data: data.into(),
        }
    }

    /// Number of bytes in the block.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the block carries no data.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}

/// Target CPU, used to validate PGX files and to synthesize reset vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cpu {
    /// WDC 65C816 (C256 machines).
    #[default]
    W65816,
    /// WDC 65C02 (F256 machines).
    W65C02,
}

impl FromStr for Cpu {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "65816" => Ok(Self::W65816),
            "65c02" | "65C02" => Ok(Self::W65C02),
            other => Err(Error::Config(format!(
                "unsupported CPU '{other}' (expected 65816 or 65C02)"
            ))),
        }
    }
}

impl fmt::Display for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::W65816 => write!(f, "65816"),
            Self::W65C02 => write!(f, "65C02"),
        }
    }
}

/// Address of the 65816 native-mode trampoline.
pub const TRAMPOLINE_ADDRESS: u32 = 0xFF80;

/// Address of the 6502-family reset vector.
pub const RESET_VECTOR_ADDRESS: u32 = 0xFFFC;

/// Blocks that make the target start at `start` after reset.
///
/// A 65816 program outside bank 0 cannot be reached from the 16-bit reset
/// vector, so a stub at [`TRAMPOLINE_ADDRESS`] switches to native mode and
/// long-jumps there (`CLC; XCE; JML start`), and the vector points at the stub.
pub fn reset_vector_blocks(cpu: Cpu, start: u32) -> Vec<Block> {
    let [lo, mid, hi, _] = start.to_le_bytes();

    match cpu {
        Cpu::W65816 if start & 0xFF_0000 != 0 => vec![
            Block::new(TRAMPOLINE_ADDRESS, [0x18, 0xFB, 0x5C, lo, mid, hi]),
            Block::new(RESET_VECTOR_ADDRESS, [0x80, 0xFF]),
        ],
        _ => vec![Block::new(RESET_VECTOR_ADDRESS, [lo, mid])],
    }
}

/// Supported image encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Intel HEX.
    IntelHex,
    /// Motorola S-record.
    SRecord,
    /// WDC linker binary.
    Wdc,
    /// PGZ executable.
    Pgz,
    /// PGX executable.
    Pgx,
}

impl ImageFormat {
    /// Guess the format from a file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "hex" | "ihex" => Ok(Self::IntelHex),
            "srec" | "s19" | "s28" | "s37" | "mot" => Ok(Self::SRecord),
            "bin" | "wdc" => Ok(Self::Wdc),
            "pgz" => Ok(Self::Pgz),
            "pgx" => Ok(Self::Pgx),
            _ => Err(Error::Format(format!(
                "cannot tell the image format of {} from its extension",
                path.display()
            ))),
        }
    }
}

impl FromStr for ImageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "hex" | "ihex" => Ok(Self::IntelHex),
            "srec" => Ok(Self::SRecord),
            "wdc" => Ok(Self::Wdc),
            "pgz" => Ok(Self::Pgz),
            "pgx" => Ok(Self::Pgx),
            other => Err(Error::Config(format!("unknown image format '{other}'"))),
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IntelHex => "hex",
            Self::SRecord => "srec",
            Self::Wdc => "wdc",
            Self::Pgz => "pgz",
            Self::Pgx => "pgx",
        };
        f.write_str(name)
    }
}

/// A decoded image of any supported format.
#[derive(Debug, Clone)]
pub enum Image {
    /// Intel HEX image.
    IntelHex(IntelHex),
    /// Motorola S-record image.
    SRecord(SRecord),
    /// WDC linker binary.
    Wdc(WdcBinary),
    /// PGZ executable.
    Pgz(Pgz),
    /// PGX executable.
    Pgx(Pgx),
}

impl Image {
    /// Load an image from a file.
    ///
    /// Headers are validated here, so a bad signature or a CPU mismatch is
    /// reported before anything is sent to the target.
    pub fn from_file(path: impl AsRef<Path>, format: ImageFormat, cpu: Cpu) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        Self::from_bytes(data, format, cpu)
            .map_err(|e| match e {
                Error::Format(msg) => Error::Format(format!("{}: {msg}", path.display())),
                other => other,
            })
    }

    /// Decode an image held in memory.
    pub fn from_bytes(data: Vec<u8>, format: ImageFormat, cpu: Cpu) -> Result<Self> {
        Ok(match format {
            ImageFormat::IntelHex => Self::IntelHex(IntelHex::from_text(into_text(data)?)),
            ImageFormat::SRecord => Self::SRecord(SRecord::from_text(into_text(data)?)),
            ImageFormat::Wdc => Self::Wdc(WdcBinary::from_bytes(data)?),
            ImageFormat::Pgz => Self::Pgz(Pgz::from_bytes(data, cpu)?),
            ImageFormat::Pgx => Self::Pgx(Pgx::from_bytes(data, cpu)?),
        })
    }

    /// Format of this image.
    pub fn format(&self) -> ImageFormat {
        match self {
            Self::IntelHex(_) => ImageFormat::IntelHex,
            Self::SRecord(_) => ImageFormat::SRecord,
            Self::Wdc(_) => ImageFormat::Wdc,
            Self::Pgz(_) => ImageFormat::Pgz,
            Self::Pgx(_) => ImageFormat::Pgx,
        }
    }

    /// Iterate over the image's blocks.
    pub fn blocks(&self) -> Box<dyn Iterator<Item = Result<Block>> + '_> {
        match self {
            Self::IntelHex(image) => Box::new(image.blocks()),
            Self::SRecord(image) => Box::new(image.blocks()),
            Self::Wdc(image) => Box::new(image.blocks()),
            Self::Pgz(image) => Box::new(image.blocks()),
            Self::Pgx(image) => Box::new(image.blocks()),
        }
    }
}

fn into_text(data: Vec<u8>) -> Result<String> {
    String::from_utf8(data).map_err(|e| Error::Format(format!("not a text file: {e}")))
}

/// One decoding step of a record-oriented format.
pub(crate) trait RecordSource {
    /// Decode the next record, pushing any blocks it yields onto `out`.
    ///
    /// Returns `false` once the end of the image has been reached.
    fn next_record(&mut self, out: &mut VecDeque<Block>) -> Result<bool>;
}

/// Lazy block iterator over a [`RecordSource`]. Fused after the end of the
/// image or the first error.
pub(crate) struct BlockStream<S> {
    source: S,
    pending: VecDeque<Block>,
    done: bool,
}

impl<S: RecordSource> BlockStream<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            source,
            pending: VecDeque::new(),
            done: false,
        }
    }
}

impl<S: RecordSource> Iterator for BlockStream<S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(block) = self
                .pending
                .pop_front()
            {
                return Some(Ok(block));
            }
            if self.done {
                return None;
            }
            match self
                .source
                .next_record(&mut self.pending)
            {
                Ok(true) => {},
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                },
            }
        }
    }
}

/// Bounds-checked reader over a binary image.
pub(crate) struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub(crate) fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Take the next `n` bytes.
    pub(crate) fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let start = self.pos;
        let end = start
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                Error::Format(format!(
                    "truncated {what} at offset {start}: need {n} bytes, {} left",
                    self.data.len().saturating_sub(start)
                ))
            })?;
        self.pos = end;
        Ok(&self.data[start..end])
    }

    /// Read an unsigned little-endian field of `width` bytes (at most 4).
    pub(crate) fn read_le(&mut self, width: usize, what: &str) -> Result<u32> {
        let bytes = self.take(width, what)?;
        Ok(LittleEndian::read_uint(bytes, width) as u32)
    }
}

/// Decode a string of hex digit pairs.
pub(crate) fn decode_hex(digits: &str) -> std::result::Result<Vec<u8>, String> {
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("non-hex character".into());
    }
    if digits.len() % 2 != 0 {
        return Err("odd number of hex digits".into());
    }
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).map_err(|e| e.to_string())?;
            u8::from_str_radix(pair, 16).map_err(|e| e.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_vector_65816_high_bank() {
        assert_eq!(
            reset_vector_blocks(Cpu::W65816, 0x12_3456),
            vec![
                Block::new(0xFF80, [0x18, 0xFB, 0x5C, 0x56, 0x34, 0x12]),
                Block::new(0xFFFC, [0x80, 0xFF]),
            ]
        );
    }

    #[test]
    fn test_reset_vector_65816_bank_zero() {
        assert_eq!(
            reset_vector_blocks(Cpu::W65816, 0x00_2000),
            vec![Block::new(0xFFFC, [0x00, 0x20])]
        );
    }

    #[test]
    fn test_reset_vector_65c02_ignores_bank() {
        assert_eq!(
            reset_vector_blocks(Cpu::W65C02, 0x01_E000),
            vec![Block::new(0xFFFC, [0x00, 0xE0])]
        );
    }

    #[test]
    fn test_cpu_parse() {
        assert_eq!("65816".parse::<Cpu>().unwrap(), Cpu::W65816);
        assert_eq!("65c02".parse::<Cpu>().unwrap(), Cpu::W65C02);
        assert_eq!("65C02".parse::<Cpu>().unwrap(), Cpu::W65C02);
        assert!(matches!("68000".parse::<Cpu>(), Err(Error::Config(_))));
        assert_eq!(Cpu::W65C02.to_string(), "65C02");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ImageFormat::from_path("kernel.hex").unwrap(), ImageFormat::IntelHex);
        assert_eq!(ImageFormat::from_path("a/b/rom.S28").unwrap(), ImageFormat::SRecord);
        assert_eq!(ImageFormat::from_path("basic.bin").unwrap(), ImageFormat::Wdc);
        assert_eq!(ImageFormat::from_path("game.pgz").unwrap(), ImageFormat::Pgz);
        assert_eq!(ImageFormat::from_path("hello.PGX").unwrap(), ImageFormat::Pgx);
        assert!(matches!(ImageFormat::from_path("notes.txt"), Err(Error::Format(_))));
        assert!(ImageFormat::from_path("noext").is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("SREC".parse::<ImageFormat>().unwrap(), ImageFormat::SRecord);
        assert!("elf".parse::<ImageFormat>().is_err());
    }

    #[test]
    fn test_decode_hex() {
        assert_eq!(decode_hex("00aBFf").unwrap(), vec![0x00, 0xAB, 0xFF]);
        assert!(decode_hex("ABC").is_err());
        assert!(decode_hex("+1").is_err());
        assert_eq!(decode_hex("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_cursor_truncation() {
        let data = [1, 2, 3];
        let mut cursor = ByteCursor::new(&data, 0);
        assert_eq!(cursor.read_le(2, "field").unwrap(), 0x0201);
        assert!(matches!(cursor.take(2, "field"), Err(Error::Format(_))));
        assert_eq!(cursor.take(1, "field").unwrap(), &[3]);
        assert!(cursor.at_end());
    }

    #[test]
    fn test_image_dispatch() {
        let image = Image::from_bytes(
            b"S1060010AABBCCxx\n".to_vec(),
            ImageFormat::SRecord,
            Cpu::default(),
        );
        // "xx" is not hex, but decoding is lazy.
        let image = image.unwrap();
        assert_eq!(image.format(), ImageFormat::SRecord);
        assert!(matches!(image.blocks().next(), Some(Err(Error::Format(_)))));
    }

    #[test]
    fn test_image_from_file_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pgz");
        std::fs::write(&path, b"Q").unwrap();

        let err = Image::from_file(&path, ImageFormat::Pgz, Cpu::W65816).unwrap_err();
        assert!(err.to_string().contains("bad.pgz"));
    }
}
