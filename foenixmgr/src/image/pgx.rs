//! PGX executable decoder.
//!
//! ```text
//! Offset  Size  Field
//! 0       3     "PGX"
//! 3       1     version (high nibble, 0) | CPU (low nibble)
//! 4       4     load and start address (LE)
//! 8       ...   data
//! ```

use {
    crate::{
        error::{Error, Result},
        image::{Block, Cpu, reset_vector_blocks},
    },
    byteorder::{ByteOrder, LittleEndian},
    log::debug,
    std::{fs, path::Path},
};

/// PGX signature.
pub const PGX_SIGNATURE: &[u8; 3] = b"PGX";

/// Size of the PGX header.
pub const PGX_HEADER_LEN: usize = 8;

/// CPU nibble of a 65816 program.
pub const PGX_CPU_65816: u8 = 1;
/// CPU nibble of a 680x0 program.
pub const PGX_CPU_680X0: u8 = 2;
/// CPU nibble of a 65C02 program.
pub const PGX_CPU_65C02: u8 = 3;

/// A PGX executable.
#[derive(Debug, Clone)]
pub struct Pgx {
    data: Vec<u8>,
    address: u32,
    cpu: Cpu,
}

impl Pgx {
    /// Read a file from disk.
    pub fn from_file(path: impl AsRef<Path>, cpu: Cpu) -> Result<Self> {
        Self::from_bytes(fs::read(path)?, cpu)
    }

    /// Wrap the bytes of a PGX file.
    ///
    /// The header is validated here: a bad signature, an unknown version or a
    /// program built for a CPU other than `cpu` is rejected.
    pub fn from_bytes(data: Vec<u8>, cpu: Cpu) -> Result<Self> {
        if data.len() < PGX_HEADER_LEN {
            return Err(Error::Format(format!(
                "PGX file too short: {} bytes",
                data.len()
            )));
        }
        if &data[0..3] != PGX_SIGNATURE {
            return Err(Error::Format(format!(
                "bad PGX signature {:02X?}",
                &data[0..3]
            )));
        }

        let version = data[3] >> 4;
        if version != 0 {
            return Err(Error::Format(format!("unsupported PGX version {version}")));
        }

        let built_for = match data[3] & 0x0F {
            PGX_CPU_65816 => Cpu::W65816,
            PGX_CPU_65C02 => Cpu::W65C02,
            PGX_CPU_680X0 => {
                return Err(Error::Format("680x0 PGX files are not supported".into()));
            },
            other => return Err(Error::Format(format!("unknown PGX CPU code {other}"))),
        };
        if built_for != cpu {
            return Err(Error::Format(format!(
                "PGX is built for the {built_for}, target is a {cpu}"
            )));
        }

        let address = LittleEndian::read_u32(&data[4..8]);
        debug!(
            "PGX for {built_for}: {} bytes at 0x{address:06X}",
            data.len() - PGX_HEADER_LEN
        );

        Ok(Self { data, address, cpu })
    }

    /// Load and start address.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Program bytes following the header.
    pub fn payload(&self) -> &[u8] {
        &self.data[PGX_HEADER_LEN..]
    }

    /// The program block followed by the reset-vector blocks.
    pub fn blocks(&self) -> impl Iterator<Item = Result<Block>> + '_ {
        let payload = self.payload();
        let program = (!payload.is_empty()).then(|| Block::new(self.address, payload));

        program
            .into_iter()
            .chain(reset_vector_blocks(self.cpu, self.address))
            .map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pgx(cpu_nibble: u8, address: u32, data: &[u8]) -> Vec<u8> {
        let mut bytes = b"PGX".to_vec();
        bytes.push(cpu_nibble);
        bytes.extend_from_slice(&address.to_le_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_program_block_then_vector() {
        let image =
            Pgx::from_bytes(pgx(0x01, 0x00_2000, &[0xAA, 0xBB, 0xCC]), Cpu::W65816).unwrap();
        assert_eq!(image.address(), 0x2000);

        let blocks: Vec<Block> = image
            .blocks()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::new(0x00_2000, [0xAA, 0xBB, 0xCC]),
                Block::new(0xFFFC, [0x00, 0x20]),
            ]
        );
    }

    #[test]
    fn test_65816_high_bank_gets_trampoline() {
        let image = Pgx::from_bytes(pgx(0x01, 0x01_0000, &[0xEA]), Cpu::W65816).unwrap();
        let blocks: Vec<Block> = image
            .blocks()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(
            blocks,
            vec![
                Block::new(0x01_0000, [0xEA]),
                Block::new(0xFF80, [0x18, 0xFB, 0x5C, 0x00, 0x00, 0x01]),
                Block::new(0xFFFC, [0x80, 0xFF]),
            ]
        );
    }

    #[test]
    fn test_65c02() {
        let image = Pgx::from_bytes(pgx(0x03, 0x00_0800, &[0x60]), Cpu::W65C02).unwrap();
        assert_eq!(image.blocks().count(), 2);
    }

    #[test]
    fn test_cpu_mismatch_rejected_up_front() {
        assert!(matches!(
            Pgx::from_bytes(pgx(0x03, 0x2000, &[0xAA]), Cpu::W65816),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            Pgx::from_bytes(pgx(0x01, 0x2000, &[0xAA]), Cpu::W65C02),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_unsupported_cpus() {
        assert!(Pgx::from_bytes(pgx(0x02, 0x2000, &[]), Cpu::W65816).is_err());
        assert!(Pgx::from_bytes(pgx(0x07, 0x2000, &[]), Cpu::W65816).is_err());
    }

    #[test]
    fn test_bad_header() {
        assert!(Pgx::from_bytes(b"PGX\x01".to_vec(), Cpu::W65816).is_err());

        let mut bad_sig = pgx(0x01, 0x2000, &[0xAA]);
        bad_sig[2] = b'Z';
        assert!(Pgx::from_bytes(bad_sig, Cpu::W65816).is_err());

        assert!(Pgx::from_bytes(pgx(0x11, 0x2000, &[0xAA]), Cpu::W65816).is_err());
    }

    #[test]
    fn test_empty_payload_only_sets_vector() {
        let image = Pgx::from_bytes(pgx(0x01, 0x2000, &[]), Cpu::W65816).unwrap();
        let blocks: Vec<Block> = image
            .blocks()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(blocks, vec![Block::new(0xFFFC, [0x00, 0x20])]);
    }
}
