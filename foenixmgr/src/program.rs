//! Upload and flash programming sequences.
//!
//! Everything here runs on top of a [`DebugPort`]. The destructive sequences
//! ([`program_sector`], [`program_flash`], [`program_bulk`]) consume the port,
//! ask for confirmation before sending anything, and run inside a single debug
//! session. Within a session the data is always fully staged in RAM before the
//! erase starts, and the erase finishes before programming begins.

use {
    crate::{
        error::{Error, Result},
        image::Block,
        port::Transport,
        protocol::{
            DebugPort, SECTOR_SIZE, SECTOR_STAGING_ADDRESS, debug_port::MAX_SECTOR,
            frame::MAX_LENGTH,
        },
    },
    log::{debug, info},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Default size of a single write transfer.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Default flash capacity (512 KiB).
pub const DEFAULT_FLASH_SIZE: usize = 512 * 1024;

/// Tunables for uploads and flash programming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramOptions {
    /// Largest payload sent in one write transfer.
    pub chunk_size: usize,
    /// Exact size a whole-flash image must have.
    pub flash_size: usize,
}

impl Default for ProgramOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            flash_size: DEFAULT_FLASH_SIZE,
        }
    }
}

/// What an upload wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Number of image blocks written.
    pub blocks: usize,
    /// Number of bytes written.
    pub bytes: usize,
}

fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 || chunk_size > MAX_LENGTH {
        return Err(Error::Config(format!(
            "chunk size must be between 1 and {MAX_LENGTH}, got {chunk_size}"
        )));
    }
    Ok(())
}

/// Write every block of an image to target memory.
///
/// Blocks larger than `chunk_size` are split into consecutive writes.
/// `progress` is called with the number of bytes written after each transfer.
/// Decoding is lazy, so a malformed record stops the upload at that point.
pub fn upload_blocks<T, I, P>(
    port: &mut DebugPort<T>,
    blocks: I,
    chunk_size: usize,
    progress: &mut P,
) -> Result<UploadStats>
where
    T: Transport,
    I: IntoIterator<Item = Result<Block>>,
    P: FnMut(usize),
{
    check_chunk_size(chunk_size)?;
    let mut stats = UploadStats::default();

    for block in blocks {
        let block = block?;
        debug!("Writing {} bytes at 0x{:06X}", block.len(), block.address);
        write_chunked(port, block.address, &block.data, chunk_size, progress)?;
        stats.blocks += 1;
        stats.bytes += block.len();
    }

    info!("Uploaded {} blocks ({} bytes)", stats.blocks, stats.bytes);
    Ok(stats)
}

/// Write a raw binary to consecutive addresses starting at `address`.
pub fn upload_binary<T, P>(
    port: &mut DebugPort<T>,
    data: &[u8],
    address: u32,
    chunk_size: usize,
    progress: &mut P,
) -> Result<usize>
where
    T: Transport,
    P: FnMut(usize),
{
    check_chunk_size(chunk_size)?;
    write_chunked(port, address, data, chunk_size, progress)?;
    info!("Uploaded {} bytes to 0x{address:06X}", data.len());
    Ok(data.len())
}

fn write_chunked<T, P>(
    port: &mut DebugPort<T>,
    address: u32,
    data: &[u8],
    chunk_size: usize,
    progress: &mut P,
) -> Result<()>
where
    T: Transport,
    P: FnMut(usize),
{
    let mut current = address;
    for chunk in data.chunks(chunk_size) {
        port.write_block(current, chunk)?;
        progress(chunk.len());
        current += chunk.len() as u32;
    }
    Ok(())
}

fn check_sector(sector: u8) -> Result<()> {
    if sector > MAX_SECTOR {
        return Err(Error::Config(format!(
            "sector 0x{sector:02X} out of range (max 0x{MAX_SECTOR:02X})"
        )));
    }
    Ok(())
}

fn check_sector_image(data: &[u8], what: &str) -> Result<()> {
    if data.is_empty() || data.len() > SECTOR_SIZE {
        return Err(Error::Format(format!(
            "{what} is {} bytes, a sector image must be 1 to {SECTOR_SIZE} bytes",
            data.len()
        )));
    }
    Ok(())
}

fn stage_erase_program<T, P>(
    port: &mut DebugPort<T>,
    data: &[u8],
    sector: u8,
    chunk_size: usize,
    progress: &mut P,
) -> Result<()>
where
    T: Transport,
    P: FnMut(usize),
{
    upload_binary(port, data, SECTOR_STAGING_ADDRESS, chunk_size, progress)?;
    port.erase_sector(sector)?;
    port.program_sector(sector)
}

/// Program one 8 KiB flash sector.
///
/// The image is staged at [`SECTOR_STAGING_ADDRESS`], then the sector is
/// erased and programmed. `confirm` is asked before the first request; declining
/// returns [`Error::Aborted`] without touching the target.
pub fn program_sector<T, C, P>(
    port: DebugPort<T>,
    data: &[u8],
    sector: u8,
    options: &ProgramOptions,
    confirm: C,
    progress: &mut P,
) -> Result<()>
where
    T: Transport,
    C: FnOnce(&str) -> bool,
    P: FnMut(usize),
{
    check_sector(sector)?;
    check_sector_image(data, "image")?;
    check_chunk_size(options.chunk_size)?;

    if !confirm(&format!("Reprogram flash sector 0x{sector:02X}?")) {
        return Err(Error::Aborted("flash sector programming declined".into()));
    }

    port.session(|port| stage_erase_program(port, data, sector, options.chunk_size, progress))
}

/// Reprogram the whole flash.
///
/// The image must be exactly `options.flash_size` bytes; this is checked
/// before asking for confirmation. The image is staged at `address`, the
/// flash erased, then programmed from `address`.
pub fn program_flash<T, C, P>(
    port: DebugPort<T>,
    data: &[u8],
    address: u32,
    options: &ProgramOptions,
    confirm: C,
    progress: &mut P,
) -> Result<()>
where
    T: Transport,
    C: FnOnce(&str) -> bool,
    P: FnMut(usize),
{
    if data.len() != options.flash_size {
        return Err(Error::Format(format!(
            "flash image is {} bytes, the flash is {} bytes",
            data.len(),
            options.flash_size
        )));
    }
    check_chunk_size(options.chunk_size)?;

    if !confirm(&format!("Reprogram the flash from 0x{address:06X}?")) {
        return Err(Error::Aborted("flash programming declined".into()));
    }

    port.session(|port| {
        upload_binary(port, data, address, options.chunk_size, progress)?;
        port.erase_flash()?;
        port.program_flash(address)
    })
}

/// Program every sector listed in a manifest.
///
/// Confirmation is asked once for the whole batch. Each entry's file is read
/// when its turn comes; a missing or oversized file stops the batch there.
pub fn program_bulk<T, C, P>(
    port: DebugPort<T>,
    manifest: &Manifest,
    options: &ProgramOptions,
    confirm: C,
    progress: &mut P,
) -> Result<()>
where
    T: Transport,
    C: FnOnce(&str) -> bool,
    P: FnMut(usize),
{
    if manifest.is_empty() {
        return Err(Error::Config("manifest lists no sectors".into()));
    }
    check_chunk_size(options.chunk_size)?;

    if !confirm(&format!("Reprogram {} flash sectors?", manifest.len())) {
        return Err(Error::Aborted("bulk flash programming declined".into()));
    }

    port.session(|port| {
        for entry in manifest.entries() {
            info!(
                "Programming sector 0x{:02X} with {}",
                entry.sector,
                entry.path.display()
            );
            let data = fs::read(&entry.path).map_err(|e| {
                Error::Config(format!("cannot read {}: {e}", entry.path.display()))
            })?;
            check_sector_image(&data, &entry.path.display().to_string())?;
            stage_erase_program(port, &data, entry.sector, options.chunk_size, progress)?;
        }
        Ok(())
    })
}

/// One line of a bulk programming manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Flash sector to program.
    pub sector: u8,
    /// Image file for the sector.
    pub path: PathBuf,
}

/// Sector-to-file mapping for [`program_bulk`].
///
/// One `sector,path` pair per line, sector in hex with an optional `0x`.
/// Blank lines and lines starting with `#` are skipped. Either field may be
/// wrapped in single or double quotes; the path runs to the end of the line,
/// so a quoted path may contain commas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Load a manifest file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Parse manifest text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line_no = index + 1;

            let (sector, path) = line.split_once(',').ok_or_else(|| {
                Error::Config(format!("manifest line {line_no}: expected 'sector,path'"))
            })?;
            let sector = unquote(sector);
            let digits = sector
                .strip_prefix("0x")
                .or_else(|| sector.strip_prefix("0X"))
                .unwrap_or(sector);
            let sector = u8::from_str_radix(digits, 16).map_err(|e| {
                Error::Config(format!("manifest line {line_no}: bad sector '{sector}': {e}"))
            })?;
            check_sector(sector)
                .map_err(|e| Error::Config(format!("manifest line {line_no}: {e}")))?;

            let path = unquote(path);
            if path.is_empty() {
                return Err(Error::Config(format!("manifest line {line_no}: missing path")));
            }

            entries.push(ManifestEntry {
                sector,
                path: PathBuf::from(path),
            });
        }

        Ok(Self { entries })
    }

    /// Entries in file order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    /// Whether the manifest lists nothing.
    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }
}

/// Trim a manifest field and drop one pair of surrounding quotes.
fn unquote(field: &str) -> &str {
    let field = field.trim();
    ['"', '\'']
        .iter()
        .find_map(|&q| {
            field
                .strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
        })
        .unwrap_or(field)
        .trim()
}
