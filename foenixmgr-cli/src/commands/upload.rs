//! Upload command implementations.

use {
    crate::{Cli, CliError, config::Config, open_port, progress_bar, report_done, target_cpu},
    anyhow::{Context, Result},
    console::style,
    foenixmgr::{Block, Image, ImageFormat, program},
    std::{fs, path::Path},
};

/// Upload an image file into target memory.
///
/// The whole file is decoded before the port is opened, so a malformed image
/// never leaves a partial upload behind.
pub(crate) fn cmd_upload(
    cli: &Cli,
    config: &Config,
    file: &Path,
    format: Option<ImageFormat>,
) -> Result<()> {
    let format = match format {
        Some(format) => format,
        None => ImageFormat::from_path(file)?,
    };
    let cpu = target_cpu(cli, config)?;

    if !cli.quiet {
        eprintln!(
            "{} Loading {} ({format})",
            style("📦").cyan(),
            file.display()
        );
    }

    let image = Image::from_file(file, format, cpu)
        .with_context(|| format!("failed to load {}", file.display()))?;
    let blocks: Vec<Block> = image
        .blocks()
        .collect::<foenixmgr::Result<_>>()
        .with_context(|| format!("failed to decode {}", file.display()))?;
    let total: usize = blocks
        .iter()
        .map(Block::len)
        .sum();

    let port = open_port(cli, config)?;
    let chunk_size = config
        .program_options()
        .chunk_size;

    let pb = progress_bar(cli, total as u64);
    pb.set_message(format.to_string());
    let stats = port.session(|port| {
        program::upload_blocks(port, blocks.into_iter().map(Ok), chunk_size, &mut |n| {
            pb.inc(n as u64);
        })
    })?;
    pb.finish_and_clear();

    report_done(
        cli,
        &format!("Uploaded {} blocks ({} bytes)", stats.blocks, stats.bytes),
    );
    Ok(())
}

/// Write a raw binary file to `address`, or to the configured
/// `[flash] address` when none is given.
pub(crate) fn cmd_binary(
    cli: &Cli,
    config: &Config,
    file: &Path,
    address: Option<u32>,
) -> Result<()> {
    let address = match address {
        Some(address) => address,
        None => config
            .flash_address()?
            .ok_or_else(|| {
                CliError::Usage(
                    "no load address; pass --address or set [flash] address".to_string(),
                )
            })?,
    };
    let data = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    let port = open_port(cli, config)?;
    let chunk_size = config
        .program_options()
        .chunk_size;

    let pb = progress_bar(cli, data.len() as u64);
    let written = port.session(|port| {
        program::upload_binary(port, &data, address, chunk_size, &mut |n| {
            pb.inc(n as u64);
        })
    })?;
    pb.finish_and_clear();

    report_done(
        cli,
        &format!("Wrote {written} bytes to 0x{address:06X}"),
    );
    Ok(())
}
