//! Flash programming and boot source command implementations.

use {
    crate::{CliError, Cli, config::Config, confirmer, open_port, progress_bar, report_done},
    anyhow::{Context, Result},
    console::style,
    foenixmgr::{BootSource, Manifest, program, protocol::SECTOR_SIZE},
    std::{fs, path::Path},
};

/// Flash command implementation.
///
/// Without `sector` the whole flash is reprogrammed and the image must match
/// the configured flash size; with it only that 8 KiB sector is.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &Config,
    file: &Path,
    address: Option<u32>,
    sector: Option<u8>,
) -> Result<()> {
    let options = config.program_options();
    let data = fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;

    // Reject bad images before the port is opened.
    if let Some(sector) = sector {
        if data.is_empty() || data.len() > SECTOR_SIZE {
            return Err(foenixmgr::Error::Format(format!(
                "{} is {} bytes, a sector image must be 1 to {SECTOR_SIZE} bytes",
                file.display(),
                data.len()
            ))
            .into());
        }

        if !cli.quiet {
            eprintln!(
                "{} Programming sector 0x{sector:02X} from {}",
                style("⚡").yellow(),
                file.display()
            );
        }
        let port = open_port(cli, config)?;
        let pb = progress_bar(cli, data.len() as u64);
        program::program_sector(port, &data, sector, &options, confirmer(cli), &mut |n| {
            pb.inc(n as u64);
        })?;
        pb.finish_and_clear();

        report_done(cli, &format!("Sector 0x{sector:02X} programmed"));
        return Ok(());
    }

    if data.len() != options.flash_size {
        return Err(foenixmgr::Error::Format(format!(
            "{} is {} bytes, the flash is {} bytes",
            file.display(),
            data.len(),
            options.flash_size
        ))
        .into());
    }
    let address = match address {
        Some(address) => address,
        None => config
            .flash_address()?
            .ok_or_else(|| {
                CliError::Usage(
                    "no staging address; pass --address or set [flash] address".to_string(),
                )
            })?,
    };

    if !cli.quiet {
        eprintln!(
            "{} Programming flash from {} via 0x{address:06X}",
            style("⚡").yellow(),
            file.display()
        );
    }
    let port = open_port(cli, config)?;
    let pb = progress_bar(cli, data.len() as u64);
    program::program_flash(port, &data, address, &options, confirmer(cli), &mut |n| {
        pb.inc(n as u64);
    })?;
    pb.finish_and_clear();

    report_done(cli, "Flash programmed");
    Ok(())
}

/// Flash-bulk command implementation.
pub(crate) fn cmd_flash_bulk(cli: &Cli, config: &Config, manifest: &Path) -> Result<()> {
    let manifest = Manifest::from_file(manifest)?;

    if !cli.quiet {
        for entry in manifest.entries() {
            eprintln!(
                "    {} sector 0x{:02X} <- {}",
                style("•").dim(),
                entry.sector,
                entry.path.display()
            );
        }
    }

    let total: u64 = manifest
        .entries()
        .iter()
        .filter_map(|entry| fs::metadata(&entry.path).ok())
        .map(|meta| meta.len())
        .sum();

    let port = open_port(cli, config)?;
    let pb = progress_bar(cli, total);
    program::program_bulk(
        port,
        &manifest,
        &config.program_options(),
        confirmer(cli),
        &mut |n| pb.inc(n as u64),
    )?;
    pb.finish_and_clear();

    report_done(cli, &format!("{} sectors programmed", manifest.len()));
    Ok(())
}

/// Boot command implementation.
pub(crate) fn cmd_boot(cli: &Cli, config: &Config, source: BootSource) -> Result<()> {
    let port = open_port(cli, config)?;
    port.session(|port| port.set_boot_source(source))
        .context("failed to set the boot source")?;

    let name = match source {
        BootSource::Ram => "RAM",
        BootSource::Flash => "flash",
    };
    report_done(cli, &format!("Target boots from {name}"));
    Ok(())
}
