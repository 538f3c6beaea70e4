//! Memory inspection commands: revision, dump, lookup and deref.

use {
    crate::{Cli, config::Config, label_table, open_port},
    anyhow::{Context, Result},
    console::style,
    std::fmt::Write as _,
};

const BYTES_PER_LINE: usize = 16;

/// Format `data` as a hex dump starting at `base`.
///
/// Each line holds 16 bytes: the address, the bytes in two groups of eight,
/// then their ASCII rendering with `.` for anything unprintable.
pub(crate) fn hexdump(base: u32, data: &[u8]) -> String {
    let mut out = String::new();
    let mut address = base;

    for line in data.chunks(BYTES_PER_LINE) {
        let _ = write!(out, "{address:06X}: ");
        for (i, byte) in line
            .iter()
            .enumerate()
        {
            if i == BYTES_PER_LINE / 2 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02X}");
        }

        let text: String = line
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    char::from(b)
                } else {
                    '.'
                }
            })
            .collect();
        let _ = writeln!(out, " {text}");

        address = address.wrapping_add(BYTES_PER_LINE as u32);
    }

    out
}

/// Revision command implementation.
pub(crate) fn cmd_revision(cli: &Cli, config: &Config) -> Result<()> {
    let port = open_port(cli, config)?;
    let revision = port
        .session(|port| port.revision())
        .context("failed to read the debug port revision")?;
    println!("{revision:X}");
    Ok(())
}

fn read_and_print(cli: &Cli, config: &Config, address: u32, count: u16) -> Result<()> {
    let port = open_port(cli, config)?;
    let data = port
        .session(|port| port.read_block(address, count))
        .with_context(|| format!("failed to read memory at 0x{address:06X}"))?;
    print!("{}", hexdump(address, &data));
    Ok(())
}

/// Dump command implementation.
pub(crate) fn cmd_dump(cli: &Cli, config: &Config, address: u32, count: u16) -> Result<()> {
    read_and_print(cli, config, address, count)
}

/// Lookup command implementation.
pub(crate) fn cmd_lookup(cli: &Cli, config: &Config, label: &str, count: u16) -> Result<()> {
    let address = label_table(cli, config)?.lookup(label)?;
    if !cli.quiet {
        eprintln!(
            "{} {} = 0x{address:06X}",
            style("ℹ").blue(),
            style(label).cyan()
        );
    }
    read_and_print(cli, config, address, count)
}

/// Deref command implementation.
pub(crate) fn cmd_deref(cli: &Cli, config: &Config, label: &str, count: u16) -> Result<()> {
    let address = label_table(cli, config)?.lookup(label)?;
    let port = open_port(cli, config)?;

    let (target, data) = port
        .session(|port| {
            let target = port.read_pointer(address)?;
            let data = port.read_block(target, count)?;
            Ok((target, data))
        })
        .with_context(|| format!("failed to dereference {label}"))?;

    if !cli.quiet {
        eprintln!(
            "{} {} -> 0x{target:06X}",
            style("ℹ").blue(),
            style(label).cyan()
        );
    }
    print!("{}", hexdump(target, &data));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hexdump_full_line() {
        let data: Vec<u8> = (0x41..0x51).collect();
        assert_eq!(
            hexdump(0x38_0000, &data),
            "380000: 4142434445464748 494A4B4C4D4E4F50 ABCDEFGHIJKLMNOP\n"
        );
    }

    #[test]
    fn test_hexdump_partial_line_and_unprintable() {
        let mut data = vec![0x00; 16];
        data.extend_from_slice(&[0x20, 0x7F, 0x80, b'z']);
        assert_eq!(
            hexdump(0x10, &data),
            "000010: 0000000000000000 0000000000000000 ................\n\
             000020: 207F807A  ..z\n"
        );
    }

    #[test]
    fn test_hexdump_empty() {
        assert_eq!(hexdump(0, &[]), "");
    }
}
