//! foenixmgr CLI - Command-line tool for the Foenix debug port.
//!
//! ## Features
//!
//! - Upload Intel HEX, S-record, WDC, PGZ and PGX images into target memory
//! - Reprogram the whole flash, a single sector, or a list of sectors
//! - Dump memory by address or by assembler label
//! - Share a locally attached debug port over TCP
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand, ValueEnum},
    clap_complete::Shell,
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    env_logger::Env,
    foenixmgr::{
        BootSource, Cpu, DebugPort, Endpoint, ImageFormat, LabelTable, SerialConfig, Transport,
    },
    indicatif::{ProgressBar, ProgressStyle},
    log::debug,
    std::{
        env,
        path::PathBuf,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;

use {
    commands::{
        bridge::cmd_tcp_bridge,
        completions::{cmd_completions, cmd_completions_install},
        flash::{cmd_boot, cmd_flash, cmd_flash_bulk},
        memory::{cmd_deref, cmd_dump, cmd_lookup, cmd_revision},
        ports::cmd_list_ports,
        upload::{cmd_binary, cmd_upload},
    },
    config::Config,
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// foenixmgr - Program and inspect Foenix computers through the debug port.
///
/// Environment variables:
///   FOENIXMGR_PORT              - Debug port (serial device or HOST:PORT)
///   FOENIXMGR_CPU               - Target CPU (65816, 65c02)
///   FOENIXMGR_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
///   FOENIXMGR                   - Directory holding a foenixmgr.toml
#[derive(Parser)]
#[command(name = "foenixmgr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[command(after_help = "Examples:\n  \
    foenixmgr --port /dev/ttyUSB0 run-pgz hello.pgz\n  \
    foenixmgr --port foenix.local:2560 dump 0x380000 --count 40\n  \
    foenixmgr flash kernel.bin --address 380000")]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Debug port: a serial device, or HOST:PORT for a TCP bridge.
    #[arg(short, long, global = true, env = "FOENIXMGR_PORT")]
    port: Option<String>,

    /// Target CPU (65816 or 65c02).
    #[arg(long, global = true, env = "FOENIXMGR_CPU", value_parser = parse_cpu)]
    cpu: Option<Cpu>,

    /// Label file used by `lookup` and `deref`.
    #[arg(long, global = true, value_name = "PATH")]
    label_file: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "FOENIXMGR_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Answer yes to confirmation prompts.
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Boot source argument.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum BootArg {
    /// Load the LUTs from RAM.
    Ram,
    /// Load the LUTs from flash.
    Flash,
}

impl From<BootArg> for BootSource {
    fn from(arg: BootArg) -> Self {
        match arg {
            BootArg::Ram => BootSource::Ram,
            BootArg::Flash => BootSource::Flash,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the revision of the debug interface.
    Revision,

    /// Dump target memory.
    Dump {
        /// Start address (hex).
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes to read (hex).
        #[arg(short = 'n', long, default_value = "10", value_parser = parse_count)]
        count: u16,
    },

    /// Dump memory at the address of a label.
    Lookup {
        /// Label name.
        label: String,

        /// Number of bytes to read (hex).
        #[arg(short = 'n', long, default_value = "10", value_parser = parse_count)]
        count: u16,
    },

    /// Dump memory at the address stored in the pointer at a label.
    Deref {
        /// Label of a 24-bit pointer.
        label: String,

        /// Number of bytes to read (hex).
        #[arg(short = 'n', long, default_value = "10", value_parser = parse_count)]
        count: u16,
    },

    /// Upload an image, picking the decoder from its extension.
    Upload {
        /// Image file.
        file: PathBuf,

        /// Image format (hex, srec, wdc, pgz, pgx).
        #[arg(short, long, value_parser = parse_format)]
        format: Option<ImageFormat>,
    },

    /// Upload a Motorola S-record file.
    UploadSrec {
        /// S-record file.
        file: PathBuf,
    },

    /// Upload a WDC linker binary.
    UploadWdc {
        /// WDC binary file.
        file: PathBuf,
    },

    /// Upload and start a PGZ executable.
    RunPgz {
        /// PGZ file.
        file: PathBuf,
    },

    /// Upload and start a PGX executable.
    RunPgx {
        /// PGX file.
        file: PathBuf,
    },

    /// Write a raw binary to target memory.
    Binary {
        /// Binary file.
        file: PathBuf,

        /// Load address (hex); defaults to [flash] address.
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,
    },

    /// Reprogram the flash, or a single sector of it.
    Flash {
        /// Flash image.
        file: PathBuf,

        /// Staging address (hex); defaults to [flash] address.
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,

        /// Program only this 8 KiB sector (hex).
        #[arg(short, long, value_parser = parse_sector)]
        sector: Option<u8>,
    },

    /// Program the sectors listed in a CSV manifest (SECTOR,FILE per line).
    FlashBulk {
        /// Manifest file.
        manifest: PathBuf,
    },

    /// Select where the target boots from.
    Boot {
        /// Boot source.
        #[arg(value_enum)]
        source: BootArg,
    },

    /// Share the debug port with TCP clients.
    TcpBridge {
        /// Address to listen on; the port defaults to 2560.
        #[arg(value_name = "HOST[:PORT]")]
        listen: String,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions (auto-detected if not specified with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Automatically install completions to your shell configuration.
        #[arg(long)]
        install: bool,
    },
}

/// Errors raised by the CLI itself.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid combination of arguments.
    #[error("{0}")]
    Usage(String),
    /// Missing or invalid configuration.
    #[error("{0}")]
    Config(String),
}

/// Parse hexadecimal address (supports 0x/$ prefix and underscores).
pub(crate) fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('$'))
        .unwrap_or(s);
    let s: String = s
        .chars()
        .filter(|c| *c != '_')
        .collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex address: {e}"))
}

/// Parse a byte count (hex, 1 to FFFF).
fn parse_count(s: &str) -> Result<u16, String> {
    match parse_hex_u32(s)? {
        0 => Err("count must be at least 1".to_string()),
        n => u16::try_from(n).map_err(|_| format!("count 0x{n:X} exceeds 0xFFFF")),
    }
}

/// Parse a flash sector number (hex).
fn parse_sector(s: &str) -> Result<u8, String> {
    let n = parse_hex_u32(s)?;
    u8::try_from(n).map_err(|_| format!("sector 0x{n:X} out of range"))
}

fn parse_cpu(s: &str) -> Result<Cpu, String> {
    s.parse::<Cpu>()
        .map_err(|e| e.to_string())
}

fn parse_format(s: &str) -> Result<ImageFormat, String> {
    s.parse::<ImageFormat>()
        .map_err(|e| e.to_string())
}

/// Map an error to the process exit code.
///
/// 3: the user declined a destructive operation; 2: usage or configuration
/// error; 1: anything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause
            .downcast_ref::<CliError>()
            .is_some()
        {
            return 2;
        }
        match cause.downcast_ref::<foenixmgr::Error>() {
            Some(foenixmgr::Error::Aborted(_)) => return 3,
            Some(foenixmgr::Error::Config(_)) => return 2,
            Some(_) => return 1,
            None => {},
        }
    }
    1
}

fn main() {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "foenixmgr v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = run(&cli) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };

    match &cli.command {
        Commands::Revision => cmd_revision(cli, &config),
        Commands::Dump { address, count } => cmd_dump(cli, &config, *address, *count),
        Commands::Lookup { label, count } => cmd_lookup(cli, &config, label, *count),
        Commands::Deref { label, count } => cmd_deref(cli, &config, label, *count),
        Commands::Upload { file, format } => cmd_upload(cli, &config, file, *format),
        Commands::UploadSrec { file } => {
            cmd_upload(cli, &config, file, Some(ImageFormat::SRecord))
        },
        Commands::UploadWdc { file } => cmd_upload(cli, &config, file, Some(ImageFormat::Wdc)),
        Commands::RunPgz { file } => cmd_upload(cli, &config, file, Some(ImageFormat::Pgz)),
        Commands::RunPgx { file } => cmd_upload(cli, &config, file, Some(ImageFormat::Pgx)),
        Commands::Binary { file, address } => cmd_binary(cli, &config, file, *address),
        Commands::Flash {
            file,
            address,
            sector,
        } => cmd_flash(cli, &config, file, *address, *sector),
        Commands::FlashBulk { manifest } => cmd_flash_bulk(cli, &config, manifest),
        Commands::Boot { source } => cmd_boot(cli, &config, (*source).into()),
        Commands::TcpBridge { listen } => cmd_tcp_bridge(cli, &config, listen),
        Commands::ListPorts { json } => {
            cmd_list_ports(*json);
            Ok(())
        },
        Commands::Completions { shell, install } => {
            if *install {
                cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g.: foenixmgr completions bash".to_string(),
                    )
                })?;
                cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Resolve the debug port endpoint and its serial settings.
pub(crate) fn connection(cli: &Cli, config: &Config) -> Result<(Endpoint, SerialConfig)> {
    let port = cli
        .port
        .as_deref()
        .or(config
            .connection
            .port
            .as_deref())
        .ok_or_else(|| {
            CliError::Config(
                "no debug port configured; pass --port or set [connection] port".to_string(),
            )
        })?;
    let endpoint = Endpoint::parse(port)?;
    Ok((endpoint, config.serial_config(port)))
}

/// Open the debug port.
pub(crate) fn open_port(cli: &Cli, config: &Config) -> Result<DebugPort<Box<dyn Transport>>> {
    let (endpoint, serial) = connection(cli, config)?;
    if !cli.quiet {
        eprintln!("{} Using {}", style("🔌").cyan(), style(&endpoint).yellow());
    }
    let port = DebugPort::open(&endpoint, &serial)
        .with_context(|| format!("cannot open debug port {endpoint}"))?;
    Ok(port.with_delays(config.delays()))
}

/// Target CPU from the command line, the config file, or the default.
pub(crate) fn target_cpu(cli: &Cli, config: &Config) -> Result<Cpu> {
    match cli.cpu {
        Some(cpu) => Ok(cpu),
        None => Ok(config
            .cpu()?
            .unwrap_or_default()),
    }
}

/// Load the label file named on the command line or in the config.
pub(crate) fn label_table(cli: &Cli, config: &Config) -> Result<LabelTable> {
    let path = cli
        .label_file
        .as_ref()
        .or(config
            .target
            .labels
            .as_ref())
        .ok_or_else(|| {
            CliError::Config(
                "no label file configured; pass --label-file or set [target] labels".to_string(),
            )
        })?;
    Ok(LabelTable::from_file(path)?)
}

/// Byte progress bar on stderr, hidden in quiet or plain output.
pub(crate) fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Confirmation callback for destructive operations.
///
/// `--yes` accepts; non-interactive mode (or a non-terminal stdin) declines.
pub(crate) fn confirmer(cli: &Cli) -> impl FnOnce(&str) -> bool + '_ {
    move |prompt: &str| {
        if cli.yes {
            return true;
        }
        if cli.non_interactive || !std::io::IsTerminal::is_terminal(&std::io::stdin()) {
            eprintln!(
                "{} {prompt} (pass --yes to confirm without a prompt)",
                style("⚠").yellow()
            );
            return false;
        }
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    }
}

/// Print a success line on stderr unless quiet.
pub(crate) fn report_done(cli: &Cli, message: &str) {
    if !cli.quiet {
        eprintln!("{} {message}", style("✓").green());
    }
}
