//! Configuration file support for foenixmgr.
//!
//! Settings are resolved with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (FOENIXMGR_*)
//! 3. The file given with `--config` (no other file is read then)
//! 4. Local config file (./foenixmgr.toml)
//! 5. `$FOENIXMGR/foenixmgr.toml`
//! 6. Global config file (e.g. ~/.config/foenixmgr/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"   # or "host:port" for a TCP bridge
//! data_rate = 6000000
//! timeout = 60            # seconds
//!
//! [flash]
//! size = 524288
//! chunk_size = 4096
//! address = "380000"
//!
//! [target]
//! cpu = "65816"
//! labels = "kernel.lbl"
//! ```

use {
    crate::{CliError, parse_hex_u32},
    directories::ProjectDirs,
    foenixmgr::{
        Cpu, Delays, ProgramOptions, SerialConfig,
        program::{DEFAULT_CHUNK_SIZE, DEFAULT_FLASH_SIZE},
    },
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        env, fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Name of the per-project configuration file.
pub const LOCAL_CONFIG_FILE: &str = "foenixmgr.toml";

/// Environment variable naming a directory that holds a `foenixmgr.toml`.
pub const CONFIG_DIR_ENV: &str = "FOENIXMGR";

const DEFAULT_DATA_RATE: u32 = 6_000_000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Debug port: a serial device, or `host:port` for a TCP bridge.
    pub port: Option<String>,
    /// Serial data rate in bits per second.
    pub data_rate: Option<u32>,
    /// I/O timeout in seconds.
    pub timeout: Option<u64>,
}

/// Flash and upload configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Size in bytes a whole-flash image must have.
    pub size: Option<usize>,
    /// Largest payload of a single write.
    pub chunk_size: Option<usize>,
    /// Default staging address for flash images (hex).
    pub address: Option<String>,
    /// Settling delay after a sector erase, in milliseconds.
    pub erase_delay_ms: Option<u64>,
    /// Settling delay after a sector program, in milliseconds.
    pub program_delay_ms: Option<u64>,
}

/// Target machine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetConfig {
    /// CPU of the target ("65816" or "65c02").
    pub cpu: Option<String>,
    /// Label file used by `lookup` and `deref`.
    pub labels: Option<PathBuf>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
    /// Target configuration.
    #[serde(default)]
    pub target: TargetConfig,
}

impl Config {
    /// Load configuration from the discovered files.
    ///
    /// Files that exist but cannot be read or parsed are skipped with a
    /// warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        for path in Self::search_paths() {
            if let Some(found) = Self::load_from_file(&path) {
                debug!("Loaded config from {}", path.display());
                config.merge(found);
            }
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike discovered files, an explicitly named file must exist and parse.
    pub fn load_from_path(path: &Path) -> Result<Self, CliError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("invalid TOML in {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Candidate files, lowest priority first.
    fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(global) = Self::global_config_path() {
            paths.push(global);
        }
        if let Some(dir) = env::var_os(CONFIG_DIR_ENV) {
            paths.push(PathBuf::from(dir).join(LOCAL_CONFIG_FILE));
        }
        paths.push(PathBuf::from(LOCAL_CONFIG_FILE));
        paths
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "foenixmgr").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one; values set in `other` win.
    fn merge(&mut self, other: Self) {
        let Self {
            connection,
            flash,
            target,
        } = other;

        merge_opt(&mut self.connection.port, connection.port);
        merge_opt(&mut self.connection.data_rate, connection.data_rate);
        merge_opt(&mut self.connection.timeout, connection.timeout);

        merge_opt(&mut self.flash.size, flash.size);
        merge_opt(&mut self.flash.chunk_size, flash.chunk_size);
        merge_opt(&mut self.flash.address, flash.address);
        merge_opt(&mut self.flash.erase_delay_ms, flash.erase_delay_ms);
        merge_opt(&mut self.flash.program_delay_ms, flash.program_delay_ms);

        merge_opt(&mut self.target.cpu, target.cpu);
        merge_opt(&mut self.target.labels, target.labels);
    }

    /// Serial settings for the configured port.
    pub fn serial_config(&self, port: &str) -> SerialConfig {
        SerialConfig::new(
            port,
            self.connection
                .data_rate
                .unwrap_or(DEFAULT_DATA_RATE),
        )
        .with_timeout(Duration::from_secs(
            self.connection
                .timeout
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
        ))
    }

    /// Upload and flash tunables.
    pub fn program_options(&self) -> ProgramOptions {
        ProgramOptions {
            chunk_size: self
                .flash
                .chunk_size
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            flash_size: self
                .flash
                .size
                .unwrap_or(DEFAULT_FLASH_SIZE),
        }
    }

    /// Flash settling delays.
    pub fn delays(&self) -> Delays {
        let defaults = Delays::default();
        Delays {
            erase_sector: self
                .flash
                .erase_delay_ms
                .map_or(defaults.erase_sector, Duration::from_millis),
            program_sector: self
                .flash
                .program_delay_ms
                .map_or(defaults.program_sector, Duration::from_millis),
        }
    }

    /// Configured flash staging address.
    pub fn flash_address(&self) -> Result<Option<u32>, CliError> {
        self.flash
            .address
            .as_deref()
            .map(|s| {
                parse_hex_u32(s)
                    .map_err(|e| CliError::Config(format!("[flash] address '{s}': {e}")))
            })
            .transpose()
    }

    /// Configured target CPU.
    pub fn cpu(&self) -> Result<Option<Cpu>, CliError> {
        self.target
            .cpu
            .as_deref()
            .map(|s| {
                s.parse::<Cpu>()
                    .map_err(|e| CliError::Config(format!("[target] cpu: {e}")))
            })
            .transpose()
    }
}

fn merge_opt<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.flash.size.is_none());
        assert!(config.target.cpu.is_none());

        let serial = config.serial_config("/dev/ttyUSB0");
        assert_eq!(serial.port_name, "/dev/ttyUSB0");
        assert_eq!(serial.baud_rate, 6_000_000);
        assert_eq!(serial.timeout, Duration::from_secs(60));

        assert_eq!(config.program_options(), ProgramOptions::default());
        assert_eq!(config.delays(), Delays::default());
        assert_eq!(config.flash_address().unwrap(), None);
        assert_eq!(config.cpu().unwrap(), None);
    }

    // ---- Parsing ----

    #[test]
    fn test_parse_full_file() {
        let config: Config = toml::from_str(
            r#"
            [connection]
            port = "COM3"
            data_rate = 115200
            timeout = 5

            [flash]
            size = 1048576
            chunk_size = 1024
            address = "0x38_0000"
            erase_delay_ms = 10
            program_delay_ms = 20

            [target]
            cpu = "65c02"
            labels = "kernel.lbl"
            "#,
        )
        .unwrap();

        let serial = config.serial_config("COM3");
        assert_eq!(serial.baud_rate, 115_200);
        assert_eq!(serial.timeout, Duration::from_secs(5));
        assert_eq!(
            config.program_options(),
            ProgramOptions {
                chunk_size: 1024,
                flash_size: 1_048_576,
            }
        );
        assert_eq!(config.delays().erase_sector, Duration::from_millis(10));
        assert_eq!(config.delays().program_sector, Duration::from_millis(20));
        assert_eq!(config.flash_address().unwrap(), Some(0x38_0000));
        assert_eq!(config.cpu().unwrap(), Some(Cpu::W65C02));
        assert_eq!(config.target.labels, Some(PathBuf::from("kernel.lbl")));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[connection]\nport = \"/dev/ttyACM0\"\n").unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.program_options(), ProgramOptions::default());
    }

    #[test]
    fn test_invalid_values() {
        let config: Config = toml::from_str(
            r#"
            [flash]
            address = "zz"
            [target]
            cpu = "z80"
            "#,
        )
        .unwrap();
        assert!(matches!(config.flash_address(), Err(CliError::Config(_))));
        assert!(matches!(config.cpu(), Err(CliError::Config(_))));
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base: Config = toml::from_str(
            r#"
            [connection]
            port = "/dev/ttyUSB0"
            data_rate = 115200
            [target]
            cpu = "65816"
            "#,
        )
        .unwrap();
        let other: Config = toml::from_str(
            r#"
            [connection]
            port = "foenix.local:2560"
            [flash]
            chunk_size = 512
            "#,
        )
        .unwrap();

        base.merge(other);
        assert_eq!(base.connection.port.as_deref(), Some("foenix.local:2560"));
        assert_eq!(base.connection.data_rate, Some(115_200));
        assert_eq!(base.flash.chunk_size, Some(512));
        assert_eq!(base.target.cpu.as_deref(), Some("65816"));
    }

    #[test]
    fn test_config_merge_empty_keeps_base() {
        let mut base = Config::default();
        base.flash.address = Some("380000".to_string());
        base.merge(Config::default());
        assert_eq!(base.flash.address.as_deref(), Some("380000"));
    }

    // ---- Files ----

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[target]\ncpu = \"65816\"\n").unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.cpu().unwrap(), Some(Cpu::W65816));
    }

    #[test]
    fn test_load_from_path_errors_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "invalid toml [[[").unwrap();

        assert!(matches!(Config::load_from_path(&broken), Err(CliError::Config(_))));
        assert!(matches!(
            Config::load_from_path(&dir.path().join("missing.toml")),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file_skips_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "invalid toml [[[").unwrap();

        assert!(Config::load_from_file(&broken).is_none());
        assert!(Config::load_from_file(&dir.path().join("missing.toml")).is_none());
    }

    #[test]
    fn test_global_config_path() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
