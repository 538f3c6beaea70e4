//! TCP bridge command implementation.

use {
    crate::{Cli, CliError, config::Config, connection},
    anyhow::{Context, Result},
    console::style,
    foenixmgr::{Bridge, Endpoint, port::DEFAULT_BRIDGE_PORT},
};

/// Normalize a listen address, filling in the default bridge port.
pub(crate) fn listen_address(listen: &str) -> Result<String> {
    Ok(match Endpoint::parse(listen)? {
        Endpoint::Serial(host) => format!("{host}:{DEFAULT_BRIDGE_PORT}"),
        Endpoint::Tcp { host, port } => format!("{host}:{port}"),
    })
}

/// Serve the locally attached debug port to TCP clients on `listen`.
///
/// Runs until the process is stopped; each forwarded request opens the
/// serial port afresh.
pub(crate) fn cmd_tcp_bridge(cli: &Cli, config: &Config, listen: &str) -> Result<()> {
    let listen = listen_address(listen)?;
    let (endpoint, serial) = connection(cli, config)?;
    if !matches!(endpoint, Endpoint::Serial(_)) {
        return Err(CliError::Usage(format!(
            "the bridge needs a serial port, not {endpoint}"
        ))
        .into());
    }

    if !cli.quiet {
        eprintln!(
            "{} Bridging {} to {}",
            style("🔌").cyan(),
            style(&listen).yellow(),
            style(&endpoint).yellow()
        );
    }

    let mut bridge = Bridge::new(listen.as_str(), || endpoint.open(&serial));
    bridge
        .serve()
        .with_context(|| format!("bridge on {listen} failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_address_default_port() {
        assert_eq!(listen_address("0.0.0.0").unwrap(), "0.0.0.0:2560");
        assert_eq!(listen_address("localhost:").unwrap(), "localhost:2560");
        assert_eq!(listen_address("127.0.0.1:9000").unwrap(), "127.0.0.1:9000");
    }

    #[test]
    fn test_listen_address_invalid() {
        assert!(listen_address("").is_err());
        assert!(listen_address("host:99999").is_err());
    }
}
