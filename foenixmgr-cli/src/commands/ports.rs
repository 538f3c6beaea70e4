//! Port listing command implementation.

use {
    console::style,
    foenixmgr::{NativePortEnumerator, PortEnumerator, PortInfo},
    log::warn,
};

/// List ports command implementation.
///
/// A failure to enumerate is reported as an empty list.
pub(crate) fn cmd_list_ports(json: bool) {
    let ports: Vec<PortInfo> = NativePortEnumerator::list_ports().unwrap_or_else(|e| {
        warn!("Cannot enumerate serial ports: {e}");
        Vec::new()
    });

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{output:#}");
        return;
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return;
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").dim(),
            style(&port.name).green(),
            style(vid_pid).dim(),
            product
        );
    }
}
