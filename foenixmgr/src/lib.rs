//! # foenixmgr
//!
//! A library for programming and inspecting Foenix retro computers (C256 and
//! F256 families) through their hardware debug port.
//!
//! This crate provides:
//!
//! - The debug-port wire protocol (framing, LRC, command set)
//! - Serial and TCP transports, selected from a single endpoint string
//! - Decoders for Intel HEX, Motorola S-record, WDC binary, PGZ and PGX images
//! - Upload and flash programming sequences
//! - A TCP-to-serial bridge
//!
//! ## Features
//!
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use foenixmgr::{Cpu, DebugPort, Endpoint, Image, ImageFormat, SerialConfig, program};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Decode (and validate) the image before touching the target
//!     let image = Image::from_file("hello.pgz", ImageFormat::Pgz, Cpu::W65816)?;
//!
//!     let endpoint = Endpoint::parse("/dev/ttyUSB0")?;
//!     let port = DebugPort::open(&endpoint, &SerialConfig::default())?;
//!
//!     let stats = port.session(|port| {
//!         program::upload_blocks(port, image.blocks(), 4096, &mut |_| {})
//!     })?;
//!     println!("Sent {} bytes", stats.bytes);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod error;
pub mod image;
pub mod labels;
pub mod port;
pub mod program;
pub mod protocol;

// Re-exports for convenience
pub use {
    bridge::Bridge,
    error::{Error, Result},
    image::{Block, Cpu, Image, ImageFormat},
    labels::LabelTable,
    port::{
        Endpoint, NativePort, NativePortEnumerator, PortEnumerator, PortInfo, SerialConfig,
        TcpPort, Transport,
    },
    program::{Manifest, ManifestEntry, ProgramOptions, UploadStats},
    protocol::{BootSource, Command, DebugPort, Delays},
};
