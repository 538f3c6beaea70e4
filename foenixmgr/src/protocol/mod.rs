//! Debug-port wire protocol.
//!
//! - [`frame`]: request framing, command codes and the LRC
//! - [`debug_port`]: synchronous request/response engine and target operations

pub mod debug_port;
pub mod frame;

pub use debug_port::{BootSource, DebugPort, Delays, SECTOR_SIZE, SECTOR_STAGING_ADDRESS};
pub use frame::{Command, RequestFrame, Response};
