//! Command implementations.
//!
//! Each group of subcommands is implemented in its own module.

pub(crate) mod bridge;
pub(crate) mod completions;
pub(crate) mod flash;
pub(crate) mod memory;
pub(crate) mod ports;
pub(crate) mod upload;
