//! Command-line interface for shellac.
//!
//! This module provides CLI commands for scanning the library and
//! inspecting the resulting catalog.

mod commands;

pub use commands::{Cli, Commands, run_command};
