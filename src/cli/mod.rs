//! CLI module for chartmgr.
//!
//! This module provides the command-line interface for running the
//! controller and inspecting manifests.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::{FileReport, OutputFormatter, StatusEntry};
