//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// chartmgr - Reconciles chart releases toward declared desired state.
#[derive(Parser, Debug)]
#[command(name = "chartmgr")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "CHARTMGR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller until interrupted.
    Manage {
        /// Manifest directory (overrides the configuration).
        #[arg(long)]
        manifest_dir: Option<PathBuf>,

        /// Deployment backend URL (overrides the configuration).
        #[arg(long)]
        backend_url: Option<String>,
    },

    /// Validate manifests without touching the backend.
    Validate {
        /// Manifest files (defaults to every manifest in the manifest directory).
        files: Vec<PathBuf>,
    },

    /// Show the last recorded status of every manifest.
    Status,

    /// Print the release name a manifest reconciles to.
    ReleaseName {
        /// Manifest file.
        file: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per log line.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_manage_with_globals() {
        let cli = Cli::try_parse_from([
            "chartmgr",
            "manage",
            "--manifest-dir",
            "/srv/releases",
            "--log-format",
            "json",
            "-v",
        ])
        .expect("parse");

        assert!(cli.verbose);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Manage { manifest_dir: Some(ref dir), backend_url: None }
                if dir == &PathBuf::from("/srv/releases")
        ));
    }

    #[test]
    fn test_parse_release_name() {
        let cli = Cli::try_parse_from(["chartmgr", "--output", "json", "release-name", "web.yaml"])
            .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::ReleaseName { ref file } if file == &PathBuf::from("web.yaml")));
    }
}
