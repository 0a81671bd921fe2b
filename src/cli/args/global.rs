//! Global CLI options shared across all commands

use std::path::{Path, PathBuf};

use crate::cli::{Cli, OutputFormat};

/// Global CLI options passed to all command handlers.
///
/// Precedence is CLI flag > environment variable > config file > default.
/// This struct captures the CLI/env layer; config file values are merged in
/// `CommandContext`.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Output format (pretty, table, json)
    pub format: OutputFormat,

    /// Custom config file path
    pub config: Option<PathBuf>,

    /// Data directory override (bypasses config file)
    pub data_dir: Option<PathBuf>,
}

impl GlobalOptions {
    /// Create GlobalOptions from a parsed CLI struct.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.format,
            config: cli.config.clone(),
            data_dir: cli.data_dir.clone(),
        }
    }

    pub fn config_ref(&self) -> Option<&Path> {
        self.config.as_deref()
    }

    pub fn data_dir_ref(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }
}
