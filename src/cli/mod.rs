//! CLI command definitions and handlers

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod args;
pub mod cache;
pub mod context;
pub mod vault;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

/// safestash - inspect and maintain the local response cache and credential vault
#[derive(Parser, Debug)]
#[command(name = "safestash")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "SAFESTASH_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "SAFESTASH_CONFIG", hide_env = true)]
    pub config: Option<PathBuf>,

    /// Override data directory (store database and key file)
    #[arg(long, global = true, env = "SAFESTASH_DATA_DIR", hide_env = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, env = "SAFESTASH_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the response cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Inspect the credential vault
    #[command(subcommand)]
    Vault(VaultCommands),

    /// Display version information
    Version,
}

/// Cache management subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show cache statistics
    Status {
        /// Limit to one cache namespace (e.g. thi-api)
        #[arg(long, short = 'n')]
        namespace: Option<String>,
    },
    /// Remove every entry in a namespace
    Clear {
        #[arg(long, short = 'n')]
        namespace: String,
    },
    /// Purge expired entries in a namespace now
    Sweep {
        #[arg(long, short = 'n')]
        namespace: String,
    },
    /// Print data directory path
    Path,
}

/// Credential vault subcommands
#[derive(Subcommand, Debug)]
pub enum VaultCommands {
    /// Report whether a record exists, without decrypting it
    Check {
        /// Record id (e.g. session)
        id: String,
    },
    /// Delete a record and its key
    Forget {
        /// Record id (e.g. session)
        id: String,
    },
}
