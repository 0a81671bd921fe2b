//! safestash CLI - maintenance for the local response cache and credential vault

use clap::Parser;

mod cli;
mod output;

use cli::{CacheCommands, Cli, CommandContext, Commands, GlobalOptions, VaultCommands};
use safestash::error::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Commands::Version = cli.command {
        println!("safestash version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let opts = GlobalOptions::from_cli(&cli);
    let ctx = CommandContext::new(&opts)?;

    match cli.command {
        Commands::Cache(cache_cmd) => match cache_cmd {
            CacheCommands::Status { namespace } => {
                cli::cache::status(&ctx, namespace.as_deref()).await
            }
            CacheCommands::Clear { namespace } => cli::cache::clear(&ctx, &namespace).await,
            CacheCommands::Sweep { namespace } => cli::cache::sweep(&ctx, &namespace).await,
            CacheCommands::Path => cli::cache::path(&ctx),
        },
        Commands::Vault(vault_cmd) => match vault_cmd {
            VaultCommands::Check { id } => cli::vault::check(&ctx, &id).await,
            VaultCommands::Forget { id } => cli::vault::forget(&ctx, &id).await,
        },
        Commands::Version => Ok(()),
    }
}

/// `--debug` forces debug output; otherwise `RUST_LOG` applies, defaulting to warn
fn init_logging(debug: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp(None).init();
}
