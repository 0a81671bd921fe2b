//! Cache management commands

use serde::Serialize;
use tabled::Tabled;

use safestash::cache::{CacheStats, SweepStats};
use safestash::error::Result;

use crate::cli::{CommandContext, OutputFormat};
use crate::output::{json::format_json, table::format_table};

/// Per-namespace status row
#[derive(Debug, Serialize, Tabled)]
struct NamespaceStatus {
    #[tabled(rename = "NAMESPACE")]
    namespace: String,
    #[tabled(rename = "VALID")]
    valid_entries: usize,
    #[tabled(rename = "EXPIRED")]
    expired_entries: usize,
    #[tabled(rename = "SIZE")]
    #[serde(skip)]
    size: String,
    #[tabled(skip)]
    total_size_bytes: usize,
}

impl NamespaceStatus {
    fn new(namespace: &str, stats: CacheStats) -> Self {
        Self {
            namespace: namespace.to_string(),
            valid_entries: stats.valid_entries,
            expired_entries: stats.expired_entries,
            size: format_size(stats.total_size_bytes),
            total_size_bytes: stats.total_size_bytes,
        }
    }
}

/// Whole-store status row
#[derive(Debug, Serialize, Tabled)]
struct StoreStatus {
    #[tabled(rename = "ITEMS")]
    total_items: usize,
    #[tabled(rename = "SIZE")]
    #[serde(skip)]
    size: String,
    #[tabled(skip)]
    total_size_bytes: usize,
    #[tabled(rename = "PATH")]
    path: String,
}

/// Sweep result row
#[derive(Debug, Serialize, Tabled)]
struct SweepResult {
    #[tabled(rename = "NAMESPACE")]
    namespace: String,
    #[tabled(rename = "INSPECTED")]
    inspected: usize,
    #[tabled(rename = "REMOVED")]
    removed: usize,
    #[tabled(rename = "FAILED")]
    failed: usize,
}

impl SweepResult {
    fn new(namespace: &str, stats: SweepStats) -> Self {
        Self {
            namespace: namespace.to_string(),
            inspected: stats.inspected,
            removed: stats.removed,
            failed: stats.failed,
        }
    }
}

/// Show cache status/statistics
pub async fn status(ctx: &CommandContext, namespace: Option<&str>) -> Result<()> {
    match namespace {
        Some(ns) => namespace_status(ctx, ns).await,
        None => store_status(ctx).await,
    }
}

async fn namespace_status(ctx: &CommandContext, namespace: &str) -> Result<()> {
    let cache = ctx.cache(namespace)?;
    let row = NamespaceStatus::new(namespace, cache.stats().await);

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&row)?),
        OutputFormat::Table => println!("{}", format_table(&[row])),
        OutputFormat::Pretty => {
            println!("Cache Status: {}", row.namespace);
            println!("────────────────────────────────────────");
            println!("Valid entries:  {}", row.valid_entries);
            println!("Expired:        {}", row.expired_entries);
            println!("Total size:     {}", row.size);
        }
    }

    Ok(())
}

async fn store_status(ctx: &CommandContext) -> Result<()> {
    let stats = ctx.backend.stats().await?;
    let row = StoreStatus {
        total_items: stats.total_items,
        size: format_size(stats.total_size_bytes),
        total_size_bytes: stats.total_size_bytes,
        path: ctx.backend.path().display().to_string(),
    };

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&row)?),
        OutputFormat::Table => println!("{}", format_table(&[row])),
        OutputFormat::Pretty => {
            println!("Store Status");
            println!("────────────────────────────────────────");
            println!("Location:       {}", row.path);
            println!("Items:          {}", row.total_items);
            println!("Total size:     {}", row.size);
        }
    }

    Ok(())
}

/// Remove every entry in one namespace
pub async fn clear(ctx: &CommandContext, namespace: &str) -> Result<()> {
    let cache = ctx.cache(namespace)?;
    let removed = cache.flush_all().await;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "namespace": namespace,
                "entries_removed": removed,
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            if removed > 0 {
                println!("Cleared {} cache entries from {}", removed, namespace);
            } else {
                println!("Cache {} was already empty", namespace);
            }
        }
    }

    Ok(())
}

/// Run one sweep pass over a namespace
pub async fn sweep(ctx: &CommandContext, namespace: &str) -> Result<()> {
    let cache = ctx.cache(namespace)?;
    let row = SweepResult::new(namespace, cache.sweep().await);

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&row)?),
        OutputFormat::Table => println!("{}", format_table(&[row])),
        OutputFormat::Pretty => {
            println!(
                "Removed {} expired entries from {} ({} inspected)",
                row.removed, row.namespace, row.inspected
            );
            if row.failed > 0 {
                println!("{} entries could not be read and were kept", row.failed);
            }
        }
    }

    Ok(())
}

/// Show data directory path
pub fn path(ctx: &CommandContext) -> Result<()> {
    println!("{}", ctx.data_dir.display());
    Ok(())
}

/// Format bytes as human-readable size
fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
