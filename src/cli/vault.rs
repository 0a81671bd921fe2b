//! Credential vault commands
//!
//! Nothing here decrypts a record; secrets never reach the terminal.

use safestash::error::Result;

use crate::cli::{CommandContext, OutputFormat};
use crate::output::json::format_json;

/// Report whether a record exists
pub async fn check(ctx: &CommandContext, id: &str) -> Result<()> {
    let vault = ctx.vault().await?;
    let present = vault.contains(id).await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "namespace": vault.namespace().name(),
                "id": id,
                "present": present,
            });
            println!("{}", format_json(&json)?);
        }
        _ => println!("{}: {}", id, if present { "present" } else { "absent" }),
    }

    Ok(())
}

/// Delete a record and destroy its key
pub async fn forget(ctx: &CommandContext, id: &str) -> Result<()> {
    let vault = ctx.vault().await?;
    let existed = vault.contains(id).await?;
    vault.delete(id).await?;

    match ctx.format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "id": id,
                "removed": existed,
            });
            println!("{}", format_json(&json)?);
        }
        _ => {
            if existed {
                println!("Forgot {}", id);
            } else {
                println!("No record for {}", id);
            }
        }
    }

    Ok(())
}
