use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use linkhop::config::Config;
use linkhop::links::ReservedPaths;
use linkhop::storage::{ListQuery, SqliteStorage, Storage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "linkctl")]
#[command(about = "linkhop link management CLI")]
#[command(
    long_about = "linkhop link management CLI\n\n\
Writes go straight to the database. A running server keeps serving its cached \
copy of a changed link for up to CACHE_TTL_SECS (default 30s); use the HTTP API \
when a change must take effect immediately."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List links, newest first
    List {
        /// Only links created by this user
        #[arg(long)]
        owner: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Archive a link so it no longer resolves (a running server notices within CACHE_TTL_SECS)
    Archive { shortcode: String },
    /// Restore an archived link
    Unarchive { shortcode: String },
    /// Delete a link and its click history (a running server notices within CACHE_TTL_SECS)
    Delete { shortcode: String },
    /// Print the reserved shortcodes
    Reserved,
}

async fn set_archived(storage: &Arc<dyn Storage>, shortcode: &str, archived: bool) -> Result<()> {
    let mut link = storage
        .get_authoritative(shortcode)
        .await?
        .with_context(|| format!("link '{}' not found", shortcode))?;

    if link.archived == archived {
        println!("Link '{}' is already {}", shortcode, if archived { "archived" } else { "active" });
        return Ok(());
    }

    link.archived = archived;
    link.updated = chrono::Utc::now();
    if !storage.update(&link).await? {
        bail!("link '{}' disappeared during update", shortcode);
    }
    println!("✓ Link '{}' {}", shortcode, if archived { "archived" } else { "unarchived" });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    if let Commands::Reserved = cli.command {
        for path in ReservedPaths::new(&config.links.reserved_paths).list() {
            println!("{}", path);
        }
        return Ok(());
    }

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
    );

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::List { owner, limit } => {
            let links = storage
                .list(&ListQuery {
                    limit: limit.clamp(1, 10_000),
                    after: None,
                    owner,
                })
                .await?;

            if links.is_empty() {
                println!("No links found.");
            } else {
                println!("{:<20} {:>8} {:<9} {:<20} URL", "SHORTCODE", "CLICKS", "STATE", "OWNER");
                for link in links {
                    println!(
                        "{:<20} {:>8} {:<9} {:<20} {}",
                        link.shortcode,
                        link.clicks,
                        if link.archived { "archived" } else { "active" },
                        link.created_by.as_deref().unwrap_or("-"),
                        link.url
                    );
                }
            }
        }
        Commands::Archive { shortcode } => set_archived(&storage, &shortcode, true).await?,
        Commands::Unarchive { shortcode } => set_archived(&storage, &shortcode, false).await?,
        Commands::Delete { shortcode } => {
            if storage.delete(&shortcode).await? {
                println!("✓ Deleted link '{}' and its click history", shortcode);
            } else {
                bail!("link '{}' not found", shortcode);
            }
        }
        Commands::Reserved => {}
    }

    Ok(())
}
