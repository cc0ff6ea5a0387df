//! needle-sync - collection sync and enrichment trigger
//!
//! Each invocation is one short-lived execution context: it opens the shared
//! store, performs one operation and exits. All state that must outlive the
//! process lives in the store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use needle_common::config::{default_config_path, load_toml_config, prepare_data_folder, DataFolderResolver};
use needle_sync::clock::{Clock, SystemClock};
use needle_sync::config::Settings;
use needle_sync::queue::{run_consumer, ChannelQueue};
use needle_sync::services::orchestrator::{EnrichOutcome, PipelineAction, SyncOutcome};
use needle_sync::services::upstream::Lookup;
use needle_sync::store::SqliteStore;
use needle_sync::Coordinator;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for needle-sync
#[derive(Parser, Debug)]
#[command(name = "needle-sync")]
#[command(about = "Collection sync and enrichment for the Needle dashboard")]
#[command(version)]
struct Args {
    /// Folder holding the store database
    #[arg(long, global = true)]
    data_folder: Option<PathBuf>,

    /// TOML config file (defaults to the user config directory)
    #[arg(long, global = true, env = "NEEDLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a user's full collection into a fresh snapshot
    Sync {
        #[arg(long)]
        user: String,
        /// Username on the record-collection service
        #[arg(long)]
        username: String,
    },
    /// Run one enrichment batch, or hand the run to the background consumer
    Enrich {
        #[arg(long)]
        user: String,
        #[arg(long)]
        username: String,
        /// Queue the run and drain it in a background consumer
        #[arg(long)]
        background: bool,
    },
    /// Run enrichment batches until complete
    Drain {
        #[arg(long)]
        user: String,
    },
    /// Show snapshot, enrichment and cooldown state
    Status {
        #[arg(long)]
        user: String,
    },
    /// Cached dashboard lookups
    Lookup {
        #[command(subcommand)]
        kind: LookupKind,
    },
    /// Remove expired entries from the store
    Purge,
}

#[derive(Subcommand, Debug)]
enum LookupKind {
    /// Short LLM-written artist summary
    Summary { artist: String },
    /// Catalog match for an artist name
    Artist { name: String },
    /// Streaming links for a music URL
    Links { url: String },
    /// A scrobble user's top artists
    TopArtists {
        username: String,
        #[arg(long, default_value = "overall")]
        period: String,
    },
    /// A scrobble user's recent tracks (never cached)
    RecentTracks {
        username: String,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path).context("Failed to load config")?,
        None => Default::default(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&toml_config.logging.level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_toml(&toml_config).context("Invalid configuration")?;

    let data_folder = DataFolderResolver::new()
        .with_cli_arg(args.data_folder.as_deref())
        .with_toml(&toml_config)
        .resolve();
    let db_path = prepare_data_folder(&data_folder).context("Failed to prepare data folder")?;
    info!("Store: {}", db_path.display());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pool = needle_common::db::init_database(&db_path)
        .await
        .context("Failed to open store database")?;
    let sqlite = Arc::new(
        SqliteStore::open(pool, clock.clone())
            .await
            .context("Failed to initialize store")?,
    );

    let coordinator = Coordinator::new(sqlite.clone(), clock, settings)?;

    match args.command {
        Command::Sync { user, username } => {
            match coordinator.collection_sync().sync(&user, &username).await {
                Ok(outcome) => {
                    println!("{}", outcome.message());
                    if let SyncOutcome::CooldownRejected { .. } = outcome {
                        std::process::exit(2);
                    }
                }
                Err(e) => {
                    error!(user_id = %user, error = %e, "Sync failed");
                    anyhow::bail!(e.user_message(PipelineAction::Sync));
                }
            }
        }
        Command::Enrich {
            user,
            username,
            background,
        } => {
            if background {
                let (queue, receiver) = ChannelQueue::new(16);
                let coordinator = coordinator.with_queue(Arc::new(queue));
                let outcome = coordinator.enrichment_runner().enrich(&user, &username).await;
                report_enrich(&user, outcome)?;

                let consumer = Arc::new(coordinator.background_runner());
                drop(coordinator);
                run_consumer(consumer, receiver).await;
            } else {
                let outcome = coordinator.enrichment_runner().enrich(&user, &username).await;
                report_enrich(&user, outcome)?;
            }
        }
        Command::Drain { user } => {
            let outcome = coordinator.background_runner().drain(&user).await;
            report_enrich(&user, outcome)?;
        }
        Command::Status { user } => {
            let cooldown = coordinator.collection_sync().cooldown_remaining(&user).await?;
            match cooldown {
                Some(remaining) => println!(
                    "Sync cooldown: {}",
                    needle_common::human_time::format_wait(remaining)
                ),
                None => println!("Sync cooldown: none"),
            }
            let report = coordinator.background_runner().report(&user).await?;
            println!(
                "Snapshot: {} item(s), synced at {}",
                report.item_count,
                needle_common::time::ms_to_datetime(report.synced_at_ms).to_rfc3339()
            );
            print_json(&report.need)?;
            if let Some(progress) = report.progress {
                print_json(&progress)?;
            }
        }
        Command::Lookup { kind } => {
            let lookups = coordinator.lookups();
            match kind {
                LookupKind::Summary { artist } => print_lookup(lookups.artist_summary(&artist).await?)?,
                LookupKind::Artist { name } => print_lookup(lookups.catalog_artist(&name).await?)?,
                LookupKind::Links { url } => print_lookup(lookups.streaming_links(&url).await?)?,
                LookupKind::TopArtists { username, period } => {
                    print_lookup(lookups.top_artists(&username, &period).await?)?
                }
                LookupKind::RecentTracks { username, limit } => {
                    print_lookup(lookups.recent_tracks(&username, limit).await?)?
                }
            }
        }
        Command::Purge => {
            let removed = sqlite.purge_expired().await?;
            println!("Removed {} expired entr(ies)", removed);
        }
    }

    Ok(())
}

fn report_enrich(
    user: &str,
    outcome: Result<EnrichOutcome, needle_sync::services::PipelineError>,
) -> Result<()> {
    match outcome {
        Ok(EnrichOutcome::Complete(progress)) => {
            println!("Enrichment complete");
            print_json(&progress)
        }
        Ok(EnrichOutcome::Batch(progress)) => {
            println!(
                "Enriched batch: {} remaining, {} error(s)",
                progress.remaining_count, progress.error_count
            );
            print_json(&progress)
        }
        Ok(EnrichOutcome::Queued) => {
            println!("Enrichment queued");
            Ok(())
        }
        Ok(EnrichOutcome::Busy) => {
            println!("Enrichment already running, try again shortly");
            Ok(())
        }
        Ok(EnrichOutcome::Superseded) => {
            println!("Collection was re-synced during enrichment, please retry");
            Ok(())
        }
        Err(e) => {
            error!(user_id = %user, error = %e, "Enrichment failed");
            anyhow::bail!(e.user_message(PipelineAction::Enrich))
        }
    }
}

fn print_lookup<T: Serialize>(lookup: Lookup<T>) -> Result<()> {
    match lookup {
        Lookup::Found(value) => print_json(&value),
        Lookup::NotFound => {
            println!("Not found");
            Ok(())
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
