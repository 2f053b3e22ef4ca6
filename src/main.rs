//! Gridstore binary entry point.
//!
//! Wires the library together: loads configuration, opens storage, and runs
//! the poll registry against the configured HTTP feed until interrupted.
//! All sync policy lives in the library; this binary only schedules it.

use std::sync::Arc;

use clap::Parser;
use gridstore::config::AppConfig;
use gridstore::query::Criteria;
use gridstore::storage::StorageBuilder;
use gridstore::sync::{HttpFeed, PollRegistry, SyncOptions, SyncPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Gridstore - live gridiron play-by-play store
#[derive(Parser, Debug)]
#[command(name = "gridstore", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "gridstore.yaml", env = "GRIDSTORE_CONFIG")]
    config: String,

    /// Database path (overrides config file)
    #[arg(long, env = "GRIDSTORE_DB_PATH")]
    db_path: Option<String>,

    /// Feed base URL (overrides config file)
    #[arg(long, env = "GRIDSTORE_FEED_URL")]
    feed_url: Option<String>,

    /// Run a single schedule + poll pass and exit instead of looping
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gridstore=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = if std::path::Path::new(&cli.config).exists() {
        AppConfig::load(&cli.config)?
    } else {
        tracing::warn!("Config file not found, using defaults");
        AppConfig::default()
    };
    if let Some(path) = cli.db_path {
        config.database.path = path;
    }
    if let Some(url) = cli.feed_url {
        config.feed.base_url = url;
    }
    config.validate()?;

    tracing::info!(
        "Database: {}, feed: {}",
        config.database.path,
        config.feed.base_url
    );

    let handles = StorageBuilder::new(&config.database.path)
        .pool_size(config.database.pool_size)
        .build()?;

    let feed = Arc::new(HttpFeed::new(&config.feed.base_url, Some(config.sync.poll_timeout))?);
    let pipeline = Arc::new(SyncPipeline::new(
        feed,
        handles.writer.clone(),
        handles.sync_reader.clone(),
        SyncOptions {
            poll_timeout: config.sync.poll_timeout,
            gap_retry_budget: config.sync.gap_retry_budget,
            roster_min_interval: config.sync.roster_min_interval,
        },
    ));

    // Pick up newly scheduled games before deciding what to track.
    if let Err(e) = pipeline.sync_schedule().await {
        tracing::warn!(error = %e, "Initial schedule sync failed");
    }

    let tracked = handles.sync_reader.unfinished_games()?;
    let teams = team_ids(&handles, &tracked)?;

    if cli.once {
        for game_id in &tracked {
            match pipeline.poll_game(game_id).await {
                Ok(outcome) => tracing::info!(game_id, applied = outcome.applied, "Polled"),
                Err(e) => tracing::error!(game_id, error = %e, "Poll failed"),
            }
        }
        if let Err(e) = pipeline.refresh_rosters(&teams).await {
            tracing::error!(error = %e, "Roster refresh failed");
        }
        handles.shutdown()?;
        return Ok(());
    }

    let registry = PollRegistry::new(Arc::clone(&pipeline)).await?;
    for game_id in &tracked {
        registry.track_game(game_id, config.sync.poll_interval).await?;
    }
    registry.track_rosters(teams, config.sync.roster_pass_interval).await?;
    registry.track_schedule(config.sync.schedule_interval).await?;
    registry.start().await?;

    tracing::info!(games = tracked.len(), "Tracking games; press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    registry.shutdown().await?;
    handles.shutdown()?;
    Ok(())
}

/// Teams appearing in the tracked games; these are the rosters worth
/// refreshing.
fn team_ids(
    handles: &gridstore::StorageHandles,
    tracked: &[String],
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let mut teams = std::collections::BTreeSet::new();
    for game_id in tracked {
        for game in handles.query_reader.games(&Criteria::new().game_id(game_id.clone()))? {
            teams.insert(game.home_team);
            teams.insert(game.away_team);
        }
    }
    Ok(teams.into_iter().collect())
}
