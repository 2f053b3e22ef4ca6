//! Poll registry: schedules one recurring job per tracked game.
//!
//! Built on `tokio-cron-scheduler`. Each game's job holds a per-game mutex
//! and skips a tick if the previous cycle is still running, so no two polls
//! for the same game ever overlap. A job whose game reaches `final` removes
//! itself from the scheduler. Failures are logged and isolated to the game
//! that produced them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio_cron_scheduler::{Job, JobScheduler};

type JobFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

use crate::sync::feed::FeedSource;
use crate::sync::pipeline::{SyncError, SyncPipeline};
use crate::types::SyncPhase;

/// Default timeout for graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry managing the lifecycle of per-game poll jobs plus the roster
/// and schedule jobs.
pub struct PollRegistry<F: FeedSource> {
    scheduler: JobScheduler,
    pipeline: Arc<SyncPipeline<F>>,
    jobs: Arc<RwLock<HashMap<String, uuid::Uuid>>>,
}

impl<F: FeedSource> std::fmt::Debug for PollRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollRegistry")
            .field("job_count", &self.jobs.try_read().map(|j| j.len()).unwrap_or(0))
            .finish_non_exhaustive()
    }
}

impl<F: FeedSource> PollRegistry<F> {
    pub async fn new(pipeline: Arc<SyncPipeline<F>>) -> Result<Self, SyncError> {
        let scheduler =
            JobScheduler::new().await.map_err(|e| SyncError::Scheduler(e.to_string()))?;

        Ok(Self { scheduler, pipeline, jobs: Arc::new(RwLock::new(HashMap::new())) })
    }

    /// Track a game: poll it every `interval` until it goes final.
    pub async fn track_game(
        &self,
        game_id: &str,
        interval: Duration,
    ) -> Result<uuid::Uuid, SyncError> {
        if let Some(existing) = self.jobs.read().await.get(game_id) {
            tracing::debug!(game_id, job_id = %existing, "Game already tracked");
            return Ok(*existing);
        }

        let pipeline = Arc::clone(&self.pipeline);
        let jobs = Arc::clone(&self.jobs);
        let game = game_id.to_string();
        // One lock per game: a tick that finds it held skips instead of
        // piling a second concurrent poll onto the same state machine.
        let guard = Arc::new(Mutex::new(()));

        let job = Job::new_repeated_async(interval, move |job_id: uuid::Uuid, scheduler: JobScheduler| {
            let (pipeline, jobs, game, guard) =
                (Arc::clone(&pipeline), Arc::clone(&jobs), game.clone(), Arc::clone(&guard));
            Box::pin(async move {
                let Ok(_running) = guard.try_lock() else {
                    tracing::debug!(game_id = %game, "Previous poll still running, skipping tick");
                    return;
                };

                match pipeline.poll_game(&game).await {
                    Ok(outcome) if outcome.phase == SyncPhase::Final => {
                        tracing::info!(game_id = %game, "Game final, untracking");
                        jobs.write().await.remove(&game);
                        if let Err(e) = scheduler.remove(&job_id).await {
                            tracing::warn!(game_id = %game, error = %e, "Failed to remove job");
                        }
                    }
                    Ok(outcome) => {
                        tracing::debug!(
                            game_id = %game,
                            phase = %outcome.phase,
                            status = ?outcome.status,
                            applied = outcome.applied,
                            "Poll cycle finished"
                        );
                    }
                    Err(e) => {
                        // Isolated to this game; the next tick retries from
                        // the committed watermark.
                        tracing::error!(game_id = %game, error = %e, "Poll cycle failed");
                    }
                }
            }) as JobFuture
        })
        .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        let job_id =
            self.scheduler.add(job).await.map_err(|e| SyncError::Scheduler(e.to_string()))?;
        self.jobs.write().await.insert(game_id.to_string(), job_id);

        tracing::info!(game_id, job_id = %job_id, interval = ?interval, "Game tracked");
        Ok(job_id)
    }

    /// Schedule the roster refresh pass. The pipeline's per-team minimum
    /// interval decides which teams actually refresh on each run.
    pub async fn track_rosters(
        &self,
        team_ids: Vec<String>,
        interval: Duration,
    ) -> Result<uuid::Uuid, SyncError> {
        let pipeline = Arc::clone(&self.pipeline);
        let job = Job::new_repeated_async(interval, move |_: uuid::Uuid, _: JobScheduler| {
            let (pipeline, team_ids) = (Arc::clone(&pipeline), team_ids.clone());
            Box::pin(async move {
                match pipeline.refresh_rosters(&team_ids).await {
                    Ok(outcome) => tracing::debug!(
                        refreshed = outcome.refreshed,
                        skipped = outcome.skipped,
                        "Roster pass finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Roster pass failed"),
                }
            }) as JobFuture
        })
        .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        self.scheduler.add(job).await.map_err(|e| SyncError::Scheduler(e.to_string()))
    }

    /// Schedule the feed-schedule sync pass.
    pub async fn track_schedule(&self, interval: Duration) -> Result<uuid::Uuid, SyncError> {
        let pipeline = Arc::clone(&self.pipeline);
        let job = Job::new_repeated_async(interval, move |_: uuid::Uuid, _: JobScheduler| {
            let pipeline = Arc::clone(&pipeline);
            Box::pin(async move {
                if let Err(e) = pipeline.sync_schedule().await {
                    tracing::error!(error = %e, "Schedule sync failed");
                }
            }) as JobFuture
        })
        .map_err(|e| SyncError::Scheduler(e.to_string()))?;

        self.scheduler.add(job).await.map_err(|e| SyncError::Scheduler(e.to_string()))
    }

    /// Start the scheduler.
    pub async fn start(&self) -> Result<(), SyncError> {
        self.scheduler.start().await.map_err(|e| SyncError::Scheduler(e.to_string()))?;
        tracing::info!("Poll scheduler started");
        Ok(())
    }

    /// Number of tracked games.
    pub async fn game_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Gracefully shutdown the scheduler with the default timeout.
    pub async fn shutdown(self) -> Result<(), SyncError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown with a custom timeout.
    pub async fn shutdown_with_timeout(mut self, timeout: Duration) -> Result<(), SyncError> {
        let result = tokio::time::timeout(timeout, async {
            self.scheduler.shutdown().await.map_err(|e| SyncError::Scheduler(e.to_string()))
        })
        .await;

        match result {
            Ok(Ok(())) => {
                tracing::info!("Poll scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                tracing::warn!("Poll scheduler shutdown timed out");
                Ok(())
            }
        }
    }
}
