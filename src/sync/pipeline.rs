//! The synchronization pipeline: per-game poll cycles, roster refresh, and
//! schedule sync.
//!
//! Each tracked game runs a forward-only state machine persisted in
//! `sync_state`:
//!
//! ```text
//! scheduled -> polling -> finalizing -> final
//! ```
//!
//! A poll cycle fetches the feed's current play list, diffs it against the
//! committed watermark, and applies only the suffix of new plays plus any
//! content-hash corrections to already-committed plays. The whole cycle
//! commits atomically or not at all; the watermark only advances after a
//! successful commit, so a failed cycle leaves no side effects and the next
//! cycle retries from the same point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::storage::{StorageError, StorageWriter, SyncBatch, SyncReader};
use crate::sync::feed::{FeedError, FeedSource, GameSnapshot};
use crate::types::{GameStatus, GameSyncState, Play, PlayStat, SyncPhase};

/// Default per-cycle feed timeout.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of consecutive gap cycles tolerated before the gap is
/// surfaced as a fatal inconsistency.
const DEFAULT_GAP_RETRY_BUDGET: u32 = 3;

/// Default minimum interval between roster refreshes per team.
const DEFAULT_ROSTER_MIN_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

/// Errors from the synchronization pipeline.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// A poll cycle exceeded its timeout and was abandoned without commit.
    #[error("poll for game {game_id} timed out after {timeout:?}")]
    Timeout { game_id: String, timeout: Duration },

    /// A delta failed to attach contiguously to the watermark for longer
    /// than the retry budget. Requires manual reconciliation.
    #[error(
        "sequence gap for game {game_id}: expected play {expected}, feed resumes at {found} \
         (persisted for {cycles} cycles)"
    )]
    SequenceGap { game_id: String, expected: u32, found: u32, cycles: u32 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Scheduler-level failure while registering or removing poll jobs.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Pipeline tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Abandon a poll cycle after this long; nothing is committed.
    pub poll_timeout: Duration,
    /// Consecutive gap cycles tolerated before [`SyncError::SequenceGap`].
    pub gap_retry_budget: u32,
    /// Minimum time between roster refreshes for one team.
    pub roster_min_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            gap_retry_budget: DEFAULT_GAP_RETRY_BUDGET,
            roster_min_interval: DEFAULT_ROSTER_MIN_INTERVAL,
        }
    }
}

/// What one poll cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Nothing to do: game not started, already final, or no deltas.
    UpToDate,
    /// Deltas were committed.
    Applied,
    /// The delta did not attach to the watermark; deferred within the
    /// retry budget.
    GapDeferred,
}

/// Result of one poll cycle, for observability.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub game_id: String,
    pub phase: SyncPhase,
    pub status: PollStatus,
    /// Number of applied deltas (plays, corrections and stat rows).
    pub applied: u64,
}

/// Result of one roster refresh pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RosterOutcome {
    pub refreshed: u64,
    pub skipped: u64,
    pub players: u64,
}

/// Play-list delta computed against the committed watermark.
#[derive(Debug, Default)]
struct Delta {
    new_plays: Vec<Play>,
    corrected_plays: Vec<Play>,
    stats: Vec<PlayStat>,
    max_seq: u32,
}

impl Delta {
    fn is_empty(&self) -> bool {
        self.new_plays.is_empty() && self.corrected_plays.is_empty()
    }

    fn applied(&self) -> u64 {
        (self.new_plays.len() + self.corrected_plays.len() + self.stats.len()) as u64
    }
}

#[derive(Debug)]
enum DiffError {
    Gap { expected: u32, found: u32 },
    DuplicateSeq(u32),
}

/// The synchronization pipeline. One instance serves all tracked games;
/// per-game serialization is the registry's job.
pub struct SyncPipeline<F> {
    feed: Arc<F>,
    writer: StorageWriter,
    reader: SyncReader,
    opts: SyncOptions,
}

impl<F: FeedSource> SyncPipeline<F> {
    pub fn new(feed: Arc<F>, writer: StorageWriter, reader: SyncReader, opts: SyncOptions) -> Self {
        Self { feed, writer, reader, opts }
    }

    /// Run one poll cycle for a game.
    ///
    /// Invoked by an external scheduler once per cycle. Owns no scheduling
    /// policy beyond the per-game state machine.
    pub async fn poll_game(&self, game_id: &str) -> Result<PollOutcome, SyncError> {
        let state = self
            .reader
            .sync_state(game_id)?
            .unwrap_or_else(|| GameSyncState::new(game_id));

        // A final game is never polled again, regardless of feed content.
        if state.phase == SyncPhase::Final {
            return Ok(PollOutcome {
                game_id: game_id.to_string(),
                phase: SyncPhase::Final,
                status: PollStatus::UpToDate,
                applied: 0,
            });
        }

        let snapshot = tokio::time::timeout(self.opts.poll_timeout, self.feed.game_snapshot(game_id))
            .await
            .map_err(|_| SyncError::Timeout {
                game_id: game_id.to_string(),
                timeout: self.opts.poll_timeout,
            })??;
        if snapshot.game_id != game_id {
            return Err(FeedError::Malformed(format!(
                "asked for game {game_id}, feed answered for {}",
                snapshot.game_id
            ))
            .into());
        }

        // Kickoff hasn't happened: record schedule data and stay scheduled.
        if snapshot.status == GameStatus::Scheduled {
            self.writer.upsert_schedule(vec![snapshot.to_game(GameStatus::Scheduled)]).await?;
            self.writer.save_sync_state(state.clone()).await?;
            return Ok(PollOutcome {
                game_id: game_id.to_string(),
                phase: state.phase,
                status: PollStatus::UpToDate,
                applied: 0,
            });
        }

        let stored = self.reader.play_hashes(game_id)?;
        let delta = match diff(game_id, &snapshot, &stored, state.watermark) {
            Ok(delta) => delta,
            Err(DiffError::DuplicateSeq(seq)) => {
                return Err(FeedError::Malformed(format!(
                    "game {game_id}: duplicate play sequence {seq} in snapshot"
                ))
                .into());
            }
            Err(DiffError::Gap { expected, found }) => {
                return self.defer_gap(state, expected, found).await;
            }
        };

        let phase = next_phase(state.phase, snapshot.status, delta.is_empty());
        // The game row only turns final on the finalizing -> final
        // transition, after the confirmation poll absorbed late corrections.
        let game_status = match phase {
            SyncPhase::Final => GameStatus::Final,
            _ => GameStatus::InProgress,
        };

        let batch = SyncBatch {
            game: snapshot.to_game(game_status),
            drives: snapshot.drives.iter().map(|d| d.to_drive(game_id)).collect(),
            state: GameSyncState {
                game_id: game_id.to_string(),
                phase,
                watermark: state.watermark.max(delta.max_seq),
                gap_cycles: 0,
            },
            new_plays: delta.new_plays,
            corrected_plays: delta.corrected_plays,
            stats: delta.stats,
        };
        let applied = self.writer.apply_sync(batch).await?;

        let status = if applied.total() > 0 { PollStatus::Applied } else { PollStatus::UpToDate };
        tracing::debug!(
            game_id,
            phase = %phase,
            new_plays = applied.new_plays,
            corrections = applied.corrected_plays,
            "Poll cycle committed"
        );
        Ok(PollOutcome {
            game_id: game_id.to_string(),
            phase,
            status,
            applied: applied.total(),
        })
    }

    /// Record a gap cycle. Within the budget the cycle is deferred with no
    /// data writes; beyond it the gap is surfaced as fatal for this game.
    async fn defer_gap(
        &self,
        state: GameSyncState,
        expected: u32,
        found: u32,
    ) -> Result<PollOutcome, SyncError> {
        let cycles = state.gap_cycles + 1;
        if cycles > self.opts.gap_retry_budget {
            return Err(SyncError::SequenceGap {
                game_id: state.game_id,
                expected,
                found,
                cycles,
            });
        }

        tracing::warn!(
            game_id = %state.game_id,
            expected,
            found,
            cycles,
            budget = self.opts.gap_retry_budget,
            "Delta does not attach to watermark, deferring"
        );
        let phase = if state.phase == SyncPhase::Scheduled { SyncPhase::Polling } else { state.phase };
        let deferred = GameSyncState { phase, gap_cycles: cycles, ..state };
        self.writer.save_sync_state(deferred.clone()).await?;

        Ok(PollOutcome {
            game_id: deferred.game_id,
            phase,
            status: PollStatus::GapDeferred,
            applied: 0,
        })
    }

    /// Refresh rosters for the given teams, skipping any team refreshed
    /// more recently than the minimum interval.
    pub async fn refresh_rosters(&self, team_ids: &[String]) -> Result<RosterOutcome, SyncError> {
        let min_interval = chrono::Duration::from_std(self.opts.roster_min_interval)
            .unwrap_or_else(|_| chrono::Duration::hours(12));
        let mut outcome = RosterOutcome::default();

        for team_id in team_ids {
            if let Some(last) = self.reader.roster_refreshed_at(team_id)?
                && chrono::Utc::now() - last < min_interval
            {
                outcome.skipped += 1;
                continue;
            }

            let snapshot =
                tokio::time::timeout(self.opts.poll_timeout, self.feed.roster_snapshot(team_id))
                    .await
                    .map_err(|_| SyncError::Timeout {
                        game_id: team_id.clone(),
                        timeout: self.opts.poll_timeout,
                    })??;
            let applied = self.writer.upsert_roster(snapshot.team, snapshot.players).await?;

            outcome.refreshed += 1;
            outcome.players += applied.players;
            tracing::info!(
                team_id,
                players = applied.players,
                opened = applied.opened,
                closed = applied.closed,
                "Roster refreshed"
            );
        }
        Ok(outcome)
    }

    /// Pull the feed's schedule and insert newly observed games.
    pub async fn sync_schedule(&self) -> Result<u64, SyncError> {
        let games = tokio::time::timeout(self.opts.poll_timeout, self.feed.current_schedule())
            .await
            .map_err(|_| SyncError::Timeout {
                game_id: "schedule".to_string(),
                timeout: self.opts.poll_timeout,
            })??;
        let inserted = self.writer.upsert_schedule(games).await?;
        if inserted > 0 {
            tracing::info!(inserted, "New games observed in schedule");
        }
        Ok(inserted)
    }
}

/// Decide the next state-machine phase from the feed's reported status.
fn next_phase(current: SyncPhase, feed_status: GameStatus, delta_empty: bool) -> SyncPhase {
    match feed_status {
        GameStatus::Scheduled => current,
        GameStatus::InProgress => SyncPhase::Polling,
        GameStatus::Final => {
            // The confirmation poll must find no further deltas before the
            // game is frozen.
            if current == SyncPhase::Finalizing && delta_empty {
                SyncPhase::Final
            } else {
                SyncPhase::Finalizing
            }
        }
    }
}

/// Partition the snapshot's plays into the new suffix above the watermark
/// and hash-detected corrections below it.
fn diff(
    game_id: &str,
    snapshot: &GameSnapshot,
    stored: &HashMap<u32, u64>,
    watermark: u32,
) -> Result<Delta, DiffError> {
    let mut delta = Delta::default();

    let mut new: Vec<_> = snapshot.plays.iter().filter(|p| p.play_seq > watermark).collect();
    new.sort_by_key(|p| p.play_seq);
    for pair in new.windows(2) {
        if pair[0].play_seq == pair[1].play_seq {
            return Err(DiffError::DuplicateSeq(pair[0].play_seq));
        }
    }

    // The suffix must attach contiguously: sequences are dense per game, so
    // the i-th new play must be watermark + 1 + i.
    for (i, play) in new.iter().enumerate() {
        let expected = watermark + 1 + i as u32;
        if play.play_seq != expected {
            return Err(DiffError::Gap { expected, found: play.play_seq });
        }
    }

    for play in &new {
        delta.new_plays.push(play.to_play(game_id));
        delta.stats.extend(play.to_stats(game_id));
        delta.max_seq = play.play_seq;
    }

    // Already-committed plays are never re-derived; upstream corrections
    // are detected by content hash instead.
    for play in snapshot.plays.iter().filter(|p| p.play_seq <= watermark) {
        let changed = stored.get(&play.play_seq).is_none_or(|h| *h != play.content_hash());
        if changed {
            delta.corrected_plays.push(play.to_play(game_id));
            delta.stats.extend(play.to_stats(game_id));
        }
    }

    Ok(delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::feed::PlaySnapshot;
    use crate::types::SeasonPhase;
    use chrono::Utc;

    fn snapshot(plays: Vec<PlaySnapshot>) -> GameSnapshot {
        GameSnapshot {
            game_id: "g1".to_string(),
            season: 2012,
            week: 1,
            phase: SeasonPhase::Regular,
            status: GameStatus::InProgress,
            home_team: "NE".to_string(),
            away_team: "NYJ".to_string(),
            home_score: 0,
            away_score: 0,
            start_time: Utc::now(),
            drives: vec![],
            plays,
        }
    }

    fn play(seq: u32, desc: &str) -> PlaySnapshot {
        PlaySnapshot {
            play_seq: seq,
            drive_seq: 1,
            description: desc.to_string(),
            stats: vec![],
        }
    }

    fn hashes(plays: &[PlaySnapshot]) -> HashMap<u32, u64> {
        plays.iter().map(|p| (p.play_seq, p.content_hash())).collect()
    }

    #[test]
    fn test_diff_applies_only_the_new_suffix() {
        let committed = vec![play(1, "a"), play(2, "b"), play(3, "c")];
        let snap = snapshot(vec![play(1, "a"), play(2, "b"), play(3, "c"), play(4, "d"), play(5, "e")]);

        let delta = diff("g1", &snap, &hashes(&committed), 3).unwrap();
        assert_eq!(delta.new_plays.len(), 2);
        assert_eq!(delta.new_plays[0].play_seq, 4);
        assert_eq!(delta.new_plays[1].play_seq, 5);
        assert!(delta.corrected_plays.is_empty());
        assert_eq!(delta.max_seq, 5);
    }

    #[test]
    fn test_diff_identical_snapshot_is_empty() {
        let committed = vec![play(1, "a"), play(2, "b")];
        let snap = snapshot(committed.clone());

        let delta = diff("g1", &snap, &hashes(&committed), 2).unwrap();
        assert!(delta.is_empty());
        assert_eq!(delta.applied(), 0);
    }

    #[test]
    fn test_diff_detects_correction_by_content_hash() {
        let committed = vec![play(1, "a"), play(2, "b")];
        let snap = snapshot(vec![play(1, "a"), play(2, "b (edited upstream)")]);

        let delta = diff("g1", &snap, &hashes(&committed), 2).unwrap();
        assert!(delta.new_plays.is_empty());
        assert_eq!(delta.corrected_plays.len(), 1);
        assert_eq!(delta.corrected_plays[0].play_seq, 2);
    }

    #[test]
    fn test_diff_rejects_gap() {
        let committed = vec![play(1, "a"), play(2, "b"), play(3, "c")];
        // Play 4 is missing; the delta must not be applied.
        let snap = snapshot(vec![play(1, "a"), play(2, "b"), play(3, "c"), play(5, "e")]);

        match diff("g1", &snap, &hashes(&committed), 3) {
            Err(DiffError::Gap { expected, found }) => {
                assert_eq!(expected, 4);
                assert_eq!(found, 5);
            }
            other => panic!("expected gap, got {other:?}"),
        }
    }

    #[test]
    fn test_diff_rejects_duplicate_sequence() {
        let snap = snapshot(vec![play(1, "a"), play(1, "also a")]);
        assert!(matches!(
            diff("g1", &snap, &HashMap::new(), 0),
            Err(DiffError::DuplicateSeq(1))
        ));
    }

    #[test]
    fn test_next_phase_transitions() {
        use GameStatus::*;
        use SyncPhase as P;

        assert_eq!(next_phase(P::Scheduled, InProgress, false), P::Polling);
        assert_eq!(next_phase(P::Polling, InProgress, false), P::Polling);
        assert_eq!(next_phase(P::Polling, Final, false), P::Finalizing);
        // First final poll with no deltas still requires confirmation.
        assert_eq!(next_phase(P::Polling, Final, true), P::Finalizing);
        assert_eq!(next_phase(P::Finalizing, Final, false), P::Finalizing);
        assert_eq!(next_phase(P::Finalizing, Final, true), P::Final);
    }
}
