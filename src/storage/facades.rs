//! User-facing storage facades.
//!
//! - `StorageWriter`: commands to the single writer thread; each call
//!   resolves once its transaction committed (or failed)
//! - `SyncReader`: the sync pipeline's read surface (state, hashes,
//!   tracked games); all reads see committed data only

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::storage::StorageError;
use crate::storage::actor::{Command, RosterApplied, SyncApplied, SyncBatch};
use crate::storage::pool::ReadPool;
use crate::types::{Game, GameStatus, GameSyncState, Player, RosterEntry, SyncPhase, Team};

/// Handle for submitting writes to the writer actor.
///
/// Commands are enqueued with `try_send`: when the channel is full the call
/// fails with [`StorageError::ChannelSend`] and the caller retries on its
/// next cycle instead of blocking the runtime.
#[derive(Clone)]
pub struct StorageWriter {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for StorageWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageWriter").finish_non_exhaustive()
    }
}

impl StorageWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, StorageError>>) -> Command,
    ) -> Result<T, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx.try_send(make(reply)).map_err(|_| StorageError::ChannelSend)?;
        rx.await.map_err(|_| StorageError::ChannelSend)?
    }

    /// Apply one poll cycle's batch atomically. Resolves with the applied
    /// delta counts after the transaction committed.
    pub async fn apply_sync(&self, batch: SyncBatch) -> Result<SyncApplied, StorageError> {
        self.submit(|reply| Command::ApplySync { batch: Box::new(batch), reply }).await
    }

    /// Persist sync state without any data writes.
    pub async fn save_sync_state(&self, state: GameSyncState) -> Result<(), StorageError> {
        self.submit(|reply| Command::SaveSyncState { state, reply }).await
    }

    /// Insert newly observed games; returns how many were new.
    pub async fn upsert_schedule(&self, games: Vec<Game>) -> Result<u64, StorageError> {
        self.submit(|reply| Command::UpsertSchedule { games, reply }).await
    }

    /// Apply a roster snapshot for one team.
    pub async fn upsert_roster(
        &self,
        team: Team,
        players: Vec<Player>,
    ) -> Result<RosterApplied, StorageError> {
        self.submit(|reply| Command::UpsertRoster { team, players, reply }).await
    }

    /// Request writer shutdown. Pending commands ahead of this one still run.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.tx.try_send(Command::Shutdown).map_err(|_| StorageError::ChannelSend)
    }
}

/// Read surface for the sync pipeline.
#[derive(Clone)]
pub struct SyncReader {
    pool: Arc<ReadPool>,
}

impl std::fmt::Debug for SyncReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReader").finish_non_exhaustive()
    }
}

impl SyncReader {
    pub(crate) fn new(pool: Arc<ReadPool>) -> Self {
        Self { pool }
    }

    /// Persisted sync state for a game, if any.
    pub fn sync_state(&self, game_id: &str) -> Result<Option<GameSyncState>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT phase::VARCHAR, watermark, gap_cycles FROM sync_state WHERE game_id = ?",
        )?;
        let mut rows = stmt.query([game_id])?;
        match rows.next()? {
            Some(row) => {
                let phase: String = row.get(0)?;
                let phase = SyncPhase::from_str(&phase)
                    .map_err(|_| StorageError::InvalidData(format!("unknown sync phase: {phase}")))?;
                Ok(Some(GameSyncState {
                    game_id: game_id.to_string(),
                    phase,
                    watermark: row.get::<_, i64>(1)?.try_into().unwrap_or(0),
                    gap_cycles: row.get::<_, i64>(2)?.try_into().unwrap_or(0),
                }))
            }
            None => Ok(None),
        }
    }

    /// Content hashes of all committed plays for a game, keyed by sequence.
    pub fn play_hashes(&self, game_id: &str) -> Result<HashMap<u32, u64>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT play_seq, content_hash FROM play WHERE game_id = ?")?;
        let rows = stmt.query_map([game_id], |row| {
            Ok((row.get::<_, i64>(0)? as u32, row.get::<_, u64>(1)?))
        })?;
        rows.collect::<Result<HashMap<_, _>, _>>().map_err(StorageError::from)
    }

    /// Stored finishing status of a game.
    pub fn game_status(&self, game_id: &str) -> Result<Option<GameStatus>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare("SELECT status::VARCHAR FROM game WHERE game_id = ?")?;
        let mut rows = stmt.query([game_id])?;
        match rows.next()? {
            Some(row) => {
                let status: String = row.get(0)?;
                GameStatus::from_str(&status)
                    .map(Some)
                    .map_err(|_| StorageError::InvalidData(format!("unknown game status: {status}")))
            }
            None => Ok(None),
        }
    }

    /// Game ids that are not yet final, in schedule order. These are the
    /// games the poll registry should track.
    pub fn unfinished_games(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT game_id FROM game WHERE status != 'final' ORDER BY start_time, game_id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    /// All roster membership rows for a team, open rows first, then by
    /// player id.
    pub fn roster(&self, team_id: &str) -> Result<Vec<RosterEntry>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT player_id, effective_from, effective_to FROM roster
             WHERE team_id = ?
             ORDER BY effective_to IS NOT NULL, player_id, effective_from",
        )?;
        let rows = stmt.query_map([team_id], |row| {
            let from: i64 = row.get(1)?;
            let to: Option<i64> = row.get(2)?;
            Ok(RosterEntry {
                team_id: team_id.to_string(),
                player_id: row.get(0)?,
                effective_from: DateTime::from_timestamp_micros(from)
                    .unwrap_or(DateTime::UNIX_EPOCH),
                effective_to: to.and_then(DateTime::from_timestamp_micros),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    /// Per-team roster refresh watermark.
    pub fn roster_refreshed_at(
        &self,
        team_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StorageError> {
        let conn = self.pool.get()?;
        let mut stmt =
            conn.prepare("SELECT roster_refreshed_at FROM team WHERE team_id = ?")?;
        let mut rows = stmt.query([team_id])?;
        match rows.next()? {
            Some(row) => {
                let micros: Option<i64> = row.get(0)?;
                Ok(micros.and_then(DateTime::from_timestamp_micros))
            }
            None => Ok(None),
        }
    }
}
