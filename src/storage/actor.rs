//! Writer actor with a dedicated connection and MPSC command channel.
//!
//! Single-writer pattern: one thread owns the write connection and processes
//! commands sequentially. Each data command executes inside one transaction
//! and answers the caller over a oneshot channel, so a sync cycle can commit
//! atomically and only then advance its watermark.

use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use chrono::Utc;
use duckdb::{Connection, Transaction, params};
use tokio::sync::oneshot;

use crate::storage::StorageError;
use crate::storage::schema::init_schema;
use crate::types::{Drive, Game, GameStatus, GameSyncState, Play, PlayStat, Player, Team};

/// Reply channel carried by every data command.
pub type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// One poll cycle's worth of writes, committed atomically.
#[derive(Debug)]
pub struct SyncBatch {
    pub game: Game,
    pub drives: Vec<Drive>,
    /// Plays above the previous watermark, in sequence order.
    pub new_plays: Vec<Play>,
    /// Already-committed plays whose feed content hash changed.
    pub corrected_plays: Vec<Play>,
    /// Statistics for every play in `new_plays` and `corrected_plays`.
    pub stats: Vec<PlayStat>,
    /// State-machine row to persist alongside the data.
    pub state: GameSyncState,
}

/// Row counts applied by a [`SyncBatch`] commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncApplied {
    pub new_plays: u64,
    pub corrected_plays: u64,
    pub stats: u64,
}

impl SyncApplied {
    /// Total number of applied deltas, for observability.
    pub fn total(&self) -> u64 {
        self.new_plays + self.corrected_plays + self.stats
    }
}

/// Row counts applied by a roster refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RosterApplied {
    pub players: u64,
    pub opened: u64,
    pub closed: u64,
}

/// Commands sent to the writer actor.
pub enum Command {
    /// Apply one poll cycle atomically.
    ApplySync { batch: Box<SyncBatch>, reply: Reply<SyncApplied> },
    /// Persist sync state alone (e.g. a gap cycle that applied no data).
    SaveSyncState { state: GameSyncState, reply: Reply<()> },
    /// Insert newly observed games from the feed schedule.
    UpsertSchedule { games: Vec<Game>, reply: Reply<u64> },
    /// Apply a roster snapshot for one team.
    UpsertRoster { team: Team, players: Vec<Player>, reply: Reply<RosterApplied> },
    /// Graceful shutdown.
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApplySync { batch, .. } => {
                f.debug_struct("ApplySync").field("game_id", &batch.game.game_id).finish()
            }
            Self::SaveSyncState { state, .. } => {
                f.debug_struct("SaveSyncState").field("game_id", &state.game_id).finish()
            }
            Self::UpsertSchedule { games, .. } => {
                f.debug_struct("UpsertSchedule").field("games", &games.len()).finish()
            }
            Self::UpsertRoster { team, .. } => {
                f.debug_struct("UpsertRoster").field("team_id", &team.team_id).finish()
            }
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// Database writer actor.
pub struct DbActor {
    conn: Connection,
    rx: Receiver<Command>,
}

impl DbActor {
    /// Spawn the writer actor thread.
    ///
    /// Returns the thread handle and the command sender. The connection is
    /// opened and the schema initialized before the thread starts, so a
    /// build error is reported synchronously.
    pub fn spawn(
        db_path: &Path,
        channel_capacity: usize,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>), StorageError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);
        let conn = Connection::open(db_path)?;
        init_schema(&conn)?;

        let mut actor = DbActor { conn, rx };
        let handle = thread::spawn(move || actor.run());

        Ok((handle, tx))
    }

    fn run(&mut self) {
        tracing::info!("DbActor started");

        while let Ok(cmd) = self.rx.recv() {
            if self.handle_command(cmd) {
                break;
            }
        }

        tracing::info!("DbActor stopped");
    }

    /// Returns `true` when shutdown was requested.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::ApplySync { batch, reply } => {
                let result = self.with_conflict_retry(|conn| apply_sync(conn, &batch));
                let _ = reply.send(result);
            }
            Command::SaveSyncState { state, reply } => {
                let result = self.with_conflict_retry(|conn| {
                    let tx = conn.transaction()?;
                    save_sync_state(&tx, &state)?;
                    tx.commit().map_err(StorageError::from_commit)
                });
                let _ = reply.send(result);
            }
            Command::UpsertSchedule { games, reply } => {
                let result = self.with_conflict_retry(|conn| upsert_schedule(conn, &games));
                let _ = reply.send(result);
            }
            Command::UpsertRoster { team, players, reply } => {
                let result =
                    self.with_conflict_retry(|conn| upsert_roster(conn, &team, &players));
                let _ = reply.send(result);
            }
            Command::Shutdown => {
                tracing::info!("DbActor shutting down");
                return true;
            }
        }
        false
    }

    /// Run an operation, retrying once on a transaction conflict.
    ///
    /// Conflicts should not occur under the single-writer design; the retry
    /// is a safety net and a second failure is surfaced to the caller.
    fn with_conflict_retry<T>(
        &mut self,
        op: impl Fn(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        match op(&mut self.conn) {
            Err(StorageError::Conflict(msg)) => {
                tracing::warn!(error = %msg, "Transaction conflict, retrying once");
                op(&mut self.conn)
            }
            other => other,
        }
    }
}

// =============================================================================
// Write Operations
// =============================================================================

fn apply_sync(conn: &mut Connection, batch: &SyncBatch) -> Result<SyncApplied, StorageError> {
    let now = Utc::now().timestamp_micros();
    let tx = conn.transaction()?;

    upsert_game(&tx, &batch.game, now)?;
    for drive in &batch.drives {
        upsert_drive(&tx, drive)?;
    }

    let mut applied = SyncApplied::default();
    for play in &batch.new_plays {
        upsert_play(&tx, play, now)?;
        applied.new_plays += 1;
    }
    for play in &batch.corrected_plays {
        upsert_play(&tx, play, now)?;
        applied.corrected_plays += 1;
    }

    // Replace statistics for every touched play: a correction may drop a
    // stat line, which a bare upsert would leave behind.
    let mut touched: Vec<(&str, u32)> = batch
        .new_plays
        .iter()
        .chain(&batch.corrected_plays)
        .map(|p| (p.game_id.as_str(), p.play_seq))
        .collect();
    touched.dedup();
    for (game_id, play_seq) in touched {
        tx.execute(
            "DELETE FROM play_stat WHERE game_id = ? AND play_seq = ?",
            params![game_id, play_seq],
        )?;
    }
    for stat in &batch.stats {
        tx.prepare_cached(
            "INSERT INTO play_stat (game_id, play_seq, player_id, category, value)
             VALUES (?, ?, ?, ?, ?)",
        )?
        .execute(params![
            stat.game_id,
            stat.play_seq,
            stat.player_id,
            stat.category.as_ref(),
            stat.value,
        ])?;
        applied.stats += 1;
    }

    save_sync_state(&tx, &batch.state)?;
    tx.commit().map_err(StorageError::from_commit)?;

    tracing::debug!(
        game_id = %batch.game.game_id,
        new_plays = applied.new_plays,
        corrections = applied.corrected_plays,
        stats = applied.stats,
        "Sync batch committed"
    );
    Ok(applied)
}

/// Upsert a game row, never moving its status backwards.
fn upsert_game(tx: &Transaction<'_>, game: &Game, now: i64) -> Result<(), StorageError> {
    let stored: Option<String> = {
        let mut stmt = tx.prepare_cached("SELECT status::VARCHAR FROM game WHERE game_id = ?")?;
        let mut rows = stmt.query(params![game.game_id])?;
        match rows.next()? {
            Some(row) => Some(row.get(0)?),
            None => None,
        }
    };
    let status = match stored.as_deref().map(str::parse::<GameStatus>) {
        Some(Ok(current)) if current.rank() > game.status.rank() => current,
        _ => game.status,
    };

    tx.prepare_cached(
        "INSERT INTO game (game_id, season, week, season_phase, status, home_team, away_team,
                           home_score, away_score, start_time, time_inserted, time_updated)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (game_id) DO UPDATE SET
             status = EXCLUDED.status,
             home_score = EXCLUDED.home_score,
             away_score = EXCLUDED.away_score,
             start_time = EXCLUDED.start_time,
             time_updated = EXCLUDED.time_updated",
    )?
    .execute(params![
        game.game_id,
        game.season,
        game.week,
        game.phase.as_ref(),
        status.as_ref(),
        game.home_team,
        game.away_team,
        game.home_score,
        game.away_score,
        game.start_time.timestamp_micros(),
        now,
        now,
    ])?;
    Ok(())
}

fn upsert_drive(tx: &Transaction<'_>, drive: &Drive) -> Result<(), StorageError> {
    tx.prepare_cached(
        "INSERT INTO drive (game_id, drive_seq, pos_team, start_field, end_field, result, play_count)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (game_id, drive_seq) DO UPDATE SET
             pos_team = EXCLUDED.pos_team,
             start_field = EXCLUDED.start_field,
             end_field = EXCLUDED.end_field,
             result = EXCLUDED.result,
             play_count = EXCLUDED.play_count",
    )?
    .execute(params![
        drive.game_id,
        drive.drive_seq,
        drive.pos_team,
        drive.start_field,
        drive.end_field,
        drive.result,
        drive.play_count,
    ])?;
    Ok(())
}

fn upsert_play(tx: &Transaction<'_>, play: &Play, now: i64) -> Result<(), StorageError> {
    tx.prepare_cached(
        "INSERT INTO play (game_id, play_seq, drive_seq, description, content_hash,
                           time_inserted, time_updated)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (game_id, play_seq) DO UPDATE SET
             drive_seq = EXCLUDED.drive_seq,
             description = EXCLUDED.description,
             content_hash = EXCLUDED.content_hash,
             time_updated = EXCLUDED.time_updated",
    )?
    .execute(params![
        play.game_id,
        play.play_seq,
        play.drive_seq,
        play.description,
        play.content_hash,
        now,
        now,
    ])?;
    Ok(())
}

fn save_sync_state(tx: &Transaction<'_>, state: &GameSyncState) -> Result<(), StorageError> {
    tx.prepare_cached(
        "INSERT INTO sync_state (game_id, phase, watermark, gap_cycles, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (game_id) DO UPDATE SET
             phase = EXCLUDED.phase,
             watermark = EXCLUDED.watermark,
             gap_cycles = EXCLUDED.gap_cycles,
             updated_at = EXCLUDED.updated_at",
    )?
    .execute(params![
        state.game_id,
        state.phase.as_ref(),
        state.watermark,
        state.gap_cycles,
        Utc::now().timestamp_micros(),
    ])?;
    Ok(())
}

/// Insert newly observed games; refresh schedule fields of known ones
/// without touching their status.
fn upsert_schedule(conn: &mut Connection, games: &[Game]) -> Result<u64, StorageError> {
    let now = Utc::now().timestamp_micros();
    let tx = conn.transaction()?;
    let mut inserted = 0u64;

    for game in games {
        let n = tx
            .prepare_cached(
                "INSERT INTO game (game_id, season, week, season_phase, status, home_team,
                                   away_team, home_score, away_score, start_time,
                                   time_inserted, time_updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (game_id) DO NOTHING",
            )?
            .execute(params![
                game.game_id,
                game.season,
                game.week,
                game.phase.as_ref(),
                GameStatus::Scheduled.as_ref(),
                game.home_team,
                game.away_team,
                game.home_score,
                game.away_score,
                game.start_time.timestamp_micros(),
                now,
                now,
            ])?;
        if n > 0 {
            inserted += 1;
        } else {
            tx.prepare_cached(
                "UPDATE game SET start_time = ?, week = ?, time_updated = ? WHERE game_id = ?",
            )?
            .execute(params![
                game.start_time.timestamp_micros(),
                game.week,
                now,
                game.game_id,
            ])?;
        }
    }

    tx.commit().map_err(StorageError::from_commit)?;
    Ok(inserted)
}

fn upsert_roster(
    conn: &mut Connection,
    team: &Team,
    players: &[Player],
) -> Result<RosterApplied, StorageError> {
    let now = Utc::now().timestamp_micros();
    let tx = conn.transaction()?;
    let mut applied = RosterApplied::default();

    tx.prepare_cached(
        "INSERT INTO team (team_id, city, name, roster_refreshed_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (team_id) DO UPDATE SET
             city = EXCLUDED.city,
             name = EXCLUDED.name,
             roster_refreshed_at = EXCLUDED.roster_refreshed_at",
    )?
    .execute(params![team.team_id, team.city, team.name, now])?;

    for player in players {
        tx.prepare_cached(
            "INSERT INTO player (player_id, full_name, position, status, time_updated)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (player_id) DO UPDATE SET
                 full_name = EXCLUDED.full_name,
                 position = EXCLUDED.position,
                 status = EXCLUDED.status,
                 time_updated = EXCLUDED.time_updated",
        )?
        .execute(params![
            player.player_id,
            player.full_name,
            player.position,
            player.status,
            now,
        ])?;
        applied.players += 1;
    }

    // Close open membership rows for players no longer on the roster.
    let current: HashSet<&str> = players.iter().map(|p| p.player_id.as_str()).collect();
    let open: Vec<String> = {
        let mut stmt = tx.prepare_cached(
            "SELECT player_id FROM roster WHERE team_id = ? AND effective_to IS NULL",
        )?;
        let rows = stmt.query_map(params![team.team_id], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()?
    };
    for player_id in &open {
        if !current.contains(player_id.as_str()) {
            tx.prepare_cached(
                "UPDATE roster SET effective_to = ?
                 WHERE team_id = ? AND player_id = ? AND effective_to IS NULL",
            )?
            .execute(params![now, team.team_id, player_id])?;
            applied.closed += 1;
        }
    }

    // Open membership rows for arrivals.
    let open: HashSet<String> = open.into_iter().collect();
    for player in players {
        if !open.contains(&player.player_id) {
            tx.prepare_cached(
                "INSERT INTO roster (team_id, player_id, effective_from, effective_to)
                 VALUES (?, ?, ?, NULL)",
            )?
            .execute(params![team.team_id, player.player_id, now])?;
            applied.opened += 1;
        }
    }

    tx.commit().map_err(StorageError::from_commit)?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SyncPhase;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn test_game(game_id: &str, status: GameStatus) -> Game {
        Game {
            game_id: game_id.to_string(),
            season: 2012,
            week: 1,
            phase: crate::types::SeasonPhase::Regular,
            status,
            home_team: "NE".to_string(),
            away_team: "NYJ".to_string(),
            home_score: 0,
            away_score: 0,
            start_time: Utc.with_ymd_and_hms(2012, 9, 5, 17, 0, 0).unwrap(),
        }
    }

    fn test_play(game_id: &str, seq: u32, desc: &str) -> Play {
        Play {
            game_id: game_id.to_string(),
            play_seq: seq,
            drive_seq: 1,
            description: desc.to_string(),
            content_hash: u64::from(seq) * 7,
        }
    }

    fn batch(game: Game, new_plays: Vec<Play>, watermark: u32) -> SyncBatch {
        let game_id = game.game_id.clone();
        SyncBatch {
            game,
            drives: vec![],
            new_plays,
            corrected_plays: vec![],
            stats: vec![],
            state: GameSyncState {
                game_id,
                phase: SyncPhase::Polling,
                watermark,
                gap_cycles: 0,
            },
        }
    }

    #[test]
    fn test_apply_sync_commits_atomically() {
        let dir = tempdir().unwrap();
        let mut conn = Connection::open(dir.path().join("t.db")).unwrap();
        init_schema(&conn).unwrap();

        let plays = vec![test_play("g1", 1, "Kickoff"), test_play("g1", 2, "Run for 3")];
        let applied = apply_sync(
            &mut conn,
            &batch(test_game("g1", GameStatus::InProgress), plays, 2),
        )
        .unwrap();

        assert_eq!(applied.new_plays, 2);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM play WHERE game_id = 'g1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);

        let watermark: i64 = conn
            .query_row("SELECT watermark FROM sync_state WHERE game_id = 'g1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(watermark, 2);
    }

    #[test]
    fn test_game_status_never_moves_backwards() {
        let dir = tempdir().unwrap();
        let mut conn = Connection::open(dir.path().join("t.db")).unwrap();
        init_schema(&conn).unwrap();

        apply_sync(&mut conn, &batch(test_game("g1", GameStatus::Final), vec![], 0)).unwrap();
        apply_sync(&mut conn, &batch(test_game("g1", GameStatus::InProgress), vec![], 0))
            .unwrap();

        let status: String = conn
            .query_row("SELECT status::VARCHAR FROM game WHERE game_id = 'g1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(status, "final");
    }

    #[test]
    fn test_correction_replaces_stat_lines() {
        let dir = tempdir().unwrap();
        let mut conn = Connection::open(dir.path().join("t.db")).unwrap();
        init_schema(&conn).unwrap();

        let mut first = batch(
            test_game("g1", GameStatus::InProgress),
            vec![test_play("g1", 1, "Pass deep for 20")],
            1,
        );
        first.stats = vec![
            PlayStat {
                game_id: "g1".to_string(),
                play_seq: 1,
                player_id: "P1".to_string(),
                category: crate::types::StatCategory::PassingYds,
                value: 20,
            },
            PlayStat {
                game_id: "g1".to_string(),
                play_seq: 1,
                player_id: "P2".to_string(),
                category: crate::types::StatCategory::ReceivingYds,
                value: 20,
            },
        ];
        apply_sync(&mut conn, &first).unwrap();

        // Correction drops the receiving line entirely.
        let mut second = batch(test_game("g1", GameStatus::InProgress), vec![], 1);
        second.corrected_plays = vec![test_play("g1", 1, "Pass deep for 18")];
        second.stats = vec![PlayStat {
            game_id: "g1".to_string(),
            play_seq: 1,
            player_id: "P1".to_string(),
            category: crate::types::StatCategory::PassingYds,
            value: 18,
        }];
        let applied = apply_sync(&mut conn, &second).unwrap();
        assert_eq!(applied.corrected_plays, 1);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM play_stat WHERE game_id = 'g1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
        let value: i64 = conn
            .query_row("SELECT value FROM play_stat WHERE player_id = 'P1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(value, 18);
    }

    #[test]
    fn test_upsert_schedule_counts_new_games_only() {
        let dir = tempdir().unwrap();
        let mut conn = Connection::open(dir.path().join("t.db")).unwrap();
        init_schema(&conn).unwrap();

        let games = vec![test_game("g1", GameStatus::Scheduled), test_game("g2", GameStatus::Scheduled)];
        assert_eq!(upsert_schedule(&mut conn, &games).unwrap(), 2);
        assert_eq!(upsert_schedule(&mut conn, &games).unwrap(), 0);
    }

    #[test]
    fn test_roster_refresh_scopes_membership() {
        let dir = tempdir().unwrap();
        let mut conn = Connection::open(dir.path().join("t.db")).unwrap();
        init_schema(&conn).unwrap();

        let team = Team {
            team_id: "NE".to_string(),
            city: "New England".to_string(),
            name: "Patriots".to_string(),
            roster_refreshed_at: None,
        };
        let player = |id: &str| Player {
            player_id: id.to_string(),
            full_name: format!("Player {id}"),
            position: "QB".to_string(),
            status: "Active".to_string(),
        };

        let applied = upsert_roster(&mut conn, &team, &[player("P1"), player("P2")]).unwrap();
        assert_eq!(applied.opened, 2);

        // Same snapshot again: idempotent.
        let applied = upsert_roster(&mut conn, &team, &[player("P1"), player("P2")]).unwrap();
        assert_eq!(applied.opened, 0);
        assert_eq!(applied.closed, 0);

        // P2 departs, P3 arrives.
        let applied = upsert_roster(&mut conn, &team, &[player("P1"), player("P3")]).unwrap();
        assert_eq!(applied.opened, 1);
        assert_eq!(applied.closed, 1);

        let open: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM roster WHERE team_id = 'NE' AND effective_to IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(open, 2);
    }

    #[test]
    fn test_actor_lifecycle() {
        let dir = tempdir().unwrap();
        let (handle, tx) = DbActor::spawn(&dir.path().join("t.db"), 16).unwrap();
        tx.send(Command::Shutdown).unwrap();
        handle.join().unwrap();
    }
}
