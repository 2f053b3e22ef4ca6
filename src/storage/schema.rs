//! Database schema definitions and migrations.
//!
//! All schema evolution is additive (new optional columns or tables) so
//! historical data stays queryable without reprocessing. The current schema
//! version lives in the `meta` table; `init_schema` is idempotent and brings
//! an older database forward.

use duckdb::Connection;

use crate::storage::StorageError;

/// Schema version written by this build. Bump only with additive migrations.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL enum types used by the tables below.
pub const ENUMS_DDL: &str = r#"
CREATE TYPE IF NOT EXISTS season_phase_enum AS ENUM ('Preseason', 'Regular', 'Postseason');
CREATE TYPE IF NOT EXISTS game_status_enum AS ENUM ('scheduled', 'in_progress', 'final');
CREATE TYPE IF NOT EXISTS sync_phase_enum AS ENUM ('scheduled', 'polling', 'finalizing', 'final');
CREATE TYPE IF NOT EXISTS stat_category_enum AS ENUM (
    'passing_yds', 'passing_tds', 'passing_int',
    'rushing_yds', 'rushing_tds',
    'receiving_yds', 'receiving_tds', 'receptions',
    'fumbles_lost', 'defense_sack'
);
"#;

/// Reference data: teams and players.
///
/// `roster_refreshed_at` is the per-team roster refresh watermark.
pub const TEAM_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS team (
    team_id             VARCHAR PRIMARY KEY,
    city                VARCHAR NOT NULL,
    name                VARCHAR NOT NULL,
    roster_refreshed_at BIGINT
);
"#;

pub const PLAYER_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS player (
    player_id    VARCHAR PRIMARY KEY,
    full_name    VARCHAR NOT NULL,
    position     VARCHAR NOT NULL,
    status       VARCHAR NOT NULL,
    time_updated BIGINT NOT NULL
);
"#;

/// Time-scoped roster membership. An open row has `effective_to` NULL.
pub const ROSTER_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS roster (
    team_id        VARCHAR NOT NULL,
    player_id      VARCHAR NOT NULL,
    effective_from BIGINT NOT NULL,
    effective_to   BIGINT,
    PRIMARY KEY (team_id, player_id, effective_from)
);
"#;

pub const GAME_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS game (
    game_id       VARCHAR PRIMARY KEY,
    season        SMALLINT NOT NULL,
    week          SMALLINT NOT NULL,
    season_phase  season_phase_enum NOT NULL,
    status        game_status_enum NOT NULL,
    home_team     VARCHAR NOT NULL,
    away_team     VARCHAR NOT NULL,
    home_score    SMALLINT NOT NULL,
    away_score    SMALLINT NOT NULL,
    start_time    BIGINT NOT NULL,
    time_inserted BIGINT NOT NULL,
    time_updated  BIGINT NOT NULL
);
"#;

pub const DRIVE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS drive (
    game_id     VARCHAR NOT NULL,
    drive_seq   INTEGER NOT NULL,
    pos_team    VARCHAR NOT NULL,
    start_field SMALLINT NOT NULL,
    end_field   SMALLINT NOT NULL,
    result      VARCHAR NOT NULL,
    play_count  SMALLINT NOT NULL,
    PRIMARY KEY (game_id, drive_seq)
);
"#;

/// Plays are keyed by (game, sequence number); the sequence is unique within
/// the game and strictly increasing in feed arrival order.
pub const PLAY_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS play (
    game_id       VARCHAR NOT NULL,
    play_seq      INTEGER NOT NULL,
    drive_seq     INTEGER NOT NULL,
    description   VARCHAR NOT NULL,
    content_hash  UBIGINT NOT NULL,
    time_inserted BIGINT NOT NULL,
    time_updated  BIGINT NOT NULL,
    PRIMARY KEY (game_id, play_seq)
);
"#;

/// Sparse per-player statistics. Logically detachable: nothing else
/// references this table, and game-only queries never touch it.
pub const PLAY_STAT_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS play_stat (
    game_id   VARCHAR NOT NULL,
    play_seq  INTEGER NOT NULL,
    player_id VARCHAR NOT NULL,
    category  stat_category_enum NOT NULL,
    value     BIGINT NOT NULL,
    PRIMARY KEY (game_id, play_seq, player_id, category)
);
"#;

/// Per-game sync state machine, persisted so a restarted pipeline resumes
/// from the last committed watermark.
pub const SYNC_STATE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_state (
    game_id    VARCHAR PRIMARY KEY,
    phase      sync_phase_enum NOT NULL,
    watermark  INTEGER NOT NULL,
    gap_cycles INTEGER NOT NULL,
    updated_at BIGINT NOT NULL
);
"#;

pub const META_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    version      BIGINT NOT NULL,
    season       SMALLINT,
    week         SMALLINT,
    season_phase season_phase_enum
);
"#;

/// Initialize the database schema.
///
/// Creates all tables and enums if missing, seeds the `meta` row, and
/// applies any pending additive migrations.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(ENUMS_DDL)?;
    conn.execute_batch(TEAM_TABLE_DDL)?;
    conn.execute_batch(PLAYER_TABLE_DDL)?;
    conn.execute_batch(ROSTER_TABLE_DDL)?;
    conn.execute_batch(GAME_TABLE_DDL)?;
    conn.execute_batch(DRIVE_TABLE_DDL)?;
    conn.execute_batch(PLAY_TABLE_DDL)?;
    conn.execute_batch(PLAY_STAT_TABLE_DDL)?;
    conn.execute_batch(SYNC_STATE_TABLE_DDL)?;
    conn.execute_batch(META_TABLE_DDL)?;

    let version = schema_version(conn)?;
    match version {
        None => {
            conn.execute("INSERT INTO meta (version) VALUES (?)", [SCHEMA_VERSION])?;
        }
        Some(v) if v > SCHEMA_VERSION => {
            return Err(StorageError::InvalidData(format!(
                "database schema version {v} is newer than supported version {SCHEMA_VERSION}"
            )));
        }
        Some(v) if v < SCHEMA_VERSION => {
            migrate(conn, v)?;
        }
        Some(_) => {}
    }

    tracing::info!(version = SCHEMA_VERSION, "Database schema initialized");
    Ok(())
}

/// Current schema version, or `None` for a freshly created database.
pub fn schema_version(conn: &Connection) -> Result<Option<i64>, StorageError> {
    let mut stmt = conn.prepare("SELECT version FROM meta LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

/// Apply additive migrations from `from` up to [`SCHEMA_VERSION`].
fn migrate(conn: &Connection, from: i64) -> Result<(), StorageError> {
    for version in (from + 1)..=SCHEMA_VERSION {
        // Version 1 is the base schema created by init_schema; future
        // versions add their DDL here before the version bump.
        conn.execute("UPDATE meta SET version = ?", [version])?;
        tracing::info!(version, "Applied schema migration");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection, name: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in [
            "team",
            "player",
            "roster",
            "game",
            "drive",
            "play",
            "play_stat",
            "sync_state",
            "meta",
        ] {
            assert_eq!(table_count(&conn, table), 1, "missing table {table}");
        }
        assert_eq!(schema_version(&conn).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_reinit_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let meta_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(meta_rows, 1);
    }

    #[test]
    fn test_play_upsert_by_natural_key() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO play (game_id, play_seq, drive_seq, description, content_hash, time_inserted, time_updated)
             VALUES ('2012090500', 1, 1, 'Kickoff', 10, 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO play (game_id, play_seq, drive_seq, description, content_hash, time_inserted, time_updated)
             VALUES ('2012090500', 1, 1, 'Kickoff (corrected)', 11, 0, 1)
             ON CONFLICT (game_id, play_seq) DO UPDATE SET
                 description = EXCLUDED.description,
                 content_hash = EXCLUDED.content_hash,
                 time_updated = EXCLUDED.time_updated",
            [],
        )
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM play", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let desc: String = conn
            .query_row(
                "SELECT description FROM play WHERE game_id = '2012090500' AND play_seq = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(desc, "Kickoff (corrected)");
    }
}
