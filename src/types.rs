//! Core domain types shared by the storage, query and sync layers.
//!
//! This module defines the entities of the fixed schema:
//!
//! - [`Game`], [`Drive`], [`Play`], [`PlayStat`]: the play-by-play hierarchy
//! - [`Team`], [`Player`], [`RosterEntry`]: reference data on a slower cycle
//! - [`SeasonPhase`], [`GameStatus`], [`StatCategory`]: closed enumerations
//!   stored as SQL enum columns
//!
//! All aggregate statistics are derived from `PlayStat` rows at query time;
//! no table stores a running total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Phase of a season.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum SeasonPhase {
    Preseason,
    Regular,
    Postseason,
}

/// Finishing state of a game.
///
/// Transitions are forward-only: scheduled -> in_progress -> final. The
/// storage writer rejects any write that would move a game backwards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
}

impl GameStatus {
    /// Position in the forward-only lifecycle.
    pub fn rank(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::InProgress => 1,
            Self::Final => 2,
        }
    }
}

/// Per-player statistic category.
///
/// The set is closed on purpose: each variant maps to one pivot column in
/// aggregate-mode query results, and growing the set is an additive schema
/// migration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StatCategory {
    PassingYds,
    PassingTds,
    PassingInt,
    RushingYds,
    RushingTds,
    ReceivingYds,
    ReceivingTds,
    Receptions,
    FumblesLost,
    DefenseSack,
}

impl StatCategory {
    /// All categories, in pivot-column order.
    pub const ALL: [Self; 10] = [
        Self::PassingYds,
        Self::PassingTds,
        Self::PassingInt,
        Self::RushingYds,
        Self::RushingTds,
        Self::ReceivingYds,
        Self::ReceivingTds,
        Self::Receptions,
        Self::FumblesLost,
        Self::DefenseSack,
    ];

    /// SQL column name used for this category in aggregate results.
    pub fn column(self) -> &'static str {
        match self {
            Self::PassingYds => "passing_yds",
            Self::PassingTds => "passing_tds",
            Self::PassingInt => "passing_int",
            Self::RushingYds => "rushing_yds",
            Self::RushingTds => "rushing_tds",
            Self::ReceivingYds => "receiving_yds",
            Self::ReceivingTds => "receiving_tds",
            Self::Receptions => "receptions",
            Self::FumblesLost => "fumbles_lost",
            Self::DefenseSack => "defense_sack",
        }
    }
}

/// Phase of the per-game synchronization state machine.
///
/// `scheduled -> polling -> finalizing -> final`, forward-only. A game in
/// `final` is excluded from polling and a poll against it is a no-op.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SyncPhase {
    Scheduled,
    Polling,
    Finalizing,
    Final,
}

impl SyncPhase {
    /// Position in the forward-only lifecycle.
    pub fn rank(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::Polling => 1,
            Self::Finalizing => 2,
            Self::Final => 3,
        }
    }
}

/// Persisted per-game synchronization state.
///
/// `watermark` is the highest play sequence number successfully committed
/// for the game (0 before any play lands); `gap_cycles` counts consecutive
/// poll cycles whose delta failed to attach contiguously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSyncState {
    pub game_id: String,
    pub phase: SyncPhase,
    pub watermark: u32,
    pub gap_cycles: u32,
}

impl GameSyncState {
    /// Initial state for a game first observed in the feed.
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            phase: SyncPhase::Scheduled,
            watermark: 0,
            gap_cycles: 0,
        }
    }
}

/// A team, identified by its short abbreviation (e.g. "NE").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub team_id: String,
    pub city: String,
    pub name: String,
    /// Last successful roster refresh for this team, if any. Persisted per
    /// team so concurrent pipeline instances never race on a shared clock.
    #[serde(default)]
    pub roster_refreshed_at: Option<DateTime<Utc>>,
}

/// A player. Reference data refreshed on the roster cycle, independent of
/// play-by-play updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub player_id: String,
    pub full_name: String,
    pub position: String,
    pub status: String,
}

/// Time-scoped membership of a player on a team.
///
/// A player may belong to different teams across time; a refresh closes the
/// open row for a departed player and opens a new row for an arrival.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub team_id: String,
    pub player_id: String,
    pub effective_from: DateTime<Utc>,
    pub effective_to: Option<DateTime<Utc>>,
}

/// A game, identified by its feed id (date + per-week sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub season: u16,
    pub week: u8,
    pub phase: SeasonPhase,
    pub status: GameStatus,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u16,
    pub away_score: u16,
    pub start_time: DateTime<Utc>,
}

/// A drive within a game, ordered by `drive_seq`.
///
/// Summary fields are derivable from the drive's plays; they are stored as
/// reported by the feed, never recomputed locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drive {
    pub game_id: String,
    pub drive_seq: u32,
    pub pos_team: String,
    /// Field position at the start of the drive, offset from midfield.
    pub start_field: i16,
    pub end_field: i16,
    pub result: String,
    pub play_count: u16,
}

/// A single play. `play_seq` is the feed's monotone sequence number, unique
/// within the game; `content_hash` is the xxh3 of the play's feed content
/// and is how upstream corrections to already-committed plays are detected.
#[derive(Debug, Clone)]
pub struct Play {
    pub game_id: String,
    pub play_seq: u32,
    pub drive_seq: u32,
    pub description: String,
    pub content_hash: u64,
}

/// One (play, player, category) statistic. The only source of truth for all
/// aggregate statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayStat {
    pub game_id: String,
    pub play_seq: u32,
    pub player_id: String,
    pub category: StatCategory,
    pub value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_game_status_round_trip() {
        assert_eq!(GameStatus::from_str("scheduled").unwrap(), GameStatus::Scheduled);
        assert_eq!(GameStatus::from_str("in_progress").unwrap(), GameStatus::InProgress);
        assert_eq!(GameStatus::from_str("final").unwrap(), GameStatus::Final);
        assert_eq!(GameStatus::InProgress.as_ref(), "in_progress");
    }

    #[test]
    fn test_game_status_forward_only_rank() {
        assert!(GameStatus::Scheduled.rank() < GameStatus::InProgress.rank());
        assert!(GameStatus::InProgress.rank() < GameStatus::Final.rank());
    }

    #[test]
    fn test_season_phase_round_trip() {
        assert_eq!(SeasonPhase::from_str("Regular").unwrap(), SeasonPhase::Regular);
        assert_eq!(SeasonPhase::from_str("postseason").unwrap(), SeasonPhase::Postseason);
        assert_eq!(SeasonPhase::Preseason.as_ref(), "Preseason");
    }

    #[test]
    fn test_stat_category_columns_match_serialized_names() {
        for cat in StatCategory::ALL {
            assert_eq!(cat.as_ref(), cat.column());
            assert_eq!(StatCategory::from_str(cat.column()).unwrap(), cat);
        }
    }

    #[test]
    fn test_stat_category_invalid() {
        assert!(StatCategory::from_str("kicking_fgm").is_err());
    }
}
