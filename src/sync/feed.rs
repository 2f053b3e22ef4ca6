//! Feed source trait and snapshot types.
//!
//! A feed supplies, per poll, a structured snapshot of one game's current
//! plays and game-level state, plus roster and schedule snapshots on their
//! own cadences. The pipeline only relies on three properties of the feed
//! contract:
//!
//! - play sequence numbers are dense (1..N) and stable within a game
//! - each play's content can be hashed for change detection
//! - the reported game status only ever moves forward

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

use crate::types::{Drive, Game, GameStatus, Play, PlayStat, Player, SeasonPhase, Team};

/// Errors reading from the feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transient failure (network, timeout, upstream 5xx). Retried on the
    /// next poll cycle.
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    /// The feed answered but the payload could not be interpreted.
    #[error("feed malformed: {0}")]
    Malformed(String),
}

impl FeedError {
    /// Transient errors are retried next cycle; permanent ones are surfaced.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// One per-player statistic event inside a play snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEvent {
    pub player_id: String,
    pub category: crate::types::StatCategory,
    pub value: i64,
}

/// One play as reported by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaySnapshot {
    pub play_seq: u32,
    pub drive_seq: u32,
    pub description: String,
    #[serde(default)]
    pub stats: Vec<StatEvent>,
}

impl PlaySnapshot {
    /// Content hash for change detection. Stat order is normalized so two
    /// snapshots with the same content always hash identically.
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&self.drive_seq.to_le_bytes());
        hasher.update(self.description.as_bytes());

        let mut stats: Vec<&StatEvent> = self.stats.iter().collect();
        stats.sort_by(|a, b| (&a.player_id, a.category).cmp(&(&b.player_id, b.category)));
        for stat in stats {
            hasher.update(stat.player_id.as_bytes());
            hasher.update(stat.category.as_ref().as_bytes());
            hasher.update(&stat.value.to_le_bytes());
        }
        hasher.digest()
    }

    pub(crate) fn to_play(&self, game_id: &str) -> Play {
        Play {
            game_id: game_id.to_string(),
            play_seq: self.play_seq,
            drive_seq: self.drive_seq,
            description: self.description.clone(),
            content_hash: self.content_hash(),
        }
    }

    pub(crate) fn to_stats(&self, game_id: &str) -> Vec<PlayStat> {
        self.stats
            .iter()
            .map(|s| PlayStat {
                game_id: game_id.to_string(),
                play_seq: self.play_seq,
                player_id: s.player_id.clone(),
                category: s.category,
                value: s.value,
            })
            .collect()
    }
}

/// One drive summary as reported by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveSnapshot {
    pub drive_seq: u32,
    pub pos_team: String,
    pub start_field: i16,
    pub end_field: i16,
    pub result: String,
    pub play_count: u16,
}

impl DriveSnapshot {
    pub(crate) fn to_drive(&self, game_id: &str) -> Drive {
        Drive {
            game_id: game_id.to_string(),
            drive_seq: self.drive_seq,
            pos_team: self.pos_team.clone(),
            start_field: self.start_field,
            end_field: self.end_field,
            result: self.result.clone(),
            play_count: self.play_count,
        }
    }
}

/// A game's current state as reported by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSnapshot {
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
    #[serde(default)]
    pub drives: Vec<DriveSnapshot>,
    #[serde(default)]
    pub plays: Vec<PlaySnapshot>,
}

impl GameSnapshot {
    /// The game row this snapshot describes, with an explicit status (the
    /// pipeline decides the status to commit, not the raw feed value).
    pub(crate) fn to_game(&self, status: GameStatus) -> Game {
        Game {
            game_id: self.game_id.clone(),
            season: self.season,
            week: self.week,
            phase: self.phase,
            status,
            home_team: self.home_team.clone(),
            away_team: self.away_team.clone(),
            home_score: self.home_score,
            away_score: self.away_score,
            start_time: self.start_time,
        }
    }
}

/// A team's roster as reported by the feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub team: Team,
    pub players: Vec<Player>,
}

/// External feed collaborator.
///
/// Implementations handle transport and decoding only; all diffing and
/// state-machine logic lives in the pipeline.
#[async_trait]
pub trait FeedSource: Send + Sync + 'static {
    /// Current snapshot of one game.
    async fn game_snapshot(&self, game_id: &str) -> Result<GameSnapshot, FeedError>;

    /// Current roster of one team.
    async fn roster_snapshot(&self, team_id: &str) -> Result<RosterSnapshot, FeedError>;

    /// Games the feed currently knows about (schedule data only).
    async fn current_schedule(&self) -> Result<Vec<Game>, FeedError>;
}
