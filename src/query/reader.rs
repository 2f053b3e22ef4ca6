//! Query execution facade and result row types.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::DateTime;

use crate::query::criteria::{Criteria, Mode};
use crate::query::plan::{Shape, compile};
use crate::query::QueryError;
use crate::storage::pool::ReadPool;
use crate::types::{Game, GameStatus, SeasonPhase, StatCategory};

/// One row-mode result: a single play statistic joined with its play and
/// game context.
#[derive(Debug, Clone)]
pub struct StatRow {
    pub game_id: String,
    pub season: u16,
    pub week: u8,
    pub phase: SeasonPhase,
    pub drive_seq: u32,
    pub play_seq: u32,
    pub player_id: String,
    pub category: StatCategory,
    pub value: i64,
    pub description: String,
}

/// One aggregate-mode result: per-player totals over all matching rows.
///
/// Categories with a zero total are omitted; [`PlayerTotals::total`]
/// returns 0 for them.
#[derive(Debug, Clone)]
pub struct PlayerTotals {
    pub player_id: String,
    totals: BTreeMap<StatCategory, i64>,
}

impl PlayerTotals {
    pub fn total(&self, category: StatCategory) -> i64 {
        self.totals.get(&category).copied().unwrap_or(0)
    }

    /// Non-zero totals in category order.
    pub fn totals(&self) -> impl Iterator<Item = (StatCategory, i64)> + '_ {
        self.totals.iter().map(|(c, v)| (*c, *v))
    }
}

/// Result of [`QueryReader::execute`], shaped by the criteria's mode.
#[derive(Debug)]
pub enum QueryOutput {
    Rows(Vec<StatRow>),
    Aggregate(Vec<PlayerTotals>),
}

/// Read-only query execution over committed data.
///
/// Stateless and reentrant: every call checks out a pooled connection, so
/// executions may run concurrently with each other and with the sync
/// pipeline.
#[derive(Clone)]
pub struct QueryReader {
    pool: Arc<ReadPool>,
}

impl std::fmt::Debug for QueryReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryReader").finish_non_exhaustive()
    }
}

impl QueryReader {
    pub(crate) fn new(pool: Arc<ReadPool>) -> Self {
        Self { pool }
    }

    /// Execute according to the criteria's mode switch.
    pub fn execute(&self, criteria: &Criteria) -> Result<QueryOutput, QueryError> {
        match criteria.mode() {
            Mode::Rows => self.rows(criteria).map(QueryOutput::Rows),
            Mode::Aggregate => self.aggregate(criteria).map(QueryOutput::Aggregate),
        }
    }

    /// One [`Game`] per matching game.
    pub fn games(&self, criteria: &Criteria) -> Result<Vec<Game>, QueryError> {
        if criteria.mode() == Mode::Aggregate {
            return Err(QueryError::InvalidCriteria(
                "aggregate mode cannot produce game results".to_string(),
            ));
        }
        let plan = compile(criteria, Shape::Games)?;
        let conn = self.pool.get().map_err(QueryError::from)?;
        let mut stmt = conn.prepare(&plan.sql)?;
        let rows = stmt.query_map(plan.param_refs().as_slice(), |row| {
            Ok(Game {
                game_id: row.get(0)?,
                season: row.get::<_, i64>(1)?.try_into().unwrap_or(0),
                week: row.get::<_, i64>(2)?.try_into().unwrap_or(0),
                phase: SeasonPhase::from_str(&row.get::<_, String>(3)?)
                    .unwrap_or(SeasonPhase::Regular),
                status: GameStatus::from_str(&row.get::<_, String>(4)?)
                    .unwrap_or(GameStatus::Scheduled),
                home_team: row.get(5)?,
                away_team: row.get(6)?,
                home_score: row.get::<_, i64>(7)?.try_into().unwrap_or(0),
                away_score: row.get::<_, i64>(8)?.try_into().unwrap_or(0),
                start_time: DateTime::from_timestamp_micros(row.get(9)?)
                    .unwrap_or(DateTime::UNIX_EPOCH),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }

    /// One [`StatRow`] per matching play statistic.
    pub fn rows(&self, criteria: &Criteria) -> Result<Vec<StatRow>, QueryError> {
        if criteria.mode() == Mode::Aggregate {
            return Err(QueryError::InvalidCriteria(
                "aggregate mode cannot produce row results; execute it as an aggregate".to_string(),
            ));
        }
        let plan = compile(criteria, Shape::Rows)?;
        let conn = self.pool.get().map_err(QueryError::from)?;
        let mut stmt = conn.prepare(&plan.sql)?;
        let rows = stmt.query_map(plan.param_refs().as_slice(), |row| {
            Ok(StatRow {
                game_id: row.get(0)?,
                season: row.get::<_, i64>(1)?.try_into().unwrap_or(0),
                week: row.get::<_, i64>(2)?.try_into().unwrap_or(0),
                phase: SeasonPhase::from_str(&row.get::<_, String>(3)?)
                    .unwrap_or(SeasonPhase::Regular),
                drive_seq: row.get::<_, i64>(4)?.try_into().unwrap_or(0),
                play_seq: row.get::<_, i64>(5)?.try_into().unwrap_or(0),
                player_id: row.get(6)?,
                category: StatCategory::from_str(&row.get::<_, String>(7)?)
                    .unwrap_or(StatCategory::PassingYds),
                value: row.get(8)?,
                description: row.get(9)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }

    /// One [`PlayerTotals`] per player with at least one matching row.
    ///
    /// The criteria's mode flag is not required to be set; executing through
    /// this accessor is the mode switch.
    pub fn aggregate(&self, criteria: &Criteria) -> Result<Vec<PlayerTotals>, QueryError> {
        let criteria = criteria.clone().aggregate();
        let plan = compile(&criteria, Shape::Aggregate)?;
        let conn = self.pool.get().map_err(QueryError::from)?;
        let mut stmt = conn.prepare(&plan.sql)?;
        let rows = stmt.query_map(plan.param_refs().as_slice(), |row| {
            let player_id: String = row.get(0)?;
            let mut totals = BTreeMap::new();
            for (i, cat) in StatCategory::ALL.iter().enumerate() {
                let value: i64 = row.get(i + 1)?;
                if value != 0 {
                    totals.insert(*cat, value);
                }
            }
            Ok(PlayerTotals { player_id, totals })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(QueryError::from)
    }
}
