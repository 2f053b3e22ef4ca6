//! Criteria: an immutable, chainable description of a query.
//!
//! Builder methods consume and return the value, and `Criteria` is `Clone`,
//! so a partially-built query can be kept as a template and extended along
//! different branches without the branches observing each other.
//!
//! Validation is structural and happens before any storage access: a
//! mistyped filter value, a sort key outside the result shape of the chosen
//! mode, or an aggregate threshold on a non-aggregate query all fail with
//! [`QueryError::InvalidCriteria`].

use crate::query::QueryError;
use crate::query::fields::{Cmp, Field, FieldKind, GameField, SortKey, SortOrder, StatField};
use crate::types::{GameStatus, SeasonPhase, StatCategory};

/// A filter value. Sets express membership and are only valid with
/// [`Cmp::Eq`] (IN) or [`Cmp::Ne`] (NOT IN).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Int(i64),
    Text(String),
    Phase(SeasonPhase),
    Status(GameStatus),
    Category(StatCategory),
    IntSet(Vec<i64>),
    TextSet(Vec<String>),
}

#[derive(Debug, Clone)]
pub(crate) struct Filter {
    pub field: Field,
    pub cmp: Cmp,
    pub value: FilterValue,
}

/// One accumulated condition. `EitherTeam` is the special team filter that
/// matches a game regardless of home/away side.
#[derive(Debug, Clone)]
pub(crate) enum Predicate {
    Filter(Filter),
    EitherTeam(String),
}

impl Predicate {
    pub(crate) fn table(&self) -> crate::query::fields::Table {
        match self {
            Self::Filter(f) => f.field.table(),
            Self::EitherTeam(_) => crate::query::fields::Table::Game,
        }
    }
}

/// Post-aggregation threshold on a per-player category total.
#[derive(Debug, Clone)]
pub(crate) struct Having {
    pub category: StatCategory,
    pub cmp: Cmp,
    pub value: i64,
}

/// Result shape switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// One record per matching play-statistic row.
    #[default]
    Rows,
    /// One record per player, category values summed over matching rows.
    Aggregate,
}

/// Accumulated query criteria.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) having: Vec<Having>,
    pub(crate) sort: Option<(SortKey, SortOrder)>,
    pub(crate) limit: u32,
    pub(crate) mode: Mode,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter on any field. Typed shorthands below cover the common
    /// cases; this is the general form.
    pub fn filter(mut self, field: Field, cmp: Cmp, value: FilterValue) -> Self {
        self.predicates.push(Predicate::Filter(Filter { field, cmp, value }));
        self
    }

    // --- Game shorthands ---

    pub fn game_id(self, id: impl Into<String>) -> Self {
        self.filter(Field::Game(GameField::GameId), Cmp::Eq, FilterValue::Text(id.into()))
    }

    pub fn season(self, year: u16) -> Self {
        self.filter(Field::Game(GameField::Season), Cmp::Eq, FilterValue::Int(i64::from(year)))
    }

    pub fn seasons(self, years: &[u16]) -> Self {
        let set = years.iter().map(|y| i64::from(*y)).collect();
        self.filter(Field::Game(GameField::Season), Cmp::Eq, FilterValue::IntSet(set))
    }

    pub fn week(self, week: u8) -> Self {
        self.filter(Field::Game(GameField::Week), Cmp::Eq, FilterValue::Int(i64::from(week)))
    }

    pub fn weeks(self, weeks: &[u8]) -> Self {
        let set = weeks.iter().map(|w| i64::from(*w)).collect();
        self.filter(Field::Game(GameField::Week), Cmp::Eq, FilterValue::IntSet(set))
    }

    pub fn phase(self, phase: SeasonPhase) -> Self {
        self.filter(Field::Game(GameField::SeasonPhase), Cmp::Eq, FilterValue::Phase(phase))
    }

    pub fn status(self, status: GameStatus) -> Self {
        self.filter(Field::Game(GameField::Status), Cmp::Eq, FilterValue::Status(status))
    }

    /// Match games the team played in, home or away.
    pub fn team(mut self, team_id: impl Into<String>) -> Self {
        self.predicates.push(Predicate::EitherTeam(team_id.into()));
        self
    }

    pub fn home_team(self, team_id: impl Into<String>) -> Self {
        self.filter(Field::Game(GameField::HomeTeam), Cmp::Eq, FilterValue::Text(team_id.into()))
    }

    pub fn away_team(self, team_id: impl Into<String>) -> Self {
        self.filter(Field::Game(GameField::AwayTeam), Cmp::Eq, FilterValue::Text(team_id.into()))
    }

    // --- Play / statistic shorthands ---

    pub fn player(self, player_id: impl Into<String>) -> Self {
        self.filter(Field::Stat(StatField::PlayerId), Cmp::Eq, FilterValue::Text(player_id.into()))
    }

    pub fn category(self, category: StatCategory) -> Self {
        self.filter(Field::Stat(StatField::Category), Cmp::Eq, FilterValue::Category(category))
    }

    /// Restrict to rows of one category whose value satisfies `cmp`.
    pub fn stat(self, category: StatCategory, cmp: Cmp, value: i64) -> Self {
        self.category(category).filter(Field::Stat(StatField::Value), cmp, FilterValue::Int(value))
    }

    /// Post-aggregation threshold on a player's category total. Only valid
    /// in aggregate mode; regular filters restrict *what to aggregate*,
    /// this restricts *aggregated results*.
    pub fn having(mut self, category: StatCategory, cmp: Cmp, value: i64) -> Self {
        self.having.push(Having { category, cmp, value });
        self
    }

    // --- Shape controls ---

    /// Sort by one key. Ties are always broken by the entity identifier, so
    /// repeated executions over unchanged data return identical orderings.
    pub fn sort(mut self, key: SortKey, order: SortOrder) -> Self {
        self.sort = Some((key, order));
        self
    }

    /// Limit the number of results. `0` (the default) means no limit.
    /// Applied strictly after sorting.
    pub fn limit(mut self, count: u32) -> Self {
        self.limit = count;
        self
    }

    /// Switch to aggregate mode: one result per player, values summed over
    /// all matching rows.
    pub fn aggregate(mut self) -> Self {
        self.mode = Mode::Aggregate;
        self
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    // --- Validation ---

    /// Structural validation shared by every shape. Shape-specific sort
    /// checks live in the plan compiler.
    pub(crate) fn validate(&self) -> Result<(), QueryError> {
        for pred in &self.predicates {
            if let Predicate::Filter(f) = pred {
                validate_filter(f)?;
            }
        }
        if !self.having.is_empty() && self.mode != Mode::Aggregate {
            return Err(QueryError::InvalidCriteria(
                "aggregate thresholds require aggregate mode".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_filter(filter: &Filter) -> Result<(), QueryError> {
    let kind = filter.field.kind();
    let ok = match &filter.value {
        FilterValue::Int(_) => kind == FieldKind::Int,
        FilterValue::Text(_) => kind == FieldKind::Text,
        FilterValue::Phase(_) => kind == FieldKind::Phase,
        FilterValue::Status(_) => kind == FieldKind::Status,
        FilterValue::Category(_) => kind == FieldKind::Category,
        FilterValue::IntSet(set) => {
            if !matches!(filter.cmp, Cmp::Eq | Cmp::Ne) {
                return Err(set_cmp_error(filter));
            }
            if set.is_empty() {
                return Err(empty_set_error(filter));
            }
            kind == FieldKind::Int
        }
        FilterValue::TextSet(set) => {
            if !matches!(filter.cmp, Cmp::Eq | Cmp::Ne) {
                return Err(set_cmp_error(filter));
            }
            if set.is_empty() {
                return Err(empty_set_error(filter));
            }
            kind == FieldKind::Text
        }
    };
    if !ok {
        return Err(QueryError::InvalidCriteria(format!(
            "filter value {:?} does not match the type of field '{}'",
            filter.value,
            filter.field.name(),
        )));
    }
    Ok(())
}

fn set_cmp_error(filter: &Filter) -> QueryError {
    QueryError::InvalidCriteria(format!(
        "set filter on '{}' only supports equality or inequality",
        filter.field.name(),
    ))
}

fn empty_set_error(filter: &Filter) -> QueryError {
    QueryError::InvalidCriteria(format!("empty set filter on '{}'", filter.field.name()))
}
