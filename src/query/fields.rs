//! Closed enumerations of filterable and sortable fields.
//!
//! Every field knows its SQL column and owning table, so an invalid field
//! can never reach SQL: anything not expressible here is rejected while the
//! criteria are compiled, before storage is touched.

use strum_macros::{AsRefStr, EnumString};

use crate::types::StatCategory;

/// Comparison operator for a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Sort order for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Table a field belongs to, which decides the joins a query needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Table {
    Game,
    Play,
    Stat,
}

/// Filterable columns of the `game` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameField {
    GameId,
    Season,
    Week,
    SeasonPhase,
    Status,
    HomeTeam,
    AwayTeam,
    HomeScore,
    AwayScore,
}

/// Filterable columns of the `play` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayField {
    DriveSeq,
    PlaySeq,
    Description,
}

/// Filterable columns of the `play_stat` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatField {
    PlayerId,
    Category,
    Value,
}

/// Any filterable field, tagged with its owning table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Game(GameField),
    Play(PlayField),
    Stat(StatField),
}

/// The value type a field compares against; used to reject mistyped filters
/// at compile time rather than at execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Int,
    Text,
    Phase,
    Status,
    Category,
}

impl Field {
    pub(crate) fn table(self) -> Table {
        match self {
            Self::Game(_) => Table::Game,
            Self::Play(_) => Table::Play,
            Self::Stat(_) => Table::Stat,
        }
    }

    /// Alias-qualified SQL column. Aliases are fixed across all plans:
    /// `g` = game, `p` = play, `ps` = play_stat.
    pub(crate) fn qualified(self) -> &'static str {
        match self {
            Self::Game(GameField::GameId) => "g.game_id",
            Self::Game(GameField::Season) => "g.season",
            Self::Game(GameField::Week) => "g.week",
            Self::Game(GameField::SeasonPhase) => "g.season_phase",
            Self::Game(GameField::Status) => "g.status",
            Self::Game(GameField::HomeTeam) => "g.home_team",
            Self::Game(GameField::AwayTeam) => "g.away_team",
            Self::Game(GameField::HomeScore) => "g.home_score",
            Self::Game(GameField::AwayScore) => "g.away_score",
            Self::Play(PlayField::DriveSeq) => "p.drive_seq",
            Self::Play(PlayField::PlaySeq) => "p.play_seq",
            Self::Play(PlayField::Description) => "p.description",
            Self::Stat(StatField::PlayerId) => "ps.player_id",
            Self::Stat(StatField::Category) => "ps.category",
            Self::Stat(StatField::Value) => "ps.value",
        }
    }

    /// Field name as surfaced in error messages.
    pub(crate) fn name(self) -> &'static str {
        // Strip the alias prefix; the bare column name is what callers see.
        let qualified = self.qualified();
        qualified.split_once('.').map(|(_, col)| col).unwrap_or(qualified)
    }

    pub(crate) fn kind(self) -> FieldKind {
        match self {
            Self::Game(GameField::Season | GameField::Week | GameField::HomeScore | GameField::AwayScore) => {
                FieldKind::Int
            }
            Self::Game(GameField::SeasonPhase) => FieldKind::Phase,
            Self::Game(GameField::Status) => FieldKind::Status,
            Self::Game(GameField::GameId | GameField::HomeTeam | GameField::AwayTeam) => {
                FieldKind::Text
            }
            Self::Play(PlayField::DriveSeq | PlayField::PlaySeq) => FieldKind::Int,
            Self::Play(PlayField::Description) => FieldKind::Text,
            Self::Stat(StatField::PlayerId) => FieldKind::Text,
            Self::Stat(StatField::Category) => FieldKind::Category,
            Self::Stat(StatField::Value) => FieldKind::Int,
        }
    }
}

/// Sort key: either a plain field or an aggregated category total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Field(Field),
    /// Per-player category total; only meaningful in aggregate mode.
    Total(StatCategory),
}

impl SortKey {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Field(f) => f.name(),
            Self::Total(c) => c.column(),
        }
    }
}
