//! Compilation of [`Criteria`] into a single SQL statement.
//!
//! Filters are partitioned by the table they constrain and combined over
//! the game -> play -> play_stat chain. Joins are emitted only for tables a
//! criterion actually references; an aggregate query with no game- or
//! play-level filters reads `play_stat` alone, and a games query with no
//! lower-level filters reads `game` alone.
//!
//! In aggregate mode, row filters land in WHERE (restricting which rows
//! contribute to the sums), aggregate thresholds land in HAVING, and sort +
//! limit apply to the aggregated rows. Every ordering ends with the entity
//! identifier so results are deterministic across repeated executions.

use duckdb::ToSql;

use crate::query::QueryError;
use crate::query::criteria::{Criteria, Filter, FilterValue, Predicate};
use crate::query::fields::{Field, GameField, SortKey, StatField, Table};
use crate::types::StatCategory;

/// A compiled, parameterized SQL statement.
#[derive(Debug)]
pub(crate) struct Plan {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlParam {
    Int(i64),
    Text(String),
}

impl Plan {
    pub fn param_refs(&self) -> Vec<&dyn ToSql> {
        self.params
            .iter()
            .map(|p| match p {
                SqlParam::Int(v) => v as &dyn ToSql,
                SqlParam::Text(v) => v as &dyn ToSql,
            })
            .collect()
    }
}

/// Result shape being compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Games,
    Rows,
    Aggregate,
}

impl Shape {
    fn name(self) -> &'static str {
        match self {
            Self::Games => "game",
            Self::Rows => "row",
            Self::Aggregate => "aggregate",
        }
    }
}

pub(crate) fn compile(criteria: &Criteria, shape: Shape) -> Result<Plan, QueryError> {
    criteria.validate()?;
    match shape {
        Shape::Games => compile_games(criteria),
        Shape::Rows => compile_rows(criteria),
        Shape::Aggregate => compile_aggregate(criteria),
    }
}

// =============================================================================
// Shapes
// =============================================================================

const GAME_COLUMNS: &str = "g.game_id, g.season, g.week, g.season_phase::VARCHAR, \
     g.status::VARCHAR, g.home_team, g.away_team, g.home_score, g.away_score, g.start_time";

fn compile_games(criteria: &Criteria) -> Result<Plan, QueryError> {
    let order = order_by(criteria, Shape::Games, &["g.game_id ASC"])?;
    let mut params = Vec::new();

    let mut conds = conditions(criteria, Table::Game, &mut params);

    // Lower-level filters restrict which games qualify without changing the
    // result shape: they compile to an EXISTS over the play chain.
    let play_conds = conditions(criteria, Table::Play, &mut params);
    let stat_conds = conditions(criteria, Table::Stat, &mut params);
    if !stat_conds.is_empty() {
        let mut inner = vec!["ps.game_id = g.game_id".to_string()];
        inner.extend(play_conds);
        inner.extend(stat_conds);
        conds.push(format!(
            "EXISTS (SELECT 1 FROM play_stat ps \
             JOIN play p ON ps.game_id = p.game_id AND ps.play_seq = p.play_seq \
             WHERE {})",
            inner.join(" AND ")
        ));
    } else if !play_conds.is_empty() {
        let mut inner = vec!["p.game_id = g.game_id".to_string()];
        inner.extend(play_conds);
        conds.push(format!(
            "EXISTS (SELECT 1 FROM play p WHERE {})",
            inner.join(" AND ")
        ));
    }

    let mut sql = format!("SELECT {GAME_COLUMNS} FROM game g");
    push_where(&mut sql, &conds);
    sql.push_str(&order);
    push_limit(&mut sql, criteria.limit);

    Ok(Plan { sql, params })
}

fn compile_rows(criteria: &Criteria) -> Result<Plan, QueryError> {
    let order = order_by(
        criteria,
        Shape::Rows,
        &["g.game_id ASC", "p.play_seq ASC", "ps.player_id ASC", "ps.category ASC"],
    )?;
    let mut params = Vec::new();

    let mut conds = conditions(criteria, Table::Game, &mut params);
    conds.extend(conditions(criteria, Table::Play, &mut params));
    conds.extend(conditions(criteria, Table::Stat, &mut params));

    let mut sql = String::from(
        "SELECT g.game_id, g.season, g.week, g.season_phase::VARCHAR, p.drive_seq, \
         p.play_seq, ps.player_id, ps.category::VARCHAR, ps.value, p.description \
         FROM play_stat ps \
         JOIN play p ON ps.game_id = p.game_id AND ps.play_seq = p.play_seq \
         JOIN game g ON p.game_id = g.game_id",
    );
    push_where(&mut sql, &conds);
    sql.push_str(&order);
    push_limit(&mut sql, criteria.limit);

    Ok(Plan { sql, params })
}

fn compile_aggregate(criteria: &Criteria) -> Result<Plan, QueryError> {
    let order = order_by(criteria, Shape::Aggregate, &["ps.player_id ASC"])?;

    let pivots: Vec<String> = StatCategory::ALL
        .iter()
        .map(|cat| format!("{} AS {}", pivot_expr(*cat), cat.column()))
        .collect();

    let mut sql = format!("SELECT ps.player_id, {} FROM play_stat ps", pivots.join(", "));

    // Join elision: the expensive joins are only paid when a criterion
    // references the table.
    let needs_play = references(criteria, Table::Play);
    let needs_game = references(criteria, Table::Game);
    if needs_play {
        sql.push_str(" JOIN play p ON ps.game_id = p.game_id AND ps.play_seq = p.play_seq");
    }
    if needs_game {
        sql.push_str(" JOIN game g ON ps.game_id = g.game_id");
    }

    let mut params = Vec::new();
    let mut conds = conditions(criteria, Table::Game, &mut params);
    conds.extend(conditions(criteria, Table::Play, &mut params));
    conds.extend(conditions(criteria, Table::Stat, &mut params));
    push_where(&mut sql, &conds);

    sql.push_str(" GROUP BY ps.player_id");

    if !criteria.having.is_empty() {
        let thresholds: Vec<String> = criteria
            .having
            .iter()
            .map(|h| {
                params.push(SqlParam::Int(h.value));
                format!("{} {} ?", pivot_expr(h.category), h.cmp.as_sql())
            })
            .collect();
        sql.push_str(" HAVING ");
        sql.push_str(&thresholds.join(" AND "));
    }

    sql.push_str(&order);
    push_limit(&mut sql, criteria.limit);

    Ok(Plan { sql, params })
}

// =============================================================================
// Helpers
// =============================================================================

fn pivot_expr(cat: StatCategory) -> String {
    format!("SUM(CASE WHEN ps.category = '{}' THEN ps.value ELSE 0 END)", cat.column())
}

fn references(criteria: &Criteria, table: Table) -> bool {
    criteria.predicates.iter().any(|p| p.table() == table)
}

/// SQL conditions for every predicate constraining `table`, in criteria
/// order, appending their parameters to `params`.
fn conditions(criteria: &Criteria, table: Table, params: &mut Vec<SqlParam>) -> Vec<String> {
    criteria
        .predicates
        .iter()
        .filter(|p| p.table() == table)
        .map(|p| match p {
            Predicate::Filter(f) => filter_sql(f, params),
            Predicate::EitherTeam(team) => {
                params.push(SqlParam::Text(team.clone()));
                params.push(SqlParam::Text(team.clone()));
                "(g.home_team = ? OR g.away_team = ?)".to_string()
            }
        })
        .collect()
}

fn filter_sql(filter: &Filter, params: &mut Vec<SqlParam>) -> String {
    let col = filter.field.qualified();
    match &filter.value {
        FilterValue::Int(v) => {
            params.push(SqlParam::Int(*v));
            format!("{col} {} ?", filter.cmp.as_sql())
        }
        FilterValue::Text(v) => {
            params.push(SqlParam::Text(v.clone()));
            format!("{col} {} ?", filter.cmp.as_sql())
        }
        FilterValue::Phase(v) => {
            params.push(SqlParam::Text(v.as_ref().to_string()));
            format!("{col} {} ?", filter.cmp.as_sql())
        }
        FilterValue::Status(v) => {
            params.push(SqlParam::Text(v.as_ref().to_string()));
            format!("{col} {} ?", filter.cmp.as_sql())
        }
        FilterValue::Category(v) => {
            params.push(SqlParam::Text(v.as_ref().to_string()));
            format!("{col} {} ?", filter.cmp.as_sql())
        }
        FilterValue::IntSet(set) => {
            for v in set {
                params.push(SqlParam::Int(*v));
            }
            set_sql(col, filter.cmp, set.len())
        }
        FilterValue::TextSet(set) => {
            for v in set {
                params.push(SqlParam::Text(v.clone()));
            }
            set_sql(col, filter.cmp, set.len())
        }
    }
}

fn set_sql(col: &str, cmp: crate::query::fields::Cmp, len: usize) -> String {
    let placeholders = vec!["?"; len].join(", ");
    let op = if cmp == crate::query::fields::Cmp::Ne { "NOT IN" } else { "IN" };
    format!("{col} {op} ({placeholders})")
}

fn push_where(sql: &mut String, conds: &[String]) {
    if !conds.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conds.join(" AND "));
    }
}

fn push_limit(sql: &mut String, limit: u32) {
    if limit > 0 {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
}

/// Build the ORDER BY clause, validating the sort key against the shape.
/// `tiebreak` is the fixed secondary key chain for the shape.
fn order_by(
    criteria: &Criteria,
    shape: Shape,
    tiebreak: &[&str],
) -> Result<String, QueryError> {
    let mut exprs: Vec<String> = Vec::new();
    if let Some((key, order)) = criteria.sort {
        let col = sort_column(shape, key)?;
        exprs.push(format!("{col} {}", order.as_sql()));
    }
    exprs.extend(tiebreak.iter().map(|s| (*s).to_string()));
    Ok(format!(" ORDER BY {}", exprs.join(", ")))
}

fn sort_column(shape: Shape, key: SortKey) -> Result<String, QueryError> {
    let not_in_shape = || {
        QueryError::InvalidCriteria(format!(
            "sort key '{}' is not part of the {} result shape",
            key.name(),
            shape.name(),
        ))
    };
    match (shape, key) {
        (Shape::Games, SortKey::Field(f @ Field::Game(_))) => Ok(f.qualified().to_string()),
        (Shape::Rows, SortKey::Field(f)) => {
            // The row shape exposes the selected columns only; the remaining
            // game columns are filterable but not sortable here.
            let in_shape = matches!(
                f,
                Field::Game(
                    GameField::GameId | GameField::Season | GameField::Week | GameField::SeasonPhase
                ) | Field::Play(_)
                    | Field::Stat(_)
            );
            if in_shape { Ok(f.qualified().to_string()) } else { Err(not_in_shape()) }
        }
        (Shape::Aggregate, SortKey::Total(cat)) => Ok(cat.column().to_string()),
        (Shape::Aggregate, SortKey::Field(Field::Stat(StatField::PlayerId))) => {
            Ok("ps.player_id".to_string())
        }
        _ => Err(not_in_shape()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::fields::{Cmp, PlayField, SortOrder};
    use crate::types::SeasonPhase;

    #[test]
    fn test_aggregate_without_lower_filters_has_no_joins() {
        let c = Criteria::new().aggregate();
        let plan = compile(&c, Shape::Aggregate).unwrap();
        assert!(!plan.sql.contains("JOIN"));
        assert!(plan.sql.contains("GROUP BY ps.player_id"));
    }

    #[test]
    fn test_aggregate_with_game_filter_joins_game_only() {
        let c = Criteria::new().season(2012).aggregate();
        let plan = compile(&c, Shape::Aggregate).unwrap();
        assert!(plan.sql.contains("JOIN game g"));
        assert!(!plan.sql.contains("JOIN play p"));
        assert!(plan.sql.contains("WHERE g.season = ?"));
        assert_eq!(plan.params, vec![SqlParam::Int(2012)]);
    }

    #[test]
    fn test_games_shape_without_lower_filters_is_pure_game_query() {
        let c = Criteria::new().season(2012).phase(SeasonPhase::Regular);
        let plan = compile(&c, Shape::Games).unwrap();
        assert!(!plan.sql.contains("JOIN"));
        assert!(!plan.sql.contains("EXISTS"));
        assert!(plan.sql.contains("FROM game g"));
    }

    #[test]
    fn test_games_shape_with_stat_filter_uses_exists() {
        let c = Criteria::new().season(2012).stat(StatCategory::PassingYds, Cmp::Ge, 40);
        let plan = compile(&c, Shape::Games).unwrap();
        assert!(plan.sql.contains("EXISTS (SELECT 1 FROM play_stat ps"));
    }

    #[test]
    fn test_sort_limit_follow_aggregation() {
        let c = Criteria::new()
            .season(2012)
            .aggregate()
            .sort(SortKey::Total(StatCategory::PassingYds), SortOrder::Desc)
            .limit(5);
        let plan = compile(&c, Shape::Aggregate).unwrap();

        let group = plan.sql.find("GROUP BY").unwrap();
        let order = plan.sql.find("ORDER BY").unwrap();
        let limit = plan.sql.find("LIMIT").unwrap();
        assert!(group < order && order < limit);
        assert!(plan.sql.contains("ORDER BY passing_yds DESC, ps.player_id ASC"));
    }

    #[test]
    fn test_row_filters_precede_group_by() {
        let c = Criteria::new().season(2012).aggregate();
        let plan = compile(&c, Shape::Aggregate).unwrap();
        let where_pos = plan.sql.find("WHERE").unwrap();
        let group_pos = plan.sql.find("GROUP BY").unwrap();
        assert!(where_pos < group_pos);
    }

    #[test]
    fn test_having_repeats_pivot_expression() {
        let c = Criteria::new().aggregate().having(StatCategory::FumblesLost, Cmp::Ge, 6);
        let plan = compile(&c, Shape::Aggregate).unwrap();
        assert!(
            plan.sql.contains(
                "HAVING SUM(CASE WHEN ps.category = 'fumbles_lost' THEN ps.value ELSE 0 END) >= ?"
            )
        );
        assert_eq!(*plan.params.last().unwrap(), SqlParam::Int(6));
    }

    #[test]
    fn test_sort_key_outside_aggregate_shape_rejected() {
        let c = Criteria::new()
            .aggregate()
            .sort(SortKey::Field(Field::Play(PlayField::PlaySeq)), SortOrder::Desc);
        let err = compile(&c, Shape::Aggregate).unwrap_err();
        assert!(matches!(err, QueryError::InvalidCriteria(_)));
        assert!(err.to_string().contains("play_seq"));
    }

    #[test]
    fn test_sort_key_outside_games_shape_rejected() {
        let c = Criteria::new().sort(SortKey::Total(StatCategory::PassingYds), SortOrder::Desc);
        assert!(compile(&c, Shape::Games).is_err());
    }

    #[test]
    fn test_rows_default_order_is_stable_identity_chain() {
        let c = Criteria::new();
        let plan = compile(&c, Shape::Rows).unwrap();
        assert!(
            plan.sql
                .contains("ORDER BY g.game_id ASC, p.play_seq ASC, ps.player_id ASC, ps.category ASC")
        );
    }

    #[test]
    fn test_team_filter_matches_either_side() {
        let c = Criteria::new().team("NE");
        let plan = compile(&c, Shape::Games).unwrap();
        assert!(plan.sql.contains("(g.home_team = ? OR g.away_team = ?)"));
        assert_eq!(plan.params.len(), 2);
    }

    #[test]
    fn test_week_set_compiles_to_in() {
        let c = Criteria::new().weeks(&[1, 2, 3]);
        let plan = compile(&c, Shape::Games).unwrap();
        assert!(plan.sql.contains("g.week IN (?, ?, ?)"));
        assert_eq!(plan.params.len(), 3);
    }
}
