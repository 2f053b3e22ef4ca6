//! Integration tests for the criteria query engine against a seeded store.

use chrono::{TimeZone, Utc};
use gridstore::query::{Cmp, Criteria, Field, PlayField, QueryError, SortKey, SortOrder};
use gridstore::storage::{StorageBuilder, StorageHandles, SyncBatch};
use gridstore::types::{
    Game, GameStatus, GameSyncState, Play, PlayStat, SeasonPhase, StatCategory, SyncPhase,
};

// =============================================================================
// Seeding
// =============================================================================

fn game(game_id: &str, season: u16, week: u8, phase: SeasonPhase) -> Game {
    Game {
        game_id: game_id.to_string(),
        season,
        week,
        phase,
        status: GameStatus::Final,
        home_team: "NE".to_string(),
        away_team: "DEN".to_string(),
        home_score: 21,
        away_score: 17,
        start_time: Utc.with_ymd_and_hms(i32::from(season), 9, 9, 18, 0, 0).unwrap(),
    }
}

/// Seed one game whose plays each carry a single passing stat.
async fn seed_game(
    handles: &StorageHandles,
    game_id: &str,
    season: u16,
    week: u8,
    phase: SeasonPhase,
    stats: &[(&str, i64)],
) {
    let mut new_plays = Vec::new();
    let mut play_stats = Vec::new();
    for (i, (player, yds)) in stats.iter().enumerate() {
        let seq = i as u32 + 1;
        new_plays.push(Play {
            game_id: game_id.to_string(),
            play_seq: seq,
            drive_seq: 1,
            description: format!("Pass for {yds} yards"),
            content_hash: seq.into(),
        });
        play_stats.push(PlayStat {
            game_id: game_id.to_string(),
            play_seq: seq,
            player_id: (*player).to_string(),
            category: StatCategory::PassingYds,
            value: *yds,
        });
    }

    let watermark = new_plays.len() as u32;
    handles
        .writer
        .apply_sync(SyncBatch {
            game: game(game_id, season, week, phase),
            drives: vec![],
            new_plays,
            corrected_plays: vec![],
            stats: play_stats,
            state: GameSyncState {
                game_id: game_id.to_string(),
                phase: SyncPhase::Final,
                watermark,
                gap_cycles: 0,
            },
        })
        .await
        .unwrap();
}

/// Six passers over two 2012 games plus one 2011 game of noise.
async fn seeded() -> (StorageHandles, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let handles = StorageBuilder::new(dir.path().join("query.db")).pool_size(2).build().unwrap();

    seed_game(
        &handles,
        "2012090900",
        2012,
        1,
        SeasonPhase::Regular,
        &[("QB-A", 180), ("QB-B", 150), ("QB-C", 120), ("QB-D", 90), ("QB-E", 60), ("QB-F", 30)],
    )
    .await;
    seed_game(
        &handles,
        "2012091600",
        2012,
        2,
        SeasonPhase::Regular,
        // QB-B and QB-C end the season tied at 270.
        &[("QB-A", 120), ("QB-B", 120), ("QB-C", 150), ("QB-D", 80), ("QB-E", 40), ("QB-F", 20)],
    )
    .await;
    // A different season that must not contribute to 2012 totals.
    seed_game(&handles, "2011091100", 2011, 1, SeasonPhase::Regular, &[("QB-A", 500)]).await;

    (handles, dir)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_top_five_passers_with_tie_broken_by_player_id() {
    let (handles, _dir) = seeded().await;

    let totals = handles
        .query_reader
        .aggregate(
            &Criteria::new()
                .season(2012)
                .phase(SeasonPhase::Regular)
                .sort(SortKey::Total(StatCategory::PassingYds), SortOrder::Desc)
                .limit(5),
        )
        .unwrap();

    assert_eq!(totals.len(), 5, "six players, limit five");
    let order: Vec<(&str, i64)> = totals
        .iter()
        .map(|t| (t.player_id.as_str(), t.total(StatCategory::PassingYds)))
        .collect();
    assert_eq!(
        order,
        vec![("QB-A", 300), ("QB-B", 270), ("QB-C", 270), ("QB-D", 170), ("QB-E", 100)]
    );
}

#[tokio::test]
async fn test_repeated_execution_returns_identical_order() {
    let (handles, _dir) = seeded().await;

    let criteria = Criteria::new()
        .season(2012)
        .sort(SortKey::Total(StatCategory::PassingYds), SortOrder::Desc)
        .limit(4);

    let first: Vec<String> = handles
        .query_reader
        .aggregate(&criteria)
        .unwrap()
        .into_iter()
        .map(|t| t.player_id)
        .collect();
    let second: Vec<String> = handles
        .query_reader
        .aggregate(&criteria)
        .unwrap()
        .into_iter()
        .map(|t| t.player_id)
        .collect();
    assert_eq!(first, second);

    let rows_criteria = Criteria::new().season(2012);
    let first: Vec<(String, u32)> = handles
        .query_reader
        .rows(&rows_criteria)
        .unwrap()
        .into_iter()
        .map(|r| (r.game_id, r.play_seq))
        .collect();
    let second: Vec<(String, u32)> = handles
        .query_reader
        .rows(&rows_criteria)
        .unwrap()
        .into_iter()
        .map(|r| (r.game_id, r.play_seq))
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_aggregate_matches_manual_row_summation() {
    let (handles, _dir) = seeded().await;

    let criteria = Criteria::new().season(2012).phase(SeasonPhase::Regular);

    let mut manual: std::collections::BTreeMap<String, i64> = std::collections::BTreeMap::new();
    for row in handles.query_reader.rows(&criteria).unwrap() {
        if row.category == StatCategory::PassingYds {
            *manual.entry(row.player_id).or_default() += row.value;
        }
    }

    let totals = handles.query_reader.aggregate(&criteria).unwrap();
    assert_eq!(totals.len(), manual.len());
    for t in totals {
        assert_eq!(
            t.total(StatCategory::PassingYds),
            manual[&t.player_id],
            "mismatch for {}",
            t.player_id
        );
    }
}

#[tokio::test]
async fn test_sort_key_outside_aggregate_shape_is_invalid_criteria() {
    let (handles, _dir) = seeded().await;

    // A raw per-play field is not part of the aggregate result shape.
    let err = handles
        .query_reader
        .aggregate(
            &Criteria::new()
                .season(2012)
                .sort(SortKey::Field(Field::Play(PlayField::PlaySeq)), SortOrder::Desc),
        )
        .unwrap_err();

    match err {
        QueryError::InvalidCriteria(msg) => assert!(msg.contains("play_seq"), "{msg}"),
        other => panic!("expected InvalidCriteria, got {other}"),
    }
}

#[tokio::test]
async fn test_well_formed_zero_result_query_is_empty() {
    let (handles, _dir) = seeded().await;

    let totals = handles.query_reader.aggregate(&Criteria::new().season(1999)).unwrap();
    assert!(totals.is_empty());

    let games = handles.query_reader.games(&Criteria::new().team("SEA")).unwrap();
    assert!(games.is_empty());
}

#[tokio::test]
async fn test_row_mode_top_plays_by_value() {
    let (handles, _dir) = seeded().await;

    let rows = handles
        .query_reader
        .rows(
            &Criteria::new()
                .season(2012)
                .sort(SortKey::Field(Field::Stat(gridstore::query::StatField::Value)), SortOrder::Desc)
                .limit(3),
        )
        .unwrap();

    let values: Vec<i64> = rows.iter().map(|r| r.value).collect();
    assert_eq!(values, vec![180, 150, 150]);
}

#[tokio::test]
async fn test_stat_threshold_filters_before_aggregation() {
    let (handles, _dir) = seeded().await;

    // Only plays of at least 100 yards contribute to the sums.
    let totals = handles
        .query_reader
        .aggregate(&Criteria::new().season(2012).stat(StatCategory::PassingYds, Cmp::Ge, 100))
        .unwrap();

    let a = totals.iter().find(|t| t.player_id == "QB-A").unwrap();
    assert_eq!(a.total(StatCategory::PassingYds), 300);
    let b = totals.iter().find(|t| t.player_id == "QB-B").unwrap();
    assert_eq!(b.total(StatCategory::PassingYds), 270);
    // QB-E never threw for 100 in a single play.
    assert!(!totals.iter().any(|t| t.player_id == "QB-E"));
}

#[tokio::test]
async fn test_execute_dispatches_on_mode_switch() {
    let (handles, _dir) = seeded().await;
    let base = Criteria::new().season(2012);

    match handles.query_reader.execute(&base).unwrap() {
        gridstore::query::QueryOutput::Rows(rows) => assert_eq!(rows.len(), 12),
        other => panic!("row-mode criteria produced {other:?}"),
    }
    match handles.query_reader.execute(&base.aggregate()).unwrap() {
        gridstore::query::QueryOutput::Aggregate(totals) => assert_eq!(totals.len(), 6),
        other => panic!("aggregate-mode criteria produced {other:?}"),
    }
}

#[tokio::test]
async fn test_games_accessor_with_lower_level_filter() {
    let (handles, _dir) = seeded().await;

    // Games in which someone passed for at least 180 yards in one play.
    let games = handles
        .query_reader
        .games(&Criteria::new().stat(StatCategory::PassingYds, Cmp::Ge, 180))
        .unwrap();
    let ids: Vec<&str> = games.iter().map(|g| g.game_id.as_str()).collect();
    assert_eq!(ids, vec!["2011091100", "2012090900"]);
}
