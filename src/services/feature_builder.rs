//! Feature builder for the player-season similarity model.
//!
//! Turns raw season table rows into a standardized feature matrix keyed by
//! canonical player-season identifier ("First Last (season)").

use nalgebra::DMatrix;
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::models::SeasonRow;
use crate::services::error::ModelError;
use crate::utils::{canonical_id, clean_player_name, is_aggregate_team, split_player_name};

pub const FEATURE_COUNT: usize = 9;

/// Model features, in matrix column order
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = ["PTS", "TRB", "AST", "STL", "BLK", "FG%", "3P%", "PER", "WS"];

/// Below this a column is treated as constant
const STD_EPSILON: f64 = 1e-12;

/// Bidirectional mapping between canonical identifiers and row positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowIndex {
    ids: Vec<String>,
    lookup: HashMap<String, usize>,
}

impl RowIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an ordered id list, rejecting any repeat.
    pub fn from_ids(ids: Vec<String>) -> Result<Self, ModelError> {
        let mut index = Self::new();
        for id in ids {
            index.insert(id)?;
        }
        Ok(index)
    }

    /// Append an id and return its row. Fails if the id is already present.
    pub fn insert(&mut self, id: String) -> Result<usize, ModelError> {
        if self.lookup.contains_key(&id) {
            return Err(ModelError::DataIntegrity(format!(
                "duplicate player-season identifier '{}'",
                id
            )));
        }
        let row = self.ids.len();
        self.lookup.insert(id.clone(), row);
        self.ids.push(id);
        Ok(row)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    pub fn id(&self, row: usize) -> Option<&str> {
        self.ids.get(row).map(String::as_str)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// One cleaned player-season with its raw (unscaled) feature values.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSeasonRecord {
    pub id: String,
    pub season: String,
    pub team: String,
    pub features: [f64; FEATURE_COUNT],
}

impl PlayerSeasonRecord {
    fn from_row(id: String, season: String, team: String, row: &SeasonRow) -> Self {
        let features = [
            row.points,
            row.rebounds,
            row.assists,
            row.steals,
            row.blocks,
            row.field_goal_pct,
            row.three_point_pct,
            row.efficiency,
            row.win_shares,
        ]
        .map(|value| value.unwrap_or(0.0));

        Self { id, season, team, features }
    }
}

/// Rows from one source batch (typically one season file).
#[derive(Debug, Clone)]
pub struct SeasonBatch {
    pub season: String,
    pub rows: Vec<SeasonRow>,
}

/// Mean and population standard deviation used to scale one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColumnStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Immutable feature matrix: one row per player-season, one column per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    index: RowIndex,
    columns: Vec<String>,
    values: DMatrix<f64>,
    column_stats: Vec<ColumnStats>,
}

impl FeatureMatrix {
    /// Assemble a matrix from already-scaled rows. Every row must match `columns` in width.
    pub fn from_rows(columns: &[&str], rows: Vec<(String, Vec<f64>)>) -> Result<Self, ModelError> {
        let width = columns.len();
        let mut index = RowIndex::new();
        let mut flat = Vec::with_capacity(rows.len() * width);

        for (id, values) in rows {
            if values.len() != width {
                return Err(ModelError::Artifact(format!(
                    "row '{}' has {} values, expected {}",
                    id,
                    values.len(),
                    width
                )));
            }
            if values.iter().any(|v| !v.is_finite()) {
                return Err(ModelError::Artifact(format!("row '{}' has a non-finite value", id)));
            }
            index.insert(id)?;
            flat.extend(values);
        }

        Ok(Self {
            values: DMatrix::from_row_slice(index.len(), width, &flat),
            index,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            column_stats: Vec::new(),
        })
    }

    pub fn index(&self) -> &RowIndex {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// Scaling parameters from the build. Empty for matrices loaded from disk.
    pub fn column_stats(&self) -> &[ColumnStats] {
        &self.column_stats
    }

    pub fn row(&self, id: &str) -> Option<Vec<f64>> {
        let row = self.index.position(id)?;
        Some(self.values.row(row).iter().copied().collect())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Result of a feature build: the matrix plus every record that was turned away.
#[derive(Debug)]
pub struct FeatureBuild {
    pub matrix: FeatureMatrix,
    pub rejected: Vec<ModelError>,
}

/// Attach each batch's season label to rows that lack one, then concatenate in batch order.
pub fn label_batches(batches: Vec<SeasonBatch>) -> Vec<SeasonRow> {
    batches
        .into_iter()
        .flat_map(|batch| {
            let season = batch.season;
            batch.rows.into_iter().map(move |mut row| {
                if row.season.as_deref().map_or(true, |s| s.trim().is_empty()) {
                    row.season = Some(season.clone());
                }
                row
            })
        })
        .collect()
}

/// Clean names and collapse multi-team players to one representative row.
///
/// A player-season with an aggregate ("TOT") row is a traded player: the first
/// real-team row in source order represents it, and the aggregate plus every
/// other team row for that player-season are dropped. Player-seasons without an
/// aggregate row pass through untouched, so genuine duplicates still reach the
/// identifier check.
pub fn resolve_teams(rows: Vec<SeasonRow>) -> (Vec<SeasonRow>, Vec<ModelError>) {
    let mut rejected = Vec::new();
    let mut usable = Vec::with_capacity(rows.len());

    for (line, mut row) in rows.into_iter().enumerate() {
        let name = row.player.as_deref().map(clean_player_name).unwrap_or_default();
        if name.is_empty() {
            rejected.push(ModelError::DataIntegrity(format!("row {} has no player name", line)));
            continue;
        }
        let Some(season) = row.season.clone().filter(|s| !s.trim().is_empty()) else {
            rejected.push(ModelError::DataIntegrity(format!("row {} ({}) has no season", line, name)));
            continue;
        };
        let team = row.team.as_deref().map(str::trim).unwrap_or_default().to_string();
        if team.is_empty() {
            rejected.push(ModelError::DataIntegrity(format!("row {} ({}) has no team", line, name)));
            continue;
        }

        row.player = Some(name);
        row.season = Some(season.trim().to_string());
        row.team = Some(team);
        usable.push(row);
    }

    let key = |row: &SeasonRow| (row.player.clone().unwrap_or_default(), row.season.clone().unwrap_or_default());
    let is_aggregate = |row: &SeasonRow| row.team.as_deref().is_some_and(is_aggregate_team);

    // player-season -> position of its representative row, for traded players only
    let mut traded: HashMap<(String, String), Option<usize>> = HashMap::new();
    for row in usable.iter().filter(|row| is_aggregate(row)) {
        traded.insert(key(row), None);
    }
    for (pos, row) in usable.iter().enumerate() {
        if is_aggregate(row) {
            continue;
        }
        if let Some(slot) = traded.get_mut(&key(row)) {
            slot.get_or_insert(pos);
        }
    }

    let mut resolved = Vec::with_capacity(usable.len());
    for (pos, row) in usable.into_iter().enumerate() {
        let row_key = key(&row);
        match traded.get(&row_key) {
            None => resolved.push(row),
            Some(Some(representative)) if *representative == pos => {
                tracing::debug!(
                    "{} ({}) played for several teams; using {}",
                    row_key.0,
                    row_key.1,
                    row.team.as_deref().unwrap_or_default()
                );
                resolved.push(row);
            }
            Some(Some(_)) => {}
            Some(None) => {
                if is_aggregate(&row) {
                    rejected.push(ModelError::DataIntegrity(format!(
                        "{} ({}) has only an aggregate team row",
                        row_key.0, row_key.1
                    )));
                }
            }
        }
    }

    (resolved, rejected)
}

/// Build canonical identifiers and feature vectors, rejecting identifier collisions.
pub fn to_records(rows: Vec<SeasonRow>) -> (Vec<PlayerSeasonRecord>, Vec<ModelError>) {
    let mut seen = RowIndex::new();
    let mut records = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();

    for row in rows {
        let (Some(name), Some(season), Some(team)) = (row.player.clone(), row.season.clone(), row.team.clone()) else {
            rejected.push(ModelError::DataIntegrity("row is missing identity fields".to_string()));
            continue;
        };

        let (first, last) = split_player_name(&name);
        let id = canonical_id(&first, &last, &season);

        match seen.insert(id.clone()) {
            Ok(_) => records.push(PlayerSeasonRecord::from_row(id, season, team, &row)),
            Err(e) => rejected.push(e),
        }
    }

    (records, rejected)
}

/// Scale every column to zero mean and unit (population) variance.
///
/// Constant columns scale to zero everywhere.
pub fn standardize(records: &[PlayerSeasonRecord]) -> Result<FeatureMatrix, ModelError> {
    if records.is_empty() {
        return Err(ModelError::EmptyDataset);
    }

    let index = RowIndex::from_ids(records.iter().map(|r| r.id.clone()).collect())?;
    let width = FEATURE_COUNT;

    let column_stats: Vec<ColumnStats> = (0..width)
        .map(|col| {
            let column: Vec<f64> = records.iter().map(|r| r.features[col]).collect();
            ColumnStats {
                mean: column.iter().mean(),
                std_dev: column.iter().population_std_dev(),
            }
        })
        .collect();

    let values = DMatrix::from_fn(records.len(), width, |row, col| {
        let stats = column_stats[col];
        if stats.std_dev < STD_EPSILON {
            0.0
        } else {
            (records[row].features[col] - stats.mean) / stats.std_dev
        }
    });

    Ok(FeatureMatrix {
        index,
        columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        values,
        column_stats,
    })
}

/// Run the whole cleaning pipeline over already-labelled rows.
pub fn build_features(rows: Vec<SeasonRow>) -> Result<FeatureBuild, ModelError> {
    let total = rows.len();
    let (resolved, mut rejected) = resolve_teams(rows);
    let (records, duplicates) = to_records(resolved);
    rejected.extend(duplicates);

    for reason in &rejected {
        tracing::warn!("Skipping record: {}", reason);
    }

    if records.is_empty() {
        tracing::error!("No usable player seasons out of {} source rows", total);
        return Err(ModelError::EmptyDataset);
    }

    tracing::info!(
        "Prepared {} player seasons from {} source rows ({} rejected)",
        records.len(),
        total,
        rejected.len()
    );

    let matrix = standardize(&records)?;
    tracing::info!("Features have been scaled ({} columns)", matrix.columns().len());

    Ok(FeatureBuild { matrix, rejected })
}

/// Label, concatenate and build several season batches.
pub fn build_features_from_batches(batches: Vec<SeasonBatch>) -> Result<FeatureBuild, ModelError> {
    build_features(label_batches(batches))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn season_row(player: &str, team: &str, pts: f64, trb: f64, ast: f64) -> SeasonRow {
        SeasonRow {
            player: Some(player.to_string()),
            team: Some(team.to_string()),
            points: Some(pts),
            rebounds: Some(trb),
            assists: Some(ast),
            ..Default::default()
        }
    }

    fn batch(season: &str, rows: Vec<SeasonRow>) -> SeasonBatch {
        SeasonBatch { season: season.to_string(), rows }
    }

    #[test]
    fn test_standardized_columns_have_zero_mean_and_unit_variance() {
        let rows = vec![
            season_row("Caitlin Clark", "IND", 769.0, 225.0, 337.0),
            season_row("A'ja Wilson*", "LVA", 1021.0, 451.0, 88.0),
            season_row("Sabrina Ionescu", "NYL", 716.0, 208.0, 234.0),
            season_row("Angel Reese", "CHI", 543.0, 446.0, 72.0),
        ];
        let build = build_features_from_batches(vec![batch("2024", rows)]).unwrap();
        let matrix = &build.matrix;

        assert_eq!(matrix.len(), 4);
        assert!(build.rejected.is_empty());
        assert_eq!(matrix.columns(), FEATURE_COLUMNS.map(String::from).as_slice());

        for col in 0..3 {
            let column: Vec<f64> = matrix.values().column(col).iter().copied().collect();
            let mean = column.iter().sum::<f64>() / column.len() as f64;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
            assert!(mean.abs() < 1e-9, "column {} mean {}", col, mean);
            assert!((var.sqrt() - 1.0).abs() < 1e-9, "column {} std {}", col, var.sqrt());
        }

        // Missing stats are zero for everyone, so those columns are constant
        for col in 3..FEATURE_COLUMNS.len() {
            assert!(matrix.values().column(col).iter().all(|v| *v == 0.0));
        }
        assert!(matrix.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_award_markers_are_stripped_from_identifiers() {
        let rows = vec![
            season_row("A'ja Wilson*", "LVA", 1021.0, 451.0, 88.0),
            season_row("Napheesa Collier", "MIN", 707.0, 329.0, 117.0),
        ];
        let build = build_features_from_batches(vec![batch("2024", rows)]).unwrap();
        assert!(build.matrix.index().position("A'ja Wilson (2024)").is_some());
        assert!(build.matrix.index().position("A'ja Wilson* (2024)").is_none());
    }

    #[test]
    fn test_duplicate_identifier_is_rejected_not_merged() {
        let rows = vec![
            season_row("Player A", "AAA", 10.0, 1.0, 1.0),
            season_row("Player B", "BBB", 5.0, 2.0, 2.0),
            season_row("Player A", "AAA", 99.0, 9.0, 9.0),
        ];
        let build = build_features_from_batches(vec![batch("2024", rows)]).unwrap();

        assert_eq!(build.matrix.len(), 2);
        assert_eq!(build.matrix.index().ids(), &["Player A (2024)", "Player B (2024)"]);
        assert_eq!(build.rejected.len(), 1);
        assert!(matches!(build.rejected[0], ModelError::DataIntegrity(_)));

        // First occurrence wins: A has the higher scaled points of the two kept rows
        let a = build.matrix.row("Player A (2024)").unwrap();
        let b = build.matrix.row("Player B (2024)").unwrap();
        assert!(a[0] > b[0]);
    }

    #[test]
    fn test_multi_team_player_uses_first_real_team() {
        let rows = vec![
            season_row("Dearica Hamby", "TOT", 30.0, 30.0, 30.0),
            season_row("Dearica Hamby", "LVA", 10.0, 10.0, 10.0),
            season_row("Dearica Hamby", "LAS", 20.0, 20.0, 20.0),
            season_row("Kelsey Plum", "LVA", 25.0, 5.0, 5.0),
        ];
        let (resolved, rejected) = resolve_teams(label_batches(vec![batch("2023", rows)]));

        assert!(rejected.is_empty());
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].team.as_deref(), Some("LVA"));
        assert_eq!(resolved[0].points, Some(10.0));
        assert_eq!(resolved[1].player.as_deref(), Some("Kelsey Plum"));
    }

    #[test]
    fn test_aggregate_only_player_is_rejected() {
        let rows = vec![
            season_row("Lonely Total", "TOT", 30.0, 30.0, 30.0),
            season_row("Kelsey Plum", "LVA", 25.0, 5.0, 5.0),
        ];
        let (resolved, rejected) = resolve_teams(label_batches(vec![batch("2023", rows)]));
        assert_eq!(resolved.len(), 1);
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_rows_without_name_or_team_are_excluded() {
        let mut nameless = season_row("", "IND", 1.0, 1.0, 1.0);
        nameless.player = None;
        let teamless = SeasonRow { team: None, ..season_row("No Team", "", 1.0, 1.0, 1.0) };
        let rows = vec![nameless, teamless, season_row("Kept Player", "IND", 3.0, 3.0, 3.0)];

        let build = build_features_from_batches(vec![batch("2024", rows)]).unwrap();
        assert_eq!(build.matrix.index().ids(), &["Kept Player (2024)"]);
        assert_eq!(build.rejected.len(), 2);
    }

    #[test]
    fn test_same_player_in_two_seasons_gets_two_rows() {
        let build = build_features_from_batches(vec![
            batch("2024", vec![season_row("Caitlin Clark", "IND", 769.0, 225.0, 337.0)]),
            batch("2023", vec![season_row("Caitlin Clark", "IND", 0.0, 0.0, 0.0)]),
        ])
        .unwrap();
        assert_eq!(build.matrix.index().ids(), &["Caitlin Clark (2024)", "Caitlin Clark (2023)"]);
    }

    #[test]
    fn test_existing_season_label_is_kept() {
        let mut row = season_row("Alyssa Thomas", "CON", 1.0, 1.0, 1.0);
        row.season = Some("2022".to_string());
        let rows = label_batches(vec![batch("2024", vec![row])]);
        assert_eq!(rows[0].season.as_deref(), Some("2022"));
    }

    #[test]
    fn test_single_row_standardizes_to_zero() {
        let build =
            build_features_from_batches(vec![batch("2024", vec![season_row("Only One", "IND", 5.0, 5.0, 5.0)])]).unwrap();
        assert!(build.matrix.values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_input_is_an_empty_dataset() {
        assert!(matches!(build_features(vec![]), Err(ModelError::EmptyDataset)));

        let mut nameless = season_row("", "IND", 1.0, 1.0, 1.0);
        nameless.player = Some("*".to_string());
        let result = build_features_from_batches(vec![batch("2024", vec![nameless])]);
        assert!(matches!(result, Err(ModelError::EmptyDataset)));
    }

    #[test]
    fn test_build_is_deterministic() {
        let rows = || {
            vec![
                season_row("Caitlin Clark", "IND", 769.0, 225.0, 337.0),
                season_row("Angel Reese", "CHI", 543.0, 446.0, 72.0),
                season_row("Sabrina Ionescu", "NYL", 716.0, 208.0, 234.0),
            ]
        };
        let first = build_features_from_batches(vec![batch("2024", rows())]).unwrap();
        let second = build_features_from_batches(vec![batch("2024", rows())]).unwrap();
        assert_eq!(first.matrix, second.matrix);
    }

    #[test]
    fn test_row_index_rejects_repeats() {
        let mut index = RowIndex::new();
        assert_eq!(index.insert("A (2024)".into()).unwrap(), 0);
        assert_eq!(index.insert("B (2024)".into()).unwrap(), 1);
        assert!(index.insert("A (2024)".into()).is_err());
        assert_eq!(index.position("B (2024)"), Some(1));
        assert_eq!(index.id(0), Some("A (2024)"));
        assert!(RowIndex::from_ids(vec!["x".into(), "x".into()]).is_err());
    }

    #[test]
    fn test_from_rows_checks_width() {
        let result = FeatureMatrix::from_rows(&["a", "b"], vec![("A".into(), vec![1.0])]);
        assert!(matches!(result, Err(ModelError::Artifact(_))));
    }

    #[test]
    fn test_column_stats_record_population_scaling() {
        let rows = vec![
            season_row("A One", "IND", 10.0, 4.0, 1.0),
            season_row("B Two", "CHI", 20.0, 4.0, 3.0),
            season_row("C Three", "NYL", 30.0, 4.0, 5.0),
        ];
        let build = build_features_from_batches(vec![batch("2024", rows)]).unwrap();
        let stats = build.matrix.column_stats();
        assert_eq!(stats.len(), FEATURE_COUNT);

        // PTS: mean 20, population std sqrt(200/3)
        assert!((stats[0].mean - 20.0).abs() < 1e-12);
        assert!((stats[0].std_dev - (200.0f64 / 3.0).sqrt()).abs() < 1e-12);
        // TRB is constant
        assert_eq!(stats[1].std_dev, 0.0);
        assert_eq!(stats[1].mean, 4.0);
    }
}
