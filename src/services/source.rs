use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::models::SeasonRow;
use crate::services::error::ModelError;
use crate::services::feature_builder::SeasonBatch;

/// Season batches read from files, plus the records that could not be decoded.
#[derive(Debug, Default)]
pub struct SeasonSource {
    pub batches: Vec<SeasonBatch>,
    pub rejected: Vec<ModelError>,
}

/// Season label from a file named like `wnba_combined_2024.json`: the last `_` segment of the stem.
pub fn season_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let season = stem.rsplit('_').next()?.trim();
    if season.is_empty() || !season.chars().next()?.is_ascii_digit() {
        return None;
    }
    Some(season.to_string())
}

/// Parse one season file: a JSON array of season table rows.
///
/// The file must be a JSON array. Elements that do not decode as a season row
/// are skipped and returned as `DataIntegrity` errors.
pub fn read_season_file(path: &Path) -> Result<(SeasonBatch, Vec<ModelError>)> {
    let season = season_from_file_name(path)
        .ok_or_else(|| anyhow!("cannot tell the season from file name {}", path.display()))?;

    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<Value> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let mut rows = Vec::with_capacity(records.len());
    let mut rejected = Vec::new();
    for (line, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<SeasonRow>(record) {
            Ok(row) => rows.push(row),
            Err(e) => {
                let error = ModelError::DataIntegrity(format!(
                    "{} record {} is not a season row: {}",
                    path.display(),
                    line,
                    e
                ));
                tracing::warn!("Skipping record: {}", error);
                rejected.push(error);
            }
        }
    }

    tracing::info!(
        "Loaded {} rows for season {} from {} ({} skipped)",
        rows.len(),
        season,
        path.display(),
        rejected.len()
    );
    Ok((SeasonBatch { season, rows }, rejected))
}

pub fn read_season_files(paths: &[PathBuf]) -> Result<SeasonSource> {
    let mut source = SeasonSource::default();
    for path in paths {
        let (batch, rejected) = read_season_file(path)?;
        source.batches.push(batch);
        source.rejected.extend(rejected);
    }
    Ok(source)
}
