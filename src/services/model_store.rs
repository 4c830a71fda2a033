//! Model artifacts on disk and the in-memory handle the server reads from.
//!
//! A build writes two files into the model directory:
//! - `similarity_data.csv`: the feature matrix, one row per player-season
//! - `similarity_matrix.json`: the similarity index (ids + row-major scores)
//!
//! Both are written to temporary files named after the build and renamed into
//! place only after both writes succeed. Saves in one process take turns. Each
//! file records the build that produced it, and loading rejects a pair from two
//! different builds or with different player-seasons.

use chrono::{DateTime, Utc};
use parking_lot::{const_mutex, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::SeasonRow;
use crate::services::error::ModelError;
use crate::services::feature_builder::{build_features, FeatureMatrix};
use crate::services::similarity::{SimilarityIndex, SimilarityModel};

pub const FEATURES_FILE: &str = "similarity_data.csv";
pub const INDEX_FILE: &str = "similarity_matrix.json";

const ID_COLUMN: &str = "player_season_id";
const BUILD_ID_LINE: &str = "# build_id=";
const ARTIFACT_VERSION: u32 = 1;

// Held for the whole of every save, across all stores
static SAVE_LOCK: Mutex<()> = const_mutex(());

#[derive(Debug, Serialize, Deserialize)]
struct IndexArtifact {
    version: u32,
    build_id: String,
    built_at: DateTime<Utc>,
    ids: Vec<String>,
    scores: Vec<f64>,
}

/// Directory holding the published model artifacts.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn features_path(&self) -> PathBuf {
        self.dir.join(FEATURES_FILE)
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Write both artifacts, replacing any previous build.
    pub fn save(&self, model: &SimilarityModel) -> Result<(), ModelError> {
        let _guard = SAVE_LOCK.lock();
        fs::create_dir_all(&self.dir)?;

        let features_tmp = self.temp_path(FEATURES_FILE, model.build_id());
        let index_tmp = self.temp_path(INDEX_FILE, model.build_id());

        let written = write_features(&features_tmp, model.build_id(), model.features())
            .and_then(|_| write_index(&index_tmp, model));
        if let Err(e) = written {
            let _ = fs::remove_file(&features_tmp);
            let _ = fs::remove_file(&index_tmp);
            return Err(e);
        }

        fs::rename(&features_tmp, self.features_path())?;
        fs::rename(&index_tmp, self.index_path())?;

        tracing::info!(
            "Model artifacts have been saved to {} (build {})",
            self.dir.display(),
            model.build_id()
        );
        Ok(())
    }

    fn temp_path(&self, file: &str, build_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.tmp", file, build_id))
    }

    /// Load the published model. `Ok(None)` when no build has been published yet.
    pub fn load(&self) -> Result<Option<SimilarityModel>, ModelError> {
        let features_path = self.features_path();
        let index_path = self.index_path();

        match (features_path.exists(), index_path.exists()) {
            (false, false) => return Ok(None),
            (true, true) => {}
            _ => {
                return Err(ModelError::Artifact(format!(
                    "incomplete model in {}: expected both {} and {}",
                    self.dir.display(),
                    FEATURES_FILE,
                    INDEX_FILE
                )))
            }
        }

        let (features_build, features) = read_features(&features_path)?;
        let artifact: IndexArtifact = serde_json::from_str(&fs::read_to_string(&index_path)?)?;
        if artifact.version != ARTIFACT_VERSION {
            return Err(ModelError::Artifact(format!(
                "unsupported similarity index version {}",
                artifact.version
            )));
        }
        if features_build != artifact.build_id {
            return Err(ModelError::Artifact(format!(
                "{} is from build {} but {} is from build {}",
                FEATURES_FILE, features_build, INDEX_FILE, artifact.build_id
            )));
        }

        let index = SimilarityIndex::from_scores(artifact.ids, artifact.scores)?;
        let model = SimilarityModel::new(artifact.build_id, artifact.built_at, features, index)?;

        tracing::info!(
            "Loaded similarity model {} ({} player seasons)",
            model.build_id(),
            model.features().len()
        );
        Ok(Some(model))
    }
}

fn write_features(path: &Path, build_id: &str, matrix: &FeatureMatrix) -> Result<(), ModelError> {
    let mut file = fs::File::create(path)?;
    writeln!(file, "{}{}", BUILD_ID_LINE, build_id)?;
    let mut writer = csv::Writer::from_writer(file);

    let mut header = vec![ID_COLUMN.to_string()];
    header.extend(matrix.columns().iter().cloned());
    writer.write_record(&header)?;

    for (row, id) in matrix.index().ids().iter().enumerate() {
        let mut record = vec![id.clone()];
        record.extend(matrix.values().row(row).iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

fn read_features(path: &Path) -> Result<(String, FeatureMatrix), ModelError> {
    let raw = fs::read_to_string(path)?;
    let (first_line, body) = raw.split_once('\n').unwrap_or((raw.as_str(), ""));
    let build_id = first_line
        .trim_end_matches('\r')
        .strip_prefix(BUILD_ID_LINE)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ModelError::Artifact(format!("{} does not record its build id", path.display())))?
        .to_string();

    let mut reader = csv::Reader::from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    if headers.get(0) != Some(ID_COLUMN) {
        return Err(ModelError::Artifact(format!(
            "{} does not start with a {} column",
            path.display(),
            ID_COLUMN
        )));
    }
    let columns: Vec<&str> = headers.iter().skip(1).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let id = record.get(0).unwrap_or_default().to_string();
        let values = record
            .iter()
            .skip(1)
            .map(|cell| {
                cell.parse::<f64>()
                    .map_err(|e| ModelError::Artifact(format!("bad value '{}' for {}: {}", cell, id, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push((id, values));
    }

    Ok((build_id, FeatureMatrix::from_rows(&columns, rows)?))
}

fn write_index(path: &Path, model: &SimilarityModel) -> Result<(), ModelError> {
    let scores = model.index().scores();
    let n = model.index().len();
    let artifact = IndexArtifact {
        version: ARTIFACT_VERSION,
        build_id: model.build_id().to_string(),
        built_at: model.built_at(),
        ids: model.index().index().ids().to_vec(),
        scores: (0..n).flat_map(|i| (0..n).map(move |j| scores[(i, j)])).collect(),
    };
    fs::write(path, serde_json::to_vec(&artifact)?)?;
    Ok(())
}

/// What a successful build produced
#[derive(Debug)]
pub struct BuildOutcome {
    pub model: SimilarityModel,
    pub rejected: Vec<ModelError>,
}

/// Build features and the similarity index from labelled rows, then publish to `store`.
///
/// Nothing is written unless the whole build succeeds.
pub fn build_and_save(rows: Vec<SeasonRow>, store: &ModelStore) -> Result<BuildOutcome, ModelError> {
    let build = build_features(rows)?;
    let model = SimilarityModel::build(build.matrix)?;
    store.save(&model)?;
    Ok(BuildOutcome {
        model,
        rejected: build.rejected,
    })
}

/// Shared handle to the currently published model.
///
/// Readers take a snapshot `Arc` and never hold the lock while working with it;
/// publishing swaps the whole model at once.
#[derive(Clone, Default)]
pub struct ModelHandle {
    current: Arc<RwLock<Option<Arc<SimilarityModel>>>>,
}

impl ModelHandle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_model(model: SimilarityModel) -> Self {
        let handle = Self::empty();
        handle.publish(model);
        handle
    }

    /// Start from whatever the store holds. A missing or unreadable model leaves the handle empty.
    pub fn from_store(store: &ModelStore) -> Self {
        match store.load() {
            Ok(Some(model)) => Self::with_model(model),
            Ok(None) => {
                tracing::warn!(
                    "No similarity model found in {}; similarity queries are unavailable until one is built",
                    store.dir().display()
                );
                Self::empty()
            }
            Err(e) => {
                tracing::error!("Failed to load similarity model: {}", e);
                Self::empty()
            }
        }
    }

    pub fn current(&self) -> Option<Arc<SimilarityModel>> {
        self.current.read().clone()
    }

    pub fn get(&self) -> Result<Arc<SimilarityModel>, ModelError> {
        self.current().ok_or(ModelError::ModelUnavailable)
    }

    pub fn is_loaded(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replace the published model, returning the previous one.
    pub fn publish(&self, model: SimilarityModel) -> Option<Arc<SimilarityModel>> {
        let next = Arc::new(model);
        self.current.write().replace(next)
    }
}
