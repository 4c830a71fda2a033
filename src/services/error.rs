use thiserror::Error;

/// Failures of the similarity model: building, persisting and querying it.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A single source record could not be used. The build skips it and continues.
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Nothing survived cleaning; the build is abandoned.
    #[error("No usable player-season rows in this build")]
    EmptyDataset,

    #[error("Player-season not found in the model: {0}")]
    NotFound(String),

    #[error("Similarity model is not available")]
    ModelUnavailable,

    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for ModelError {
    fn from(e: csv::Error) -> Self {
        ModelError::Artifact(e.to_string())
    }
}

impl From<serde_json::Error> for ModelError {
    fn from(e: serde_json::Error) -> Self {
        ModelError::Artifact(e.to_string())
    }
}
