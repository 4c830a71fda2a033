use std::env;
use std::path::PathBuf;

/// Runtime settings, read from the environment (a `.env` file is loaded first by `main`).
#[derive(Debug, Clone)]
pub struct Config {
    /// sqlx connection string
    pub database_url: String,
    /// Where model artifacts are published and loaded from
    pub model_dir: PathBuf,
    /// Interface the API server binds to
    pub bind_host: String,
    /// Neighbors returned by similarity queries when the caller does not ask for a count
    pub similar_default_k: usize,
}

pub const MAX_SIMILAR_K: usize = 50;

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:../data/courtsight.db".to_string(),
            model_dir: PathBuf::from("../data/model"),
            bind_host: "0.0.0.0".to_string(),
            similar_default_k: 5,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Ok(dir) = env::var("MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Ok(host) = env::var("BIND_ADDR") {
            config.bind_host = host;
        }
        if let Ok(val) = env::var("SIMILAR_DEFAULT_K") {
            if let Ok(k) = val.parse::<usize>() {
                config.similar_default_k = k.clamp(1, MAX_SIMILAR_K);
            }
        }

        config
    }
}
