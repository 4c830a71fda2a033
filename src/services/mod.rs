pub mod error;
pub mod feature_builder;
pub mod model_store;
pub mod similarity;
pub mod source;

pub use error::ModelError;
pub use feature_builder::label_batches;
pub use model_store::{build_and_save, ModelHandle, ModelStore};
pub use source::read_season_files;
