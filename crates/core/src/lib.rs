pub mod config;
pub mod error;
pub mod inference;
pub mod types;

pub use config::{AppConfig, BatchingConfig, ModelConfig};
pub use error::{EmbedError, EmbedResult};
pub use inference::{InferenceError, ModelResource};
