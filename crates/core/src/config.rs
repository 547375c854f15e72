use crate::error::EmbedError;
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `VECSERVE__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Maximum number of texts in one `POST /embeddings` body (0 = unlimited).
    #[serde(default = "default_max_request_texts")]
    pub max_request_texts: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub model_path: String,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    /// Number of hashed feature buckets fed into the projection.
    #[serde(default = "default_input_dim")]
    pub input_dim: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Hard per-call limit of the model itself.
    #[serde(default = "default_model_max_batch_size")]
    pub max_batch_size: usize,
}

/// Knobs of the batching core.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchingConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_batch_wait_ms")]
    pub max_batch_wait_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Queued-item bound for backpressure (0 = unbounded).
    #[serde(default = "default_max_pending_items")]
    pub max_pending_items: usize,
    /// Re-run a failed multi-item batch one item at a time.
    #[serde(default)]
    pub retry_failed_items_individually: bool,
    /// Let an idle scheduler run a partial batch without waiting out
    /// `max_batch_wait_ms`.
    #[serde(default)]
    pub dispatch_when_idle: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8000
}
fn default_max_request_texts() -> usize {
    2048
}
fn default_model_path() -> String {
    "/models/encoder.json".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_input_dim() -> usize {
    1024
}
fn default_max_input_chars() -> usize {
    8192
}
fn default_model_max_batch_size() -> usize {
    256
}
fn default_max_batch_size() -> usize {
    32
}
fn default_max_batch_wait_ms() -> u64 {
    5
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_pending_items() -> usize {
    4096
}
fn default_metrics_enabled() -> bool {
    false
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            max_request_texts: default_max_request_texts(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            dimension: default_dimension(),
            input_dim: default_input_dim(),
            max_input_chars: default_max_input_chars(),
            max_batch_size: default_model_max_batch_size(),
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_wait_ms: default_max_batch_wait_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_pending_items: default_max_pending_items(),
            retry_failed_items_individually: false,
            dispatch_when_idle: false,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            model: ModelConfig::default(),
            batching: BatchingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl BatchingConfig {
    pub fn validate(&self) -> Result<(), EmbedError> {
        if self.max_batch_size == 0 {
            return Err(EmbedError::Config(
                "batching.max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(EmbedError::Config(
                "batching.request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_pending_items != 0 && self.max_pending_items < self.max_batch_size {
            return Err(EmbedError::Config(format!(
                "batching.max_pending_items ({}) must be 0 or at least max_batch_size ({})",
                self.max_pending_items, self.max_batch_size
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file overlaid with
    /// environment variables (`VECSERVE__BATCHING__MAX_BATCH_SIZE=64`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let builder = builder.add_source(
            config::Environment::with_prefix("VECSERVE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), EmbedError> {
        self.batching.validate()?;

        if self.model.dimension == 0 || self.model.input_dim == 0 {
            return Err(EmbedError::Config(
                "model.dimension and model.input_dim must be greater than 0".to_string(),
            ));
        }
        if self.model.max_batch_size == 0 {
            return Err(EmbedError::Config(
                "model.max_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.batching.max_batch_size > self.model.max_batch_size {
            return Err(EmbedError::Config(format!(
                "batching.max_batch_size ({}) exceeds model.max_batch_size ({})",
                self.batching.max_batch_size, self.model.max_batch_size
            )));
        }
        // Otherwise a maximal request could never be admitted.
        let pending = self.batching.max_pending_items;
        let texts = self.api.max_request_texts;
        if pending != 0 && (texts == 0 || texts > pending) {
            return Err(EmbedError::Config(format!(
                "api.max_request_texts ({texts}) must be between 1 and batching.max_pending_items ({pending})"
            )));
        }
        Ok(())
    }
}
