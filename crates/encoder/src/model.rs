//! Hashed-feature text encoder.
//!
//! Texts are turned into sparse bag-of-features vectors (word tokens,
//! character trigrams and a beginning-of-text marker, hashed into
//! `input_dim` buckets with SHA-256), projected through a dense
//! `input_dim x dimension` matrix and L2-normalized.
//!
//! Weights are read from a JSON file when one exists at `model_path`:
//!
//! ```json
//! {"input_dim": 1024, "dimension": 384, "weights": [ ...input_dim * dimension floats... ]}
//! ```
//!
//! Otherwise deterministic synthetic weights are generated so the service can
//! run in development without any model artifacts.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

const BOS_FEATURE: &str = "\u{2}bos";
const SYNTHETIC_SEED: u64 = 0x5eed_cafe_f00d_d00d;

/// A loaded encoder ready for inference.
pub struct EncoderModel {
    weights: Array2<f32>,
    input_dim: usize,
    dimension: usize,
}

#[derive(Deserialize)]
struct ModelFile {
    input_dim: usize,
    dimension: usize,
    weights: Vec<f32>,
}

impl EncoderModel {
    /// Load a model from the given path.
    ///
    /// Falls back to synthetic weights of the requested shape if no model
    /// file is found.
    pub fn load(model_path: &str, input_dim: usize, dimension: usize) -> anyhow::Result<Self> {
        let path = Path::new(model_path);

        if !path.exists() {
            warn!(
                path = model_path,
                "Model file not found, using synthetic weights for development"
            );
            return Ok(Self::synthetic(input_dim, dimension));
        }

        info!(path = model_path, "Model file found, loading weights");
        let raw = std::fs::read_to_string(path)?;
        let file: ModelFile = serde_json::from_str(&raw)?;

        if file.input_dim == 0 || file.dimension == 0 {
            anyhow::bail!(
                "model file declares an empty shape: input_dim={}, dimension={}",
                file.input_dim,
                file.dimension
            );
        }

        if file.input_dim != input_dim || file.dimension != dimension {
            warn!(
                file_input_dim = file.input_dim,
                file_dimension = file.dimension,
                input_dim,
                dimension,
                "Model file shape overrides configured shape"
            );
        }

        let weights = Array2::from_shape_vec((file.input_dim, file.dimension), file.weights)
            .map_err(|e| anyhow::anyhow!("weights do not match declared shape: {e}"))?;

        Ok(Self {
            weights,
            input_dim: file.input_dim,
            dimension: file.dimension,
        })
    }

    /// Deterministic synthetic weights, uniform in [-1, 1).
    pub fn synthetic(input_dim: usize, dimension: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(SYNTHETIC_SEED);
        let weights =
            Array2::from_shape_simple_fn((input_dim, dimension), || rng.gen_range(-1.0f32..1.0));

        Self {
            weights,
            input_dim,
            dimension,
        }
    }

    /// Encode a batch of texts. One unit-length row per input, in order.
    pub fn encode(&self, texts: &[String]) -> Vec<Vec<f32>> {
        let mut features = Array2::<f32>::zeros((texts.len(), self.input_dim));
        for (i, text) in texts.iter().enumerate() {
            let mut row = features.row_mut(i);
            for (bucket, sign) in self.featurize(text) {
                row[bucket] += sign;
            }
        }

        let projected = features.dot(&self.weights);

        projected
            .outer_iter()
            .map(|row| normalize(row.to_vec()))
            .collect()
    }

    /// Hash every feature of `text` to a (bucket, sign) pair.
    fn featurize(&self, text: &str) -> Vec<(usize, f32)> {
        let lowered = text.to_lowercase();
        let mut features = vec![self.hash_feature(BOS_FEATURE)];

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            features.push(self.hash_feature(&format!("w:{word}")));
        }

        // Character trigrams cover scripts without whitespace word boundaries.
        let chars: Vec<char> = format!(" {lowered} ").chars().collect();
        for window in chars.windows(3) {
            let gram: String = window.iter().collect();
            features.push(self.hash_feature(&format!("c:{gram}")));
        }

        features
    }

    fn hash_feature(&self, feature: &str) -> (usize, f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let bucket = (u64::from_le_bytes(bytes) % self.input_dim as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scale to unit length. A zero vector maps to the first basis vector.
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    } else if let Some(first) = v.first_mut() {
        *first = 1.0;
    }
    v
}
