//! Encoder engine: binds a loaded [`EncoderModel`] to the input limits of
//! one compute context and exposes it as a [`ModelResource`].

use crate::model::EncoderModel;
use std::time::Instant;
use tracing::{debug, info};
use vecserve_core::config::ModelConfig;
use vecserve_core::inference::{InferenceError, ModelResource};

/// The single embedding model instance of a running process.
pub struct EncoderEngine {
    model: EncoderModel,
    name: String,
    max_input_chars: usize,
    max_batch_size: usize,
}

impl EncoderEngine {
    /// Initialize the engine: load the model and apply the configured limits.
    pub fn new(config: &ModelConfig) -> anyhow::Result<Self> {
        let model = EncoderModel::load(&config.model_path, config.input_dim, config.dimension)?;

        info!(
            path = %config.model_path,
            dimension = model.dimension(),
            input_dim = model.input_dim(),
            "Encoder engine initialized"
        );

        Ok(Self::with_model(model, config))
    }

    pub fn with_model(model: EncoderModel, config: &ModelConfig) -> Self {
        let name = format!("hashed-encoder-{}d", model.dimension());
        Self {
            model,
            name,
            max_input_chars: config.max_input_chars,
            max_batch_size: config.max_batch_size,
        }
    }

    fn check_inputs(&self, texts: &[String]) -> Result<(), InferenceError> {
        if texts.len() > self.max_batch_size {
            return Err(InferenceError::BatchTooLarge {
                max: self.max_batch_size,
                got: texts.len(),
            });
        }
        for (index, text) in texts.iter().enumerate() {
            let chars = text.chars().count();
            if chars > self.max_input_chars {
                return Err(InferenceError::InputTooLong {
                    index,
                    max: self.max_input_chars,
                    got: chars,
                });
            }
        }
        Ok(())
    }
}

impl ModelResource for EncoderEngine {
    fn encode(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        self.check_inputs(texts)?;

        let start = Instant::now();
        let vectors = self.model.encode(texts);

        debug!(
            batch_size = texts.len(),
            latency_us = start.elapsed().as_micros() as u64,
            "Encoded batch"
        );

        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.model.dimension()
    }

    fn model_name(&self) -> &str {
        &self.name
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn warm_up(&mut self) -> Result<(), InferenceError> {
        let out = self.encode(&["warm up".to_string()])?;
        if out.len() != 1 || out[0].len() != self.dimension() {
            return Err(InferenceError::InferenceFailure(
                "warm-up produced an unexpected shape".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(max_input_chars: usize, max_batch_size: usize) -> EncoderEngine {
        let config = ModelConfig {
            max_input_chars,
            max_batch_size,
            ..ModelConfig::default()
        };
        EncoderEngine::with_model(EncoderModel::synthetic(64, 16), &config)
    }

    #[test]
    fn test_encode_preserves_order() {
        let mut engine = engine(100, 8);
        let forward = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let reverse: Vec<String> = forward.iter().rev().cloned().collect();

        let out_fwd = engine.encode(&forward).unwrap();
        let mut out_rev = engine.encode(&reverse).unwrap();
        out_rev.reverse();
        assert_eq!(out_fwd, out_rev);
    }

    #[test]
    fn test_input_too_long_fails_whole_call() {
        let mut engine = engine(5, 8);
        let err = engine
            .encode(&["short".to_string(), "much too long".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            InferenceError::InputTooLong {
                index: 1,
                max: 5,
                got: 13
            }
        );
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        let mut engine = engine(4, 8);
        assert!(engine.encode(&["测试文本".to_string()]).is_ok());
    }

    #[test]
    fn test_batch_too_large() {
        let mut engine = engine(100, 2);
        let texts: Vec<String> = (0..3).map(|i| i.to_string()).collect();
        assert!(matches!(
            engine.encode(&texts),
            Err(InferenceError::BatchTooLarge { max: 2, got: 3 })
        ));
    }

    #[test]
    fn test_warm_up_and_metadata() {
        let mut engine = engine(100, 8);
        assert!(engine.warm_up().is_ok());
        assert_eq!(engine.dimension(), 16);
        assert_eq!(engine.model_name(), "hashed-encoder-16d");
        assert_eq!(engine.max_batch_size(), 8);
    }
}
