//! Test doubles for the model resource.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use vecserve_core::inference::{InferenceError, ModelResource};

/// Text that makes [`RecordingModel`] fail the whole call.
pub const POISON: &str = "boom";

/// Model that records the size of every call it receives.
///
/// Vectors are a deterministic function of the text, so order can be checked
/// by comparing outputs. Any batch containing [`POISON`] fails.
pub struct RecordingModel {
    pub calls: Arc<Mutex<Vec<usize>>>,
    pub delay: Duration,
    pub panic_on: Option<String>,
}

impl RecordingModel {
    pub fn new() -> (Self, Arc<Mutex<Vec<usize>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let model = Self {
            calls: calls.clone(),
            delay: Duration::ZERO,
            panic_on: None,
        };
        (model, calls)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn panicking_on(mut self, text: &str) -> Self {
        self.panic_on = Some(text.to_string());
        self
    }
}

pub fn vector_for(text: &str) -> Vec<f32> {
    let first = text.chars().next().map_or(0.0, |c| c as u32 as f32);
    let sum: f32 = text.bytes().map(f32::from).sum();
    let raw = [1.0, text.len() as f32, first, sum];
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    raw.iter().map(|x| x / norm).collect()
}

impl ModelResource for RecordingModel {
    fn encode(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        self.calls.lock().push(texts.len());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(trigger) = &self.panic_on {
            if texts.iter().any(|t| t == trigger) {
                panic!("model fault on {trigger}");
            }
        }
        if texts.iter().any(|t| t == POISON) {
            return Err(InferenceError::InferenceFailure("poisoned input".to_string()));
        }
        Ok(texts.iter().map(|t| vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

/// Model that returns one vector too few.
pub struct ShortModel;

impl ModelResource for ShortModel {
    fn encode(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        Ok(texts.iter().skip(1).map(|t| vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        4
    }

    fn model_name(&self) -> &str {
        "short"
    }
}
