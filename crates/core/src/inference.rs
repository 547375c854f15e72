//! Model-agnostic inference abstraction.
//!
//! The embedding model is an opaque, stateful compute resource. Everything
//! above it (batching, scheduling, HTTP) talks to it only through the
//! [`ModelResource`] trait, so the serving core can be exercised with test
//! doubles as easily as with the real encoder.

use std::fmt;

/// A single embedding model bound to one compute context.
///
/// Implementations are `Send` so they can be moved onto a worker thread, but
/// are deliberately not required to be `Sync`: encode takes `&mut self` and
/// exactly one caller (the scheduler) may own the resource at a time.
pub trait ModelResource: Send {
    /// Encode an ordered batch of texts into unit-length vectors.
    ///
    /// On success the returned vector has exactly one entry per input text,
    /// in input order. The call is all-or-nothing over its input.
    fn encode(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError>;

    /// Fixed dimension of every vector this model produces.
    fn dimension(&self) -> usize;

    /// Model name for metrics/logging.
    fn model_name(&self) -> &str;

    /// Largest batch the model accepts in one call.
    fn max_batch_size(&self) -> usize {
        usize::MAX
    }

    /// Warm up the model (allocate buffers, run a dummy pass).
    fn warm_up(&mut self) -> Result<(), InferenceError> {
        Ok(())
    }
}

impl<M: ModelResource + ?Sized> ModelResource for Box<M> {
    fn encode(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
        (**self).encode(texts)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn max_batch_size(&self) -> usize {
        (**self).max_batch_size()
    }

    fn warm_up(&mut self) -> Result<(), InferenceError> {
        (**self).warm_up()
    }
}

/// Errors that can occur during a model call.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceError {
    /// The model has not been loaded, or was lost after a fault.
    ModelNotLoaded(String),
    /// The batch exceeds what the model accepts in one call.
    BatchTooLarge { max: usize, got: usize },
    /// One input text exceeds the model's input-length limit.
    InputTooLong { index: usize, max: usize, got: usize },
    /// The model returned a different number of vectors than it was given texts.
    OutputMismatch { expected: usize, got: usize },
    /// Inference execution failed.
    InferenceFailure(String),
}

impl fmt::Display for InferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InferenceError::ModelNotLoaded(msg) => write!(f, "model not loaded: {msg}"),
            InferenceError::BatchTooLarge { max, got } => {
                write!(f, "batch too large: max={max}, got={got}")
            }
            InferenceError::InputTooLong { index, max, got } => {
                write!(f, "input {index} too long: max={max} chars, got={got}")
            }
            InferenceError::OutputMismatch { expected, got } => {
                write!(f, "model returned {got} vectors for {expected} inputs")
            }
            InferenceError::InferenceFailure(msg) => write!(f, "inference failure: {msg}"),
        }
    }
}

impl std::error::Error for InferenceError {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant;

    impl ModelResource for Constant {
        fn encode(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, InferenceError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "constant"
        }
    }

    #[test]
    fn test_boxed_model_delegates() {
        let mut model: Box<dyn ModelResource> = Box::new(Constant);
        let out = model.encode(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(model.dimension(), 2);
        assert_eq!(model.model_name(), "constant");
        assert_eq!(model.max_batch_size(), usize::MAX);
        assert!(model.warm_up().is_ok());
    }

    #[test]
    fn test_error_display() {
        let err = InferenceError::InputTooLong {
            index: 3,
            max: 10,
            got: 12,
        };
        assert_eq!(err.to_string(), "input 3 too long: max=10 chars, got=12");

        let err = InferenceError::BatchTooLarge { max: 4, got: 9 };
        assert_eq!(err.to_string(), "batch too large: max=4, got=9");
    }
}
