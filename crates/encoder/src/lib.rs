pub mod engine;
pub mod model;

pub use engine::EncoderEngine;
pub use model::EncoderModel;
