//! Inference backend implementations for gemline.
//!
//! All backends implement `gemline_core::InferenceBackend`. The relay talks
//! to exactly one backend; Gemini is the only one shipped.

pub mod gemini;

pub use gemini::{GeminiProvider, normalize_model_name};
