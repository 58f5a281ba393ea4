//! Inference client implementations for Cadence.
//!
//! All clients implement the `cadence_core::InferenceClient` trait.

pub mod openai_compat;

pub use openai_compat::{ClientSettings, OpenAiCompatClient};
