//! Client adapter for the Gemini generative-content API
//!
//! Builds request payloads from conversation turns, consumes the chunked
//! streaming response (repairing partial JSON fragments along the way),
//! accumulates cumulative text per candidate and part, reconciles token usage,
//! and classifies the model catalog into a deterministic priority ordering.

pub mod ai;
pub mod app;
pub mod config;
pub mod error;

pub use error::{Error, Result};
