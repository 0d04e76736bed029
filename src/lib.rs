//! voicestream - streaming text-to-speech pipeline
//!
//! This crate provides:
//! - Bounded, deterministic text segmentation
//! - Single-flight FIFO synthesis in an isolated compute task
//! - Voice style caching with a durable SQLite layer
//! - Gapless, strictly sequential playback with stop/restart

pub mod config;
pub mod utils;
pub mod voice;

pub use config::Config;
