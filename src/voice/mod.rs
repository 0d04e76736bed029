//! Streaming speech pipeline
//!
//! Text → segmenter → compute worker (single-flight synthesis) → playback
//!
//! The control side ([`PipelineController`]) and the compute side
//! ([`worker::ComputeWorker`]) share nothing but message channels.  Playback
//! runs in its own task that owns the audio sink.

pub mod audio;
pub mod blob_cache;
pub mod controller;
pub mod error;
pub mod generation;
pub mod message;
pub mod playback;
pub mod provider;
pub mod sanitize;
pub mod sink;
pub mod splitter;
pub mod style_cache;
pub mod synthesizer;
pub mod voices;
pub mod worker;


pub use controller::{ControllerOptions, PipelineController, PipelineEvent};
pub use error::{PlaybackError, VoiceError};

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::Config;
use blob_cache::{BlobCache, SqliteBlobCache};
use provider::http::HttpSpeechModel;
use provider::mock::MockSpeechModel;
use provider::SpeechModel;
use sink::AudioSink;
use style_cache::{HttpAssetFetcher, VoiceStyleCache};
use synthesizer::SpeechSynthesizer;
use voices::VoiceCatalog;

/// Open the durable voice cache if enabled.  Failure to open is logged and
/// the pipeline runs without it.
pub fn open_durable_cache(config: &Config) -> Option<Arc<dyn BlobCache>> {
    if !config.voices.cache_enabled {
        return None;
    }
    let path = config.cache_path();
    match SqliteBlobCache::open_with_limit(&path.to_string_lossy(), config.voices.cache_max_size_mb) {
        Ok(cache) => {
            info!(path = %path.display(), "Voice cache opened");
            Some(Arc::new(cache))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Voice cache unavailable; continuing without it");
            None
        }
    }
}

pub fn build_style_cache(config: &Config) -> Result<Arc<VoiceStyleCache>> {
    let fetcher = HttpAssetFetcher::new(config.fetch_timeout()?)?;
    let cache = VoiceStyleCache::new(
        VoiceCatalog::kokoro(),
        Arc::new(fetcher),
        open_durable_cache(config),
    )
    .with_base_url(config.voices.base_url.clone());
    Ok(Arc::new(cache))
}

pub fn build_model(config: &Config) -> Result<Arc<dyn SpeechModel>> {
    let model: Arc<dyn SpeechModel> = match config.model.provider.as_str() {
        "http" => Arc::new(
            HttpSpeechModel::new(
                config.model.endpoint.clone(),
                config.model.device.clone(),
                config.model_timeout()?,
            )
            .context("failed to create HTTP speech model")?,
        ),
        _ => Arc::new(MockSpeechModel::sine(220.0)),
    };
    info!(model = model.name(), device = model.device(), "Speech model selected");
    Ok(model)
}

pub fn build_synthesizer(config: &Config) -> Result<Arc<SpeechSynthesizer>> {
    let synthesizer = SpeechSynthesizer::new(build_style_cache(config)?, build_model(config)?)
        .with_speed(config.pipeline.speed);
    Ok(Arc::new(synthesizer))
}

/// Build every component from `config` and start the pipeline.
pub fn start_pipeline(config: &Config, sink: Box<dyn AudioSink>) -> Result<PipelineController> {
    let synthesizer = build_synthesizer(config)?;
    let options = ControllerOptions {
        max_chunk_len: config.pipeline.max_chunk_len,
        default_voice: config.voices.default_voice.clone(),
        preload: config.voices.preload.clone(),
        ..ControllerOptions::default()
    };
    Ok(PipelineController::start(synthesizer, sink, options))
}
