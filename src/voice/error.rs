//! Error taxonomy for the speech pipeline.
//!
//! Generation-side failures are scoped to a single chunk: the scheduler
//! reports them and keeps draining.  Playback failures are scoped to a
//! single item.

use thiserror::Error;

/// Errors raised while segmenting, loading voice styles or synthesizing.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Text could not be segmented.  Empty input never raises this.
    #[error("segmentation failed: {0}")]
    Segmentation(String),

    /// Voice asset could not be fetched (network failure or empty payload).
    #[error("failed to fetch voice asset for \"{voice}\": {reason}")]
    AssetFetch { voice: String, reason: String },

    /// Voice style data has the wrong shape.
    #[error("invalid voice data: {0}")]
    Validation(String),

    /// The voice id is not in the catalog.
    #[error("voice \"{0}\" not found")]
    UnknownVoice(String),

    /// The underlying model failed for one chunk.
    #[error("synthesis failed for chunk {index}: {source}")]
    Synthesis {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl VoiceError {
    pub fn asset_fetch(voice: &str, reason: impl Into<String>) -> Self {
        Self::AssetFetch {
            voice: voice.to_string(),
            reason: reason.into(),
        }
    }

    /// Sequence index of the chunk this error belongs to, if known.
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::Synthesis { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Errors raised by an [`super::sink::AudioSink`].
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("audio sink failed to start playback: {0}")]
    Start(String),

    #[error("audio sink failed to stop playback: {0}")]
    Stop(String),

    #[error("audio sink is closed")]
    Closed,

    #[error("audio sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audio encoding failed: {0}")]
    Encode(#[from] hound::Error),
}
