//! Messages between the control context and the compute context.
//!
//! Both directions travel over unbounded mpsc channels, so delivery is in
//! send order, exactly once, and never blocks the sender.  The enums are
//! serde-tagged so the same schema can cross a process boundary.

use serde::{Deserialize, Serialize};

use super::voices::VoiceCatalog;

/// Control → compute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerRequest {
    /// Synthesize one chunk.
    Generate {
        index: usize,
        text: String,
        voice_id: String,
        epoch: u64,
    },
    /// Drop queued requests older than `epoch`.
    Cancel { epoch: u64 },
    /// Finish the in-flight call and exit.
    Shutdown,
}

/// Loading progress for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    /// `initiate`, `done` or `error`.
    pub status: String,
    /// Asset being loaded (voice id).
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LoadProgress {
    pub fn initiate(file: &str) -> Self {
        Self {
            status: "initiate".to_string(),
            file: file.to_string(),
            message: None,
        }
    }

    pub fn done(file: &str) -> Self {
        Self {
            status: "done".to_string(),
            file: file.to_string(),
            message: None,
        }
    }

    pub fn error(file: &str, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            file: file.to_string(),
            message: Some(message.into()),
        }
    }
}

/// Compute → control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerEvent {
    /// The compute context finished startup.
    Ready { voices: VoiceCatalog, device: String },
    /// Execution device of the model.
    Device { device: String },
    /// Asset loading progress.
    Progress { progress: LoadProgress },
    /// Audio for one chunk, in submission order.
    Stream {
        index: usize,
        audio: Vec<f32>,
        sample_rate: u32,
        text: String,
        epoch: u64,
    },
    /// The generation queue drained.
    Complete,
    /// One chunk failed; the stream continues.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        error: String,
        #[serde(default)]
        epoch: u64,
    },
}

impl WorkerEvent {
    /// Epoch of a per-chunk event.
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Stream { epoch, .. } | Self::Error { epoch, .. } => Some(*epoch),
            Self::Ready { .. } | Self::Device { .. } | Self::Progress { .. } | Self::Complete => None,
        }
    }
}
