//! Chunk synthesis: style selection plus one model call.
//!
//! The style bucket is the chunk's token count, so longer chunks use a
//! later style vector.  Buckets past the end of the voice's table are
//! clamped to the last style with a warning.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::VoiceError;
use super::provider::{ModelInput, SpeechModel, SAMPLE_RATE};
use super::splitter::TextChunk;
use super::style_cache::{StyleSelection, VoiceStyleCache};
use super::voices::language_code;

/// Synthesized audio for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Sequence index of the source chunk.
    pub index: usize,
    /// Mono PCM samples.
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    /// Text that was synthesized.
    pub text: String,
}

/// Turns text chunks into PCM for a given voice.
pub struct SpeechSynthesizer {
    styles: Arc<VoiceStyleCache>,
    model: Arc<dyn SpeechModel>,
    speed: f32,
}

impl SpeechSynthesizer {
    pub fn new(styles: Arc<VoiceStyleCache>, model: Arc<dyn SpeechModel>) -> Self {
        Self {
            styles,
            model,
            speed: 1.0,
        }
    }

    /// Set the speaking speed factor passed to every model call.
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn styles(&self) -> &Arc<VoiceStyleCache> {
        &self.styles
    }

    pub fn model(&self) -> &Arc<dyn SpeechModel> {
        &self.model
    }

    /// Resolve the style vector for `text` spoken by `voice_id`.
    pub async fn select_style(&self, text: &str, voice_id: &str) -> Result<StyleSelection, VoiceError> {
        let table = self.styles.load(voice_id).await?;
        let bucket = self.model.token_count(text, language_code(voice_id));
        let selection = table.select(bucket)?;

        if selection.clamped() {
            warn!(
                voice = voice_id,
                requested_offset = selection.requested_offset,
                max_offset = table.max_offset(),
                offset = selection.offset,
                styles = table.style_count(),
                requested_style = selection.requested_bucket() + 1,
                "Requested style exceeds voice data; using last style"
            );
        }
        Ok(selection)
    }

    /// Synthesize one chunk.
    pub async fn synthesize(&self, chunk: &TextChunk, voice_id: &str) -> Result<GenerationResult, VoiceError> {
        let selection = self.select_style(&chunk.text, voice_id).await?;

        debug!(
            index = chunk.index,
            voice = voice_id,
            bucket = selection.bucket(),
            "Synthesizing chunk"
        );

        let pcm = self
            .model
            .synthesize(ModelInput {
                text: &chunk.text,
                language: language_code(voice_id),
                style: &selection.vector,
                speed: self.speed,
            })
            .await
            .map_err(|source| VoiceError::Synthesis {
                index: chunk.index,
                source,
            })?;

        Ok(GenerationResult {
            index: chunk.index,
            pcm,
            sample_rate: SAMPLE_RATE,
            text: chunk.text.clone(),
        })
    }
}
