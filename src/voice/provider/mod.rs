//! Speech model trait and implementations.
//!
//! The model is opaque to the pipeline: it tokenizes text, and turns text
//! plus a style vector into PCM.

pub mod http;
pub mod mock;

use anyhow::Result;
use async_trait::async_trait;

/// Fixed output sample rate of the synthesis model, in Hz.
pub const SAMPLE_RATE: u32 = 24000;

/// Inputs for one model invocation.
#[derive(Debug, Clone, Copy)]
pub struct ModelInput<'a> {
    pub text: &'a str,
    /// Phonemizer language code (`'a'` American, `'b'` British English).
    pub language: char,
    /// Style vector, exactly `STYLE_DIM` values.
    pub style: &'a [f32],
    /// Speaking speed factor (1.0 = normal).
    pub speed: f32,
}

/// A text-to-speech model conditioned on a style vector.
#[async_trait]
pub trait SpeechModel: Send + Sync {
    /// Number of input tokens for `text`, excluding padding.
    fn token_count(&self, text: &str, language: char) -> usize;

    /// Synthesize mono PCM at [`SAMPLE_RATE`].
    async fn synthesize(&self, input: ModelInput<'_>) -> Result<Vec<f32>>;

    /// Execution device label reported to the control context.
    fn device(&self) -> &str {
        "cpu"
    }

    /// Human-readable model name.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    #[async_trait]
    impl SpeechModel for Fixed {
        fn token_count(&self, text: &str, _language: char) -> usize {
            text.len()
        }

        async fn synthesize(&self, input: ModelInput<'_>) -> Result<Vec<f32>> {
            Ok(vec![input.speed; input.style.len()])
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn default_device_is_cpu() {
        let model = Fixed;
        assert_eq!(model.device(), "cpu");
        let pcm = model
            .synthesize(ModelInput {
                text: "hi",
                language: 'a',
                style: &[0.0; 4],
                speed: 1.5,
            })
            .await
            .unwrap();
        assert_eq!(pcm, vec![1.5; 4]);
    }
}
