//! Remote inference server speech model.
//!
//! Flow:
//! 1. POST `{endpoint}/synthesize` with JSON `{text, language, style, speed}`
//! 2. Receive a mono WAV at 24 kHz (16-bit int or 32-bit float)
//! 3. Decode to f32 PCM

use std::io::Cursor;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::{ModelInput, SpeechModel, SAMPLE_RATE};
use crate::voice::audio::pcm_i16_to_f32;

/// Token budget of the model context, excluding the two padding tokens.
pub const MAX_TOKENS: usize = 510;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: String,
    style: &'a [f32],
    speed: f32,
}

/// Speech model served over HTTP.
pub struct HttpSpeechModel {
    endpoint: String,
    device: String,
    client: reqwest::Client,
}

impl HttpSpeechModel {
    pub fn new(endpoint: impl Into<String>, device: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build inference HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            device: device.into(),
            client,
        })
    }

    fn synthesize_url(&self) -> String {
        format!("{}/synthesize", self.endpoint.trim_end_matches('/'))
    }

    /// Decode WAV bytes into mono f32 PCM.
    fn parse_wav(wav_bytes: &[u8]) -> Result<Vec<f32>> {
        let reader =
            hound::WavReader::new(Cursor::new(wav_bytes)).context("failed to parse WAV response")?;
        let spec = reader.spec();
        if spec.channels != 1 {
            anyhow::bail!("expected mono audio, got {} channels", spec.channels);
        }
        if spec.sample_rate != SAMPLE_RATE {
            anyhow::bail!(
                "expected {} Hz audio, got {} Hz",
                SAMPLE_RATE,
                spec.sample_rate
            );
        }

        match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("failed to read WAV samples"),
            hound::SampleFormat::Int => {
                let samples = reader
                    .into_samples::<i16>()
                    .collect::<Result<Vec<_>, _>>()
                    .context("failed to read WAV samples")?;
                Ok(pcm_i16_to_f32(&samples))
            }
        }
    }
}

#[async_trait]
impl SpeechModel for HttpSpeechModel {
    fn token_count(&self, text: &str, _language: char) -> usize {
        text.chars().count().min(MAX_TOKENS)
    }

    async fn synthesize(&self, input: ModelInput<'_>) -> Result<Vec<f32>> {
        let body = SynthesizeRequest {
            text: input.text,
            language: input.language.to_string(),
            style: input.style,
            speed: input.speed,
        };

        let wav_bytes = self
            .client
            .post(self.synthesize_url())
            .json(&body)
            .send()
            .await
            .context("synthesis request failed")?
            .error_for_status()
            .context("synthesis returned error status")?
            .bytes()
            .await
            .context("failed to read synthesis response body")?;

        let pcm = Self::parse_wav(&wav_bytes)?;
        debug!(samples = pcm.len(), "Remote synthesis complete");
        Ok(pcm)
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn name(&self) -> &str {
        "http"
    }
}
