//! Mock speech model for testing.
//!
//! Generates silence or sine-wave audio with deterministic duration based
//! on input text length, and records call statistics so tests can check
//! ordering and concurrency without a real model.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::sleep;

use super::{ModelInput, SpeechModel, SAMPLE_RATE};

// ── Configuration ────────────────────────────────────────────────

/// Waveform type for mock audio generation.
#[derive(Debug, Clone)]
pub enum MockWaveform {
    Silence,
    Sine { frequency_hz: f32, amplitude: f32 },
}

/// Configuration for [`MockSpeechModel`].
#[derive(Debug, Clone)]
pub struct MockModelConfig {
    pub ms_per_char: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub waveform: MockWaveform,
    pub latency: Duration,
    /// Fail any call whose text contains this marker.
    pub fail_marker: Option<String>,
}

impl Default for MockModelConfig {
    fn default() -> Self {
        Self {
            ms_per_char: 50.0,
            min_duration_ms: 100.0,
            max_duration_ms: 30000.0,
            waveform: MockWaveform::Silence,
            latency: Duration::ZERO,
            fail_marker: None,
        }
    }
}

// ── Statistics ───────────────────────────────────────────────────

/// One recorded model call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub text: String,
    pub language: char,
    /// First value of the style vector (identifies the style in tests).
    pub style_marker: f32,
    pub style_len: usize,
    pub speed: f32,
}

/// Call statistics shared between the model and the test.
#[derive(Debug, Default)]
pub struct MockModelStats {
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: Mutex<Vec<MockCall>>,
}

impl MockModelStats {
    /// Highest number of simultaneously running `synthesize` calls.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Calls in the order they started.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn enter(&self, call: MockCall) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ── Model ────────────────────────────────────────────────────────

/// Mock speech model that generates deterministic audio.
pub struct MockSpeechModel {
    config: MockModelConfig,
    stats: Arc<MockModelStats>,
}

impl MockSpeechModel {
    pub fn new(config: MockModelConfig) -> Self {
        Self {
            config,
            stats: Arc::new(MockModelStats::default()),
        }
    }

    /// Create a silent mock model with default settings.
    pub fn silent() -> Self {
        Self::new(MockModelConfig::default())
    }

    /// Create a sine-wave mock model at the given frequency.
    pub fn sine(frequency_hz: f32) -> Self {
        Self::new(MockModelConfig {
            waveform: MockWaveform::Sine {
                frequency_hz,
                amplitude: 0.8,
            },
            ..Default::default()
        })
    }

    /// Set simulated synthesis latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.config.latency = latency;
        self
    }

    /// Fail calls whose text contains `marker`.
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.config.fail_marker = Some(marker.into());
        self
    }

    pub fn stats(&self) -> Arc<MockModelStats> {
        Arc::clone(&self.stats)
    }

    fn render(&self, text: &str, speed: f32) -> Vec<f32> {
        let char_count = text.chars().count() as f64;
        let speed = if speed > 0.0 { speed as f64 } else { 1.0 };
        let duration_ms = (char_count * self.config.ms_per_char / speed)
            .clamp(self.config.min_duration_ms, self.config.max_duration_ms);
        let sample_count = (SAMPLE_RATE as f64 * duration_ms / 1000.0) as usize;

        match &self.config.waveform {
            MockWaveform::Silence => vec![0.0f32; sample_count],
            MockWaveform::Sine {
                frequency_hz,
                amplitude,
            } => (0..sample_count)
                .map(|i| {
                    let t = i as f32 / SAMPLE_RATE as f32;
                    amplitude * (2.0 * std::f32::consts::PI * frequency_hz * t).sin()
                })
                .collect(),
        }
    }
}

#[async_trait]
impl SpeechModel for MockSpeechModel {
    fn token_count(&self, text: &str, _language: char) -> usize {
        text.chars().count()
    }

    async fn synthesize(&self, input: ModelInput<'_>) -> Result<Vec<f32>> {
        self.stats.enter(MockCall {
            text: input.text.to_string(),
            language: input.language,
            style_marker: input.style.first().copied().unwrap_or_default(),
            style_len: input.style.len(),
            speed: input.speed,
        });

        if !self.config.latency.is_zero() {
            sleep(self.config.latency).await;
        }

        let result = match &self.config.fail_marker {
            Some(marker) if input.text.contains(marker.as_str()) => {
                Err(anyhow::anyhow!("mock model failure on {:?}", input.text))
            }
            _ => Ok(self.render(input.text, input.speed)),
        };

        self.stats.exit();
        result
    }

    fn device(&self) -> &str {
        "mock"
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(text: &'a str, style: &'a [f32]) -> ModelInput<'a> {
        ModelInput {
            text,
            language: 'a',
            style,
            speed: 1.0,
        }
    }

    #[tokio::test]
    async fn duration_calculation() {
        let model = MockSpeechModel::silent();
        let pcm = model.synthesize(input("hello", &[0.0; 4])).await.unwrap();
        // 5 chars * 50 ms = 250 ms at 24 kHz
        assert_eq!(pcm.len(), 6000);
    }

    #[tokio::test]
    async fn min_duration() {
        let model = MockSpeechModel::silent();
        let pcm = model.synthesize(input("a", &[0.0; 4])).await.unwrap();
        assert_eq!(pcm.len(), 2400);
    }

    #[tokio::test]
    async fn faster_speed_shortens_audio() {
        let model = MockSpeechModel::silent();
        let normal = model.synthesize(input("hello world", &[0.0; 4])).await.unwrap();
        let fast = model
            .synthesize(ModelInput {
                speed: 2.0,
                ..input("hello world", &[0.0; 4])
            })
            .await
            .unwrap();
        assert!(fast.len() < normal.len());
    }

    #[tokio::test]
    async fn sine_wave() {
        let model = MockSpeechModel::sine(440.0);
        let pcm = model.synthesize(input("hello", &[0.0; 4])).await.unwrap();
        let max_amp = pcm.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(max_amp > 0.4, "max amplitude was {}", max_amp);
    }

    #[tokio::test]
    async fn failure_marker() {
        let model = MockSpeechModel::silent().failing_on("BOOM");
        assert!(model.synthesize(input("fine", &[0.0; 4])).await.is_ok());
        assert!(model.synthesize(input("a BOOM b", &[0.0; 4])).await.is_err());
        assert_eq!(model.stats().active(), 0);
    }

    #[tokio::test]
    async fn records_calls() {
        let model = MockSpeechModel::silent();
        model.synthesize(input("one", &[3.0; 8])).await.unwrap();
        let calls = model.stats().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].text, "one");
        assert_eq!(calls[0].style_marker, 3.0);
        assert_eq!(calls[0].style_len, 8);
        assert_eq!(model.stats().max_active(), 1);
    }

    #[test]
    fn token_count_is_char_count() {
        let model = MockSpeechModel::silent();
        assert_eq!(model.token_count("héllo", 'a'), 5);
    }
}
