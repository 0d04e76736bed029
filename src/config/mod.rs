//! Configuration loaded from `~/.voicestream/config.toml`.
//!
//! Every section and field has a default, so a missing file or a partial
//! file is valid.

pub mod schema;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::voice::blob_cache::DEFAULT_MAX_SIZE_MB;
use crate::voice::splitter::DEFAULT_MAX_CHUNK_LEN;
use crate::voice::voices::{VoiceCatalog, DEFAULT_VOICE, DEFAULT_VOICE_BASE_URL};

pub use schema::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub voices: VoicesConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on chunk length in characters.
    #[serde(default = "default_max_chunk_len")]
    pub max_chunk_len: usize,
    /// Speaking speed factor.
    #[serde(default = "default_speed")]
    pub speed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoicesConfig {
    #[serde(default = "default_voice")]
    pub default_voice: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Voices loaded before the pipeline reports ready.
    #[serde(default = "default_preload")]
    pub preload: Vec<String>,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: String,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    #[serde(default = "default_cache_max_size_mb")]
    pub cache_max_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// `mock` or `http`.
    #[serde(default = "default_model_provider")]
    pub provider: String,
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,
    /// Device label reported by the remote model.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_model_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// `wav` or `null`.
    #[serde(default = "default_sink")]
    pub sink: String,
    #[serde(default = "default_output")]
    pub output: String,
    /// Hold each item for its real duration.
    #[serde(default)]
    pub paced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_max_chunk_len() -> usize {
    DEFAULT_MAX_CHUNK_LEN
}
fn default_speed() -> f32 {
    1.0
}
fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}
fn default_base_url() -> String {
    DEFAULT_VOICE_BASE_URL.to_string()
}
fn default_preload() -> Vec<String> {
    vec![DEFAULT_VOICE.to_string()]
}
fn default_fetch_timeout() -> String {
    "30s".to_string()
}
fn default_true() -> bool {
    true
}
fn default_cache_path() -> String {
    "~/.voicestream/cache/voices.db".to_string()
}
fn default_cache_max_size_mb() -> u64 {
    DEFAULT_MAX_SIZE_MB
}
fn default_model_provider() -> String {
    "mock".to_string()
}
fn default_model_endpoint() -> String {
    "http://127.0.0.1:8880".to_string()
}
fn default_device() -> String {
    "cpu".to_string()
}
fn default_model_timeout() -> String {
    "60s".to_string()
}
fn default_sink() -> String {
    "wav".to_string()
}
fn default_output() -> String {
    "speech.wav".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: default_max_chunk_len(),
            speed: default_speed(),
        }
    }
}

impl Default for VoicesConfig {
    fn default() -> Self {
        Self {
            default_voice: default_voice(),
            base_url: default_base_url(),
            preload: default_preload(),
            fetch_timeout: default_fetch_timeout(),
            cache_enabled: true,
            cache_path: default_cache_path(),
            cache_max_size_mb: default_cache_max_size_mb(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            endpoint: default_model_endpoint(),
            device: default_device(),
            timeout: default_model_timeout(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sink: default_sink(),
            output: default_output(),
            paced: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// `~/.voicestream/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::BaseDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
        Ok(dirs.home_dir().join(".voicestream").join("config.toml"))
    }

    /// Load from `path` (or the default path) and validate.  A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => expand_path(&p.to_string_lossy()),
            None => Self::default_path()?,
        };

        let config = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            Self::from_toml(&content).with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            Self::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse config")
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.max_chunk_len == 0 {
            bail!("pipeline.max_chunk_len must be at least 1");
        }
        if self.pipeline.speed.is_nan() || self.pipeline.speed <= 0.0 {
            bail!("pipeline.speed must be positive, got {}", self.pipeline.speed);
        }

        let catalog = VoiceCatalog::kokoro();
        if !catalog.contains(&self.voices.default_voice) {
            bail!("voices.default_voice \"{}\" is not a known voice", self.voices.default_voice);
        }
        for voice in &self.voices.preload {
            if !catalog.contains(voice) {
                bail!("voices.preload contains unknown voice \"{}\"", voice);
            }
        }

        self.fetch_timeout()?;
        self.model_timeout()?;

        match self.model.provider.as_str() {
            "mock" | "http" => {}
            other => bail!("model.provider must be \"mock\" or \"http\", got \"{}\"", other),
        }
        match self.playback.sink.as_str() {
            "wav" | "null" => {}
            other => bail!("playback.sink must be \"wav\" or \"null\", got \"{}\"", other),
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Result<Duration> {
        parse_duration(&self.voices.fetch_timeout)
            .map_err(|e| anyhow!("voices.fetch_timeout: {}", e))
    }

    pub fn model_timeout(&self) -> Result<Duration> {
        parse_duration(&self.model.timeout).map_err(|e| anyhow!("model.timeout: {}", e))
    }

    pub fn cache_path(&self) -> PathBuf {
        expand_path(&self.voices.cache_path)
    }

    pub fn output_path(&self) -> PathBuf {
        expand_path(&self.playback.output)
    }
}

/// Expand `~` and environment variables in a configured path.
pub fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| shellexpand::tilde(path).into_owned());
    PathBuf::from(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.max_chunk_len, 600);
        assert_eq!(config.pipeline.speed, 1.0);
        assert_eq!(config.voices.default_voice, "af_heart");
        assert_eq!(config.voices.cache_max_size_mb, 200);
        assert_eq!(config.fetch_timeout().unwrap(), Duration::from_secs(30));
        assert!(!config.playback.paced);
        assert_eq!(config.model.provider, "mock");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [pipeline]
            max_chunk_len = 120

            [voices]
            default_voice = "bf_emma"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.max_chunk_len, 120);
        assert_eq!(config.pipeline.speed, 1.0);
        assert_eq!(config.voices.default_voice, "bf_emma");
        assert_eq!(config.voices.preload, vec!["af_heart".to_string()]);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = Config::default();
        config.pipeline.max_chunk_len = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pipeline.speed = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.voices.default_voice = "zz_nobody".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("zz_nobody"));

        let mut config = Config::default();
        config.voices.fetch_timeout = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.model.provider = "onnx".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn playback_rate_is_not_a_setting() {
        let serialized = toml::to_string(&Config::default()).unwrap();
        assert!(!serialized.contains("sample_rate"));

        // Older files that still carry the key load fine.
        let config = Config::from_toml("[playback]\nsample_rate = 48000\nsink = \"null\"\n").unwrap();
        assert_eq!(config.playback.sink, "null");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.pipeline.max_chunk_len, 600);
    }

    #[test]
    fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        std::fs::write(&path, "[pipeline]\nspeed = 1.5\n").unwrap();
        assert_eq!(Config::load(Some(&path)).unwrap().pipeline.speed, 1.5);

        std::fs::write(&path, "[pipeline]\nspeed = -1.0\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());

        std::fs::write(&path, "not = [valid").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn expand_path_handles_tilde() {
        let expanded = expand_path("~/x/voices.db");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.ends_with("x/voices.db"));
        assert_eq!(expand_path("/tmp/a.wav"), PathBuf::from("/tmp/a.wav"));
    }
}
