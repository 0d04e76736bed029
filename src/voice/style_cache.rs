//! Voice style tables and their two-level cache.
//!
//! A voice asset is a flat little-endian `f32` array split into contiguous
//! blocks of [`STYLE_DIM`] values ("styles").  [`VoiceStyleCache::load`]
//! resolves a voice in three steps:
//!
//! 1. the in-memory table (no I/O),
//! 2. the durable [`BlobCache`] keyed by the asset URL,
//! 3. the network, writing the payload back to the durable cache.
//!
//! Durable cache failures never fail a load; they are logged and the load
//! falls through to the network.  Concurrent loads of the same voice share
//! one fetch, and a failed load leaves nothing behind so it can be retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::blob_cache::BlobCache;
use super::error::VoiceError;
use super::voices::{voice_url, VoiceCatalog, DEFAULT_VOICE_BASE_URL};

/// Number of `f32` values in one style vector.
pub const STYLE_DIM: usize = 256;

/// An immutable per-voice style table.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceStyleTable {
    voice_id: String,
    samples: Vec<f32>,
}

impl VoiceStyleTable {
    /// Build a table, checking that its length is a positive multiple of
    /// [`STYLE_DIM`].
    pub fn new(voice_id: impl Into<String>, samples: Vec<f32>) -> Result<Self, VoiceError> {
        let voice_id = voice_id.into();
        if samples.len() < STYLE_DIM {
            return Err(VoiceError::Validation(format!(
                "voice data for \"{voice_id}\" is too small: expected at least {STYLE_DIM} values, got {}",
                samples.len()
            )));
        }
        if samples.len() % STYLE_DIM != 0 {
            return Err(VoiceError::Validation(format!(
                "voice data for \"{voice_id}\" has {} values, not a multiple of {STYLE_DIM}",
                samples.len()
            )));
        }
        Ok(Self { voice_id, samples })
    }

    /// Decode a little-endian `f32` payload.
    pub fn from_bytes(voice_id: &str, bytes: &[u8]) -> Result<Self, VoiceError> {
        if bytes.len() % 4 != 0 {
            return Err(VoiceError::Validation(format!(
                "voice data for \"{voice_id}\" is {} bytes, not a whole number of f32 values",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Self::new(voice_id, samples)
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of style vectors in the table (at least 1).
    pub fn style_count(&self) -> usize {
        self.samples.len() / STYLE_DIM
    }

    /// Largest valid offset: the start of the last style.
    pub fn max_offset(&self) -> usize {
        (self.style_count() - 1) * STYLE_DIM
    }

    /// Select the style vector for a bucket index, clamping to the last
    /// style when the bucket is out of range.
    pub fn select(&self, bucket: usize) -> Result<StyleSelection, VoiceError> {
        let requested_offset = bucket.saturating_mul(STYLE_DIM);
        let offset = requested_offset.min(self.max_offset());

        let vector = self
            .samples
            .get(offset..offset + STYLE_DIM)
            .map(<[f32]>::to_vec)
            .unwrap_or_default();
        if vector.len() != STYLE_DIM {
            return Err(VoiceError::Validation(format!(
                "style slice size mismatch: expected {STYLE_DIM} values, got {} (offset {offset}, data length {})",
                vector.len(),
                self.samples.len()
            )));
        }

        Ok(StyleSelection {
            requested_offset,
            offset,
            vector,
        })
    }
}

/// A style vector chosen from a [`VoiceStyleTable`].
#[derive(Debug, Clone, PartialEq)]
pub struct StyleSelection {
    /// Offset asked for before clamping.
    pub requested_offset: usize,
    /// Offset actually used; a multiple of [`STYLE_DIM`] within the table.
    pub offset: usize,
    /// Exactly [`STYLE_DIM`] values.
    pub vector: Vec<f32>,
}

impl StyleSelection {
    pub fn clamped(&self) -> bool {
        self.requested_offset != self.offset
    }

    pub fn requested_bucket(&self) -> usize {
        self.requested_offset / STYLE_DIM
    }

    pub fn bucket(&self) -> usize {
        self.offset / STYLE_DIM
    }
}

// ── Network ──────────────────────────────────────────────────────

/// Fetches raw voice assets.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch the payload at `url`.  Non-success responses are errors.
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// [`AssetFetcher`] over HTTP(S).
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{status}");
        }
        Ok(response.bytes().await?.to_vec())
    }
}

// ── Cache ────────────────────────────────────────────────────────

/// Process-wide voice style cache.
pub struct VoiceStyleCache {
    base_url: String,
    catalog: VoiceCatalog,
    fetcher: Arc<dyn AssetFetcher>,
    durable: Option<Arc<dyn BlobCache>>,
    tables: DashMap<String, Arc<OnceCell<Arc<VoiceStyleTable>>>>,
}

impl VoiceStyleCache {
    pub fn new(
        catalog: VoiceCatalog,
        fetcher: Arc<dyn AssetFetcher>,
        durable: Option<Arc<dyn BlobCache>>,
    ) -> Self {
        Self {
            base_url: DEFAULT_VOICE_BASE_URL.to_string(),
            catalog,
            fetcher,
            durable,
            tables: DashMap::new(),
        }
    }

    /// Override the asset base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    /// Canonical asset URL for a voice.
    pub fn url_for(&self, voice_id: &str) -> String {
        voice_url(&self.base_url, voice_id)
    }

    /// Whether a voice is already resident in memory.
    pub fn is_loaded(&self, voice_id: &str) -> bool {
        self.tables
            .get(voice_id)
            .is_some_and(|cell| cell.initialized())
    }

    /// Load a voice's style table.
    pub async fn load(&self, voice_id: &str) -> Result<Arc<VoiceStyleTable>, VoiceError> {
        if !self.catalog.contains(voice_id) {
            return Err(VoiceError::UnknownVoice(voice_id.to_string()));
        }

        // Clone the cell out so the map shard lock is not held across awaits.
        let cell = self
            .tables
            .entry(voice_id.to_string())
            .or_default()
            .value()
            .clone();

        if let Some(table) = cell.get() {
            debug!(
                voice = voice_id,
                styles = table.style_count(),
                "Using in-memory voice data"
            );
            return Ok(Arc::clone(table));
        }

        cell.get_or_try_init(|| self.load_uncached(voice_id))
            .await
            .map(Arc::clone)
    }

    async fn load_uncached(&self, voice_id: &str) -> Result<Arc<VoiceStyleTable>, VoiceError> {
        let url = self.url_for(voice_id);

        if let Some(table) = self.load_from_durable(voice_id, &url).await {
            return Ok(Arc::new(table));
        }

        info!(voice = voice_id, url = %url, "Fetching voice data");
        let bytes = self
            .fetcher
            .fetch(&url)
            .await
            .map_err(|e| VoiceError::asset_fetch(voice_id, e.to_string()))?;
        if bytes.is_empty() {
            return Err(VoiceError::asset_fetch(voice_id, "voice file is empty"));
        }

        let table = VoiceStyleTable::from_bytes(voice_id, &bytes)?;

        if let Some(durable) = &self.durable {
            if let Err(e) = durable.put(&url, &bytes).await {
                warn!(voice = voice_id, error = %e, "Unable to cache voice file");
            }
        }

        info!(
            voice = voice_id,
            values = table.samples().len(),
            styles = table.style_count(),
            "Voice data loaded"
        );
        Ok(Arc::new(table))
    }

    /// Try the durable cache; any failure or invalid payload is a miss.
    async fn load_from_durable(&self, voice_id: &str, url: &str) -> Option<VoiceStyleTable> {
        let durable = self.durable.as_ref()?;
        let bytes = match durable.get(url).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(voice = voice_id, error = %e, "Unable to read voice cache");
                return None;
            }
        };

        match VoiceStyleTable::from_bytes(voice_id, &bytes) {
            Ok(table) => {
                debug!(voice = voice_id, styles = table.style_count(), "Voice data from durable cache");
                Some(table)
            }
            Err(e) => {
                warn!(voice = voice_id, error = %e, "Discarding invalid cached voice data");
                None
            }
        }
    }
}
