//! WAV file output.
//!
//! Items are appended to a single 16-bit mono WAV file.  In paced mode each
//! item only "ends" after its real duration has elapsed, so stop and
//! ordering behave like a live device.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::AudioSink;
use crate::voice::audio::{duration_of, pcm_f32_to_i16};
use crate::voice::error::PlaybackError;
use crate::voice::playback::PlaybackItem;

pub struct WavFileSink {
    path: PathBuf,
    sample_rate: u32,
    writer: Option<WavWriter<BufWriter<File>>>,
    paced: bool,
    current: Option<JoinHandle<()>>,
    samples_written: u64,
}

impl WavFileSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec)
            .with_context(|| format!("failed to create WAV file {}", path.display()))?;

        info!(path = %path.display(), sample_rate, "Writing audio to WAV file");
        Ok(Self {
            path,
            sample_rate,
            writer: Some(writer),
            paced: false,
            current: None,
            samples_written: 0,
        })
    }

    /// Hold each item for its real duration before reporting its end.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl AudioSink for WavFileSink {
    fn play(&mut self, item: &PlaybackItem) -> Result<oneshot::Receiver<()>, PlaybackError> {
        let writer = self.writer.as_mut().ok_or(PlaybackError::Closed)?;
        if item.sample_rate != self.sample_rate {
            return Err(PlaybackError::Start(format!(
                "item {} is {} Hz, file is {} Hz",
                item.index, item.sample_rate, self.sample_rate
            )));
        }

        for sample in pcm_f32_to_i16(&item.pcm) {
            writer.write_sample(sample)?;
        }
        writer.flush()?;
        self.samples_written += item.pcm.len() as u64;
        debug!(index = item.index, samples = item.pcm.len(), "Wrote item to WAV");

        let (tx, rx) = oneshot::channel();
        if self.paced {
            let duration = duration_of(item.pcm.len(), item.sample_rate);
            self.current = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let _ = tx.send(());
            }));
        } else {
            let _ = tx.send(());
        }
        Ok(rx)
    }

    fn stop(&mut self) -> Result<(), PlaybackError> {
        if let Some(timer) = self.current.take() {
            timer.abort();
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        self.stop()?;
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(
                path = %self.path.display(),
                samples = self.samples_written,
                "WAV file finalized"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "wav"
    }
}
