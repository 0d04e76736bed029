//! Control-side orchestration.
//!
//! [`PipelineController`] segments text, sends one `Generate` per chunk to
//! the compute worker, and forwards streamed audio to the playback
//! scheduler.  It owns the generation epoch: `stop` bumps it, and any
//! late audio tagged with an older epoch is discarded instead of played.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::VoiceError;
use super::message::{LoadProgress, WorkerEvent, WorkerRequest};
use super::playback::{PlaybackEvent, PlaybackItem, PlaybackScheduler};
use super::sanitize::sanitize_for_speech;
use super::sink::AudioSink;
use super::splitter::{TextSegmenter, DEFAULT_MAX_CHUNK_LEN};
use super::synthesizer::SpeechSynthesizer;
use super::voices::{VoiceCatalog, DEFAULT_VOICE};
use super::worker::{ComputeWorker, WorkerExitReason, WorkerHandle};
use crate::utils::preview;

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub max_chunk_len: usize,
    pub default_voice: String,
    /// Voices the worker loads before reporting ready.
    pub preload: Vec<String>,
    /// How long `shutdown` waits for the worker before cancelling it.
    pub shutdown_timeout: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_chunk_len: DEFAULT_MAX_CHUNK_LEN,
            default_voice: DEFAULT_VOICE.to_string(),
            preload: Vec::new(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// What the controller observed, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Device { device: String },
    Progress(LoadProgress),
    Ready { voices: VoiceCatalog, device: String },
    /// Audio for a chunk was handed to playback.
    Audio {
        index: usize,
        text: String,
        samples: usize,
        duration: Duration,
    },
    ChunkFailed { index: Option<usize>, error: String },
    /// A result from a stopped epoch arrived and was dropped.
    Discarded { index: Option<usize>, epoch: u64 },
    GenerationComplete,
    Playback(PlaybackEvent),
}

pub struct PipelineController {
    segmenter: TextSegmenter,
    default_voice: String,

    requests: mpsc::UnboundedSender<WorkerRequest>,
    worker_events: mpsc::UnboundedReceiver<WorkerEvent>,
    worker_cancel: CancellationToken,
    worker_task: Option<JoinHandle<Result<WorkerExitReason>>>,
    worker_closed: bool,
    shutdown_timeout: Duration,

    playback: PlaybackScheduler,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    playback_closed: bool,

    epoch: u64,
    next_index: usize,
    /// Chunks of the current epoch with no result yet.
    outstanding: usize,

    voices: Option<VoiceCatalog>,
    device: Option<String>,
}

impl PipelineController {
    /// Spawn the compute worker and playback task and wire them up.
    pub fn start(
        synthesizer: Arc<SpeechSynthesizer>,
        sink: Box<dyn AudioSink>,
        options: ControllerOptions,
    ) -> Self {
        let worker = ComputeWorker::spawn(synthesizer, options.preload.clone());
        let (playback, playback_events) = PlaybackScheduler::spawn(sink);
        Self::from_parts(worker, playback, playback_events, options)
    }

    pub fn from_parts(
        worker: WorkerHandle,
        playback: PlaybackScheduler,
        playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            segmenter: TextSegmenter::new(options.max_chunk_len),
            default_voice: options.default_voice,
            requests: worker.requests,
            worker_events: worker.events,
            worker_cancel: worker.cancel,
            worker_task: Some(worker.task),
            worker_closed: false,
            shutdown_timeout: options.shutdown_timeout,
            playback,
            playback_events,
            playback_closed: false,
            epoch: 0,
            next_index: 0,
            outstanding: 0,
            voices: None,
            device: None,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn is_ready(&self) -> bool {
        self.voices.is_some()
    }

    pub fn voices(&self) -> Option<&VoiceCatalog> {
        self.voices.as_ref()
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    /// Segment `text` and queue every chunk for synthesis with `voice_id`.
    ///
    /// Returns the number of chunks sent.  Empty text or an empty voice id
    /// sends nothing.
    pub fn speak(&mut self, text: &str, voice_id: &str) -> Result<usize> {
        let voice_id = voice_id.trim();
        if voice_id.is_empty() {
            warn!("No voice selected; ignoring speak request");
            return Ok(0);
        }
        if let Some(voices) = &self.voices {
            if !voices.contains(voice_id) {
                return Err(VoiceError::UnknownVoice(voice_id.to_string()).into());
            }
        }

        let cleaned = sanitize_for_speech(text);
        let chunks = self.segmenter.segment(&cleaned);
        if chunks.is_empty() {
            debug!("Nothing to speak after sanitizing");
            return Ok(0);
        }

        let count = chunks.len();
        for chunk in chunks {
            let index = self.next_index;
            debug!(index, chars = chunk.char_len(), text = %preview(&chunk.text, 40), "Queueing chunk");
            self.requests
                .send(WorkerRequest::Generate {
                    index,
                    text: chunk.text,
                    voice_id: voice_id.to_string(),
                    epoch: self.epoch,
                })
                .map_err(|_| anyhow!("compute worker is not running"))?;
            self.next_index += 1;
            self.outstanding += 1;
        }

        info!(
            chunks = count,
            voice = voice_id,
            epoch = self.epoch,
            text = %preview(&cleaned, 60),
            "Speaking"
        );
        Ok(count)
    }

    /// [`speak`](Self::speak) with the configured default voice.
    pub fn speak_default(&mut self, text: &str) -> Result<usize> {
        let voice = self.default_voice.clone();
        self.speak(text, &voice)
    }

    /// Halt playback and abandon everything queued so far.
    ///
    /// When this returns the device is silent, and nothing from before the
    /// call will be played.
    pub async fn stop(&mut self) {
        self.epoch += 1;
        self.outstanding = 0;
        if self
            .requests
            .send(WorkerRequest::Cancel { epoch: self.epoch })
            .is_err()
        {
            debug!("Compute worker gone; nothing to cancel");
        }
        self.playback.stop().await;
        info!(epoch = self.epoch, "Pipeline stopped");
    }

    /// Next event from either context.  `None` once both have shut down.
    pub async fn next_event(&mut self) -> Option<PipelineEvent> {
        loop {
            if self.worker_closed && self.playback_closed {
                return None;
            }
            tokio::select! {
                event = self.worker_events.recv(), if !self.worker_closed => match event {
                    Some(event) => return Some(self.on_worker_event(event)),
                    None => self.worker_closed = true,
                },
                event = self.playback_events.recv(), if !self.playback_closed => match event {
                    Some(event) => return Some(PipelineEvent::Playback(event)),
                    None => self.playback_closed = true,
                },
            }
        }
    }

    /// Wait for the compute worker to finish startup.
    pub async fn wait_ready(&mut self) -> Result<VoiceCatalog> {
        if let Some(voices) = &self.voices {
            return Ok(voices.clone());
        }
        while let Some(event) = self.next_event().await {
            if let PipelineEvent::Ready { voices, .. } = event {
                return Ok(voices);
            }
        }
        bail!("compute worker exited before it was ready")
    }

    /// Wait until every queued chunk has a result and playback went idle.
    /// Returns the events observed on the way.
    pub async fn finish(&mut self) -> Result<Vec<PipelineEvent>> {
        let mut events = Vec::new();
        while self.outstanding > 0 {
            match self.next_event().await {
                Some(event) => events.push(event),
                None => bail!("pipeline closed with {} chunks outstanding", self.outstanding),
            }
        }

        self.playback.wait_idle().await;
        while let Ok(event) = self.worker_events.try_recv() {
            events.push(self.on_worker_event(event));
        }
        while let Ok(event) = self.playback_events.try_recv() {
            events.push(PipelineEvent::Playback(event));
        }
        Ok(events)
    }

    /// Stop the worker after its in-flight call and release the sink.
    pub async fn shutdown(mut self) -> Result<WorkerExitReason> {
        let _ = self.requests.send(WorkerRequest::Shutdown);
        self.playback.close().await;

        let Some(mut task) = self.worker_task.take() else {
            return Ok(WorkerExitReason::Shutdown);
        };
        if let Ok(joined) = tokio::time::timeout(self.shutdown_timeout, &mut task).await {
            return joined.context("compute worker panicked")?;
        }

        warn!(timeout = ?self.shutdown_timeout, "Compute worker did not shut down in time; cancelling");
        self.worker_cancel.cancel();
        if tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err() {
            warn!("Compute worker ignored cancellation; aborting");
            task.abort();
        }
        Ok(WorkerExitReason::Cancelled)
    }

    fn on_worker_event(&mut self, event: WorkerEvent) -> PipelineEvent {
        match event {
            WorkerEvent::Device { device } => {
                debug!(device = %device, "Compute device reported");
                self.device = Some(device.clone());
                PipelineEvent::Device { device }
            }
            WorkerEvent::Progress { progress } => PipelineEvent::Progress(progress),
            WorkerEvent::Ready { voices, device } => {
                info!(voices = voices.len(), device = %device, "Pipeline ready");
                self.voices = Some(voices.clone());
                self.device = Some(device.clone());
                PipelineEvent::Ready { voices, device }
            }
            WorkerEvent::Stream {
                index,
                audio,
                sample_rate,
                text,
                epoch,
            } => {
                if epoch < self.epoch {
                    debug!(index, epoch, current = self.epoch, "Discarding stale audio");
                    return PipelineEvent::Discarded {
                        index: Some(index),
                        epoch,
                    };
                }
                self.outstanding = self.outstanding.saturating_sub(1);

                let item = PlaybackItem::new(index, audio, sample_rate, text.clone());
                let samples = item.pcm.len();
                let duration = item.duration();
                if let Err(e) = self.playback.enqueue(item) {
                    warn!(index, error = %e, "Unable to queue audio for playback");
                }
                PipelineEvent::Audio {
                    index,
                    text,
                    samples,
                    duration,
                }
            }
            WorkerEvent::Complete => {
                debug!("Generation drained");
                PipelineEvent::GenerationComplete
            }
            WorkerEvent::Error {
                index,
                error,
                epoch,
            } => {
                if epoch < self.epoch {
                    debug!(?index, epoch, "Discarding stale error");
                    return PipelineEvent::Discarded { index, epoch };
                }
                if index.is_some() {
                    self.outstanding = self.outstanding.saturating_sub(1);
                }
                warn!(?index, error = %error, "Chunk failed");
                PipelineEvent::ChunkFailed { index, error }
            }
        }
    }
}
