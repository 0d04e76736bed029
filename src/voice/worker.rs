//! Compute worker: the isolated context that runs synthesis.
//!
//! The worker owns a [`GenerationScheduler`] and talks to the control side
//! only through [`WorkerRequest`] / [`WorkerEvent`] channels.  On startup it
//! reports the execution device, preloads voices and announces readiness.
//! Afterwards it services its inbox and the in-flight synthesis call
//! concurrently, so requests are accepted while the model is busy.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::generation::{GenerationRequest, GenerationScheduler};
use super::message::{LoadProgress, WorkerEvent, WorkerRequest};
use super::splitter::TextChunk;
use super::synthesizer::SpeechSynthesizer;

/// Why the worker loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExitReason {
    /// A `Shutdown` request was processed.
    Shutdown,
    /// The control side dropped its request sender.
    ChannelClosed,
    /// The cancellation token fired.
    Cancelled,
}

/// Control-side handle to a spawned [`ComputeWorker`].
pub struct WorkerHandle {
    pub requests: mpsc::UnboundedSender<WorkerRequest>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<WorkerExitReason>>,
}

pub struct ComputeWorker {
    synthesizer: Arc<SpeechSynthesizer>,
    inbox: mpsc::UnboundedReceiver<WorkerRequest>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    /// Voices loaded before `Ready` is reported.
    preload: Vec<String>,
    cancel: CancellationToken,
}

impl ComputeWorker {
    pub fn new(
        synthesizer: Arc<SpeechSynthesizer>,
        inbox: mpsc::UnboundedReceiver<WorkerRequest>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        preload: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            synthesizer,
            inbox,
            events,
            preload,
            cancel,
        }
    }

    /// Spawn a worker on the runtime and return the control-side handle.
    pub fn spawn(synthesizer: Arc<SpeechSynthesizer>, preload: Vec<String>) -> WorkerHandle {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Self::new(synthesizer, req_rx, evt_tx, preload, cancel.clone());
        let task = tokio::spawn(async move {
            let reason = worker.run().await;
            match &reason {
                Ok(reason) => info!(?reason, "Compute worker finished"),
                Err(e) => warn!(error = %e, "Compute worker failed"),
            }
            reason
        });

        WorkerHandle {
            requests: req_tx,
            events: evt_rx,
            cancel,
            task,
        }
    }

    /// Run startup and the request loop until shutdown.
    pub async fn run(self) -> Result<WorkerExitReason> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Compute worker cancelled during startup");
                return Ok(WorkerExitReason::Cancelled);
            }
            _ = self.startup() => {}
        }

        let Self {
            synthesizer,
            mut inbox,
            events,
            cancel,
            ..
        } = self;
        let mut scheduler = GenerationScheduler::new(synthesizer, events);
        let mut closing: Option<WorkerExitReason> = None;

        loop {
            if let Some(reason) = closing {
                if !scheduler.is_processing() {
                    return Ok(reason);
                }
            }

            // Inbox before settling: a burst already sent must be queued
            // before the scheduler can decide it has drained.
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(
                        in_flight = ?scheduler.active_index(),
                        pending = scheduler.pending_len(),
                        "Compute worker cancelled"
                    );
                    return Ok(WorkerExitReason::Cancelled);
                }
                request = inbox.recv(), if closing.is_none() => {
                    handle_request(&mut scheduler, request, &mut closing);
                }
                _ = scheduler.next_settled(), if scheduler.is_processing() => {
                    while closing.is_none() {
                        match inbox.try_recv() {
                            Ok(request) => handle_request(&mut scheduler, Some(request), &mut closing),
                            Err(mpsc::error::TryRecvError::Empty) => break,
                            Err(mpsc::error::TryRecvError::Disconnected) => {
                                handle_request(&mut scheduler, None, &mut closing)
                            }
                        }
                    }
                    scheduler.complete_if_drained();
                }
            }
        }
    }

    /// Report the device, preload voices and announce readiness.
    ///
    /// A voice that fails to preload is reported as a progress error; it
    /// will be retried on first use.
    async fn startup(&self) {
        let device = self.synthesizer.model().device().to_string();
        info!(
            model = self.synthesizer.model().name(),
            device = %device,
            "Compute worker starting"
        );
        self.send(WorkerEvent::Device {
            device: device.clone(),
        });

        let styles = self.synthesizer.styles();
        for voice in &self.preload {
            self.send(WorkerEvent::Progress {
                progress: LoadProgress::initiate(voice),
            });
            let progress = match styles.load(voice).await {
                Ok(table) => {
                    debug!(voice = %voice, styles = table.style_count(), "Voice preloaded");
                    LoadProgress::done(voice)
                }
                Err(e) => {
                    warn!(voice = %voice, error = %e, "Voice preload failed");
                    LoadProgress::error(voice, e.to_string())
                }
            };
            self.send(WorkerEvent::Progress { progress });
        }

        self.send(WorkerEvent::Ready {
            voices: styles.catalog().clone(),
            device,
        });
    }

    fn send(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("Control context gone; dropping worker event");
        }
    }
}

/// Apply one inbox message.  `None` means the control side hung up.
fn handle_request(
    scheduler: &mut GenerationScheduler,
    request: Option<WorkerRequest>,
    closing: &mut Option<WorkerExitReason>,
) {
    match request {
        Some(WorkerRequest::Generate {
            index,
            text,
            voice_id,
            epoch,
        }) => {
            scheduler.enqueue(GenerationRequest {
                chunk: TextChunk::new(index, text),
                voice_id,
                epoch,
            });
        }
        Some(WorkerRequest::Cancel { epoch }) => {
            scheduler.purge_before(epoch);
        }
        Some(WorkerRequest::Shutdown) => {
            let dropped = scheduler.clear_pending();
            debug!(dropped, "Shutdown requested");
            *closing = Some(WorkerExitReason::Shutdown);
        }
        None => {
            scheduler.clear_pending();
            *closing = Some(WorkerExitReason::ChannelClosed);
        }
    }
}
