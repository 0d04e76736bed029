//! Single-flight FIFO generation queue.
//!
//! [`GenerationScheduler`] owns the pending requests and at most one
//! in-flight synthesis future.  Requests are serviced strictly in arrival
//! order; a failed request is reported and draining continues.  When the
//! queue runs dry a single [`WorkerEvent::Complete`] closes the drain cycle.
//!
//! The scheduler never polls on its own: the compute task awaits
//! [`GenerationScheduler::next_settled`] alongside its inbox, so enqueueing
//! while a call is running only grows the queue.  Settling and completing
//! are separate steps so the owner can absorb requests that arrived during
//! the call before deciding the cycle is over.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::error::VoiceError;
use super::message::WorkerEvent;
use super::splitter::TextChunk;
use super::synthesizer::{GenerationResult, SpeechSynthesizer};

/// One chunk to synthesize, consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub chunk: TextChunk,
    pub voice_id: String,
    /// Control-side epoch the request was issued in.
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing has been enqueued yet.
    Idle,
    /// A synthesis call is in flight.
    Processing,
    /// The last drain cycle finished and `Complete` was emitted.
    Drained,
}

type Settled = (GenerationRequest, Result<GenerationResult, VoiceError>);

struct InFlight {
    index: usize,
    future: BoxFuture<'static, Settled>,
}

pub struct GenerationScheduler {
    synthesizer: Arc<SpeechSynthesizer>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    queue: VecDeque<GenerationRequest>,
    active: Option<InFlight>,
    state: SchedulerState,
}

impl GenerationScheduler {
    pub fn new(synthesizer: Arc<SpeechSynthesizer>, events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            synthesizer,
            events,
            queue: VecDeque::new(),
            active: None,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_processing(&self) -> bool {
        self.active.is_some()
    }

    /// Requests waiting behind the in-flight one.
    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    /// Sequence index of the in-flight request.
    pub fn active_index(&self) -> Option<usize> {
        self.active.as_ref().map(|a| a.index)
    }

    /// Append a request.  Starts it immediately if nothing is in flight.
    pub fn enqueue(&mut self, request: GenerationRequest) {
        debug!(
            index = request.chunk.index,
            epoch = request.epoch,
            pending = self.queue.len(),
            "Generation request queued"
        );
        self.queue.push_back(request);
        self.start_next();
    }

    /// Drop queued requests issued before `epoch`.  The in-flight call is
    /// left to finish.
    pub fn purge_before(&mut self, epoch: u64) -> usize {
        let before = self.queue.len();
        self.queue.retain(|r| r.epoch >= epoch);
        let dropped = before - self.queue.len();
        if dropped > 0 {
            debug!(dropped, epoch, "Purged stale generation requests");
        }
        dropped
    }

    /// Drop every queued request.
    pub fn clear_pending(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Wait for the in-flight call, report it and start the next request.
    ///
    /// Returns `false` immediately when nothing is in flight.  Cancel-safe:
    /// dropping the returned future keeps the call in flight.  Does not emit
    /// `Complete`; see [`Self::complete_if_drained`].
    pub async fn next_settled(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let (request, result) = (&mut active.future).await;
        self.active = None;

        self.report(request, result);
        self.start_next();
        true
    }

    /// Close the drain cycle if nothing is in flight or queued.
    ///
    /// Emits `Complete` at most once per cycle and returns whether it did.
    pub fn complete_if_drained(&mut self) -> bool {
        if self.state != SchedulerState::Processing || self.active.is_some() {
            return false;
        }
        self.state = SchedulerState::Drained;
        debug!("Generation queue drained");
        self.send(WorkerEvent::Complete);
        true
    }

    /// Drain until the queue is empty, then complete the cycle.
    pub async fn drain(&mut self) {
        while self.next_settled().await {}
        self.complete_if_drained();
    }

    fn start_next(&mut self) {
        if self.active.is_some() {
            return;
        }
        let Some(request) = self.queue.pop_front() else {
            return;
        };

        debug!(index = request.chunk.index, voice = %request.voice_id, "Synthesis started");
        let index = request.chunk.index;
        let synthesizer = Arc::clone(&self.synthesizer);
        let future = async move {
            let result = synthesizer.synthesize(&request.chunk, &request.voice_id).await;
            (request, result)
        }
        .boxed();

        self.active = Some(InFlight { index, future });
        self.state = SchedulerState::Processing;
    }

    fn report(&self, request: GenerationRequest, result: Result<GenerationResult, VoiceError>) {
        let event = match result {
            Ok(result) => {
                debug!(index = result.index, samples = result.pcm.len(), "Synthesis completed");
                WorkerEvent::Stream {
                    index: result.index,
                    audio: result.pcm,
                    sample_rate: result.sample_rate,
                    text: result.text,
                    epoch: request.epoch,
                }
            }
            Err(e) => {
                let index = e.chunk_index().unwrap_or(request.chunk.index);
                error!(index, error = %e, "Synthesis failed");
                WorkerEvent::Error {
                    index: Some(index),
                    error: e.to_string(),
                    epoch: request.epoch,
                }
            }
        };
        self.send(event);
    }

    fn send(&self, event: WorkerEvent) {
        if self.events.send(event).is_err() {
            debug!("Control context gone; dropping worker event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::provider::mock::MockSpeechModel;
    use crate::voice::style_cache::tests::{voice_bytes, CountingFetcher};
    use crate::voice::style_cache::VoiceStyleCache;
    use crate::voice::voices::VoiceCatalog;
    use std::time::Duration;

    fn scheduler(
        model: MockSpeechModel,
    ) -> (GenerationScheduler, mpsc::UnboundedReceiver<WorkerEvent>) {
        let fetcher = Arc::new(CountingFetcher::ok(voice_bytes(4)));
        let styles = Arc::new(VoiceStyleCache::new(VoiceCatalog::kokoro(), fetcher, None));
        let synth = Arc::new(SpeechSynthesizer::new(styles, Arc::new(model)));
        let (tx, rx) = mpsc::unbounded_channel();
        (GenerationScheduler::new(synth, tx), rx)
    }

    fn request(index: usize, text: &str) -> GenerationRequest {
        GenerationRequest {
            chunk: TextChunk::new(index, text),
            voice_id: "af_heart".to_string(),
            epoch: 0,
        }
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn enqueue_starts_processing_immediately() {
        let (mut sched, _rx) = scheduler(MockSpeechModel::silent());
        assert_eq!(sched.state(), SchedulerState::Idle);

        sched.enqueue(request(0, "Hello."));
        assert_eq!(sched.state(), SchedulerState::Processing);
        assert_eq!(sched.active_index(), Some(0));
        assert_eq!(sched.pending_len(), 0);
    }

    #[tokio::test]
    async fn enqueue_while_processing_only_grows_queue() {
        let model = MockSpeechModel::silent().with_latency(Duration::from_millis(5));
        let stats = model.stats();
        let (mut sched, mut rx) = scheduler(model);

        for i in 0..20 {
            sched.enqueue(request(i, &format!("chunk {i}")));
        }
        assert_eq!(sched.active_index(), Some(0));
        assert_eq!(sched.pending_len(), 19);

        sched.drain().await;
        assert_eq!(stats.max_active(), 1);
        assert_eq!(stats.calls().len(), 20);

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 21);
        assert_eq!(events.last(), Some(&WorkerEvent::Complete));
    }

    #[tokio::test]
    async fn results_follow_fifo_order() {
        let (mut sched, mut rx) = scheduler(MockSpeechModel::silent());
        for (i, text) in ["one", "two", "three"].iter().enumerate() {
            sched.enqueue(request(i, text));
        }
        sched.drain().await;

        let indices: Vec<usize> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::Stream { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failed_chunk_does_not_stop_draining() {
        let (mut sched, mut rx) = scheduler(MockSpeechModel::silent().failing_on("FAIL"));
        sched.enqueue(request(1, "first"));
        sched.enqueue(request(2, "second FAIL"));
        sched.enqueue(request(3, "third"));
        sched.drain().await;

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], WorkerEvent::Stream { index: 1, .. }));
        match &events[1] {
            WorkerEvent::Error { index, error, .. } => {
                assert_eq!(*index, Some(2));
                assert!(error.contains("chunk 2"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(matches!(events[2], WorkerEvent::Stream { index: 3, .. }));
        assert_eq!(events[3], WorkerEvent::Complete);
    }

    #[tokio::test]
    async fn complete_once_per_drain_cycle() {
        let (mut sched, mut rx) = scheduler(MockSpeechModel::silent());

        sched.enqueue(request(0, "a"));
        sched.drain().await;
        assert_eq!(sched.state(), SchedulerState::Drained);

        sched.enqueue(request(1, "b"));
        sched.enqueue(request(2, "c"));
        sched.drain().await;

        let completes = drain_events(&mut rx)
            .iter()
            .filter(|e| **e == WorkerEvent::Complete)
            .count();
        assert_eq!(completes, 2);
    }

    #[tokio::test]
    async fn settling_last_call_waits_for_explicit_completion() {
        let (mut sched, mut rx) = scheduler(MockSpeechModel::silent());
        sched.enqueue(request(0, "a"));
        assert!(sched.next_settled().await);

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WorkerEvent::Stream { index: 0, .. }));

        // A request arriving now joins the same cycle.
        sched.enqueue(request(1, "b"));
        assert!(!sched.complete_if_drained());
        assert!(sched.next_settled().await);
        assert!(sched.complete_if_drained());
        assert!(!sched.complete_if_drained());

        let events = drain_events(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], WorkerEvent::Stream { index: 1, .. }));
        assert_eq!(events[1], WorkerEvent::Complete);
    }

    #[tokio::test]
    async fn asset_failure_reports_request_index() {
        let fetcher = Arc::new(CountingFetcher::failing("offline"));
        let styles = Arc::new(VoiceStyleCache::new(VoiceCatalog::kokoro(), fetcher, None));
        let synth = Arc::new(SpeechSynthesizer::new(styles, Arc::new(MockSpeechModel::silent())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sched = GenerationScheduler::new(synth, tx);

        sched.enqueue(request(4, "unreachable voice"));
        sched.drain().await;

        match &drain_events(&mut rx)[0] {
            WorkerEvent::Error { index, error, .. } => {
                assert_eq!(*index, Some(4));
                assert!(error.contains("offline"));
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn next_settled_without_work_returns_false() {
        let (mut sched, mut rx) = scheduler(MockSpeechModel::silent());
        assert!(!sched.next_settled().await);
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn purge_drops_only_stale_queued_requests() {
        let (mut sched, mut rx) = scheduler(MockSpeechModel::silent());
        sched.enqueue(request(0, "in flight"));
        sched.enqueue(request(1, "stale"));
        sched.enqueue(GenerationRequest {
            epoch: 1,
            ..request(2, "fresh")
        });

        assert_eq!(sched.purge_before(1), 1);
        sched.drain().await;

        let indices: Vec<usize> = drain_events(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                WorkerEvent::Stream { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[tokio::test]
    async fn dropping_next_settled_keeps_call_in_flight() {
        let model = MockSpeechModel::silent().with_latency(Duration::from_millis(50));
        let (mut sched, mut rx) = scheduler(model);
        sched.enqueue(request(0, "slow"));

        let timed_out = tokio::time::timeout(Duration::from_millis(5), sched.next_settled()).await;
        assert!(timed_out.is_err());
        assert!(sched.is_processing());

        sched.drain().await;
        let events = drain_events(&mut rx);
        assert!(matches!(events[0], WorkerEvent::Stream { index: 0, .. }));
    }
}
