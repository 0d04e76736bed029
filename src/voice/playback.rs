//! Strictly sequential playback queue.
//!
//! [`PlaybackScheduler`] is a handle to an actor task that owns the
//! [`AudioSink`].  Items are played in enqueue order and never overlap: the
//! next item starts only after the sink reports the current one ended.
//! A sink failure skips that one item.  `stop` halts the current item,
//! clears the queue and leaves the scheduler ready for new items.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use super::audio::duration_of;
use super::error::PlaybackError;
use super::sink::AudioSink;

/// A decoded buffer ready for the device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    pub index: usize,
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    pub text: String,
}

impl PlaybackItem {
    pub fn new(index: usize, pcm: Vec<f32>, sample_rate: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            pcm,
            sample_rate,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> Duration {
        duration_of(self.pcm.len(), self.sample_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing,
    Closed,
}

/// Snapshot published by the playback task after every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Index of the item on the device.
    pub current: Option<usize>,
    /// Items waiting behind the current one.
    pub pending: usize,
    /// Items that finished, failed or were dropped by a stop.
    pub settled: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started { index: usize },
    Finished { index: usize },
    /// The sink refused the item; it was skipped.
    Failed { index: usize, error: String },
    /// Playback was halted and `dropped` queued items discarded.
    Stopped { dropped: usize },
    /// The queue ran dry.
    Idle,
}

enum Command {
    Enqueue(PlaybackItem),
    Stop(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

// ── Handle ───────────────────────────────────────────────────────

/// Control-side handle to the playback task.
#[derive(Clone)]
pub struct PlaybackScheduler {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<PlaybackStatus>,
    submitted: Arc<AtomicU64>,
}

impl PlaybackScheduler {
    /// Spawn the playback task around `sink`.
    pub fn spawn(sink: Box<dyn AudioSink>) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(PlaybackStatus {
            state: PlaybackState::Idle,
            current: None,
            pending: 0,
            settled: 0,
        });

        debug!(sink = sink.name(), "Playback scheduler starting");
        let player = Player {
            sink,
            queue: VecDeque::new(),
            current: None,
            settled: 0,
            status: status_tx,
            events: evt_tx,
        };
        tokio::spawn(player.run(cmd_rx));

        (
            Self {
                commands: cmd_tx,
                status: status_rx,
                submitted: Arc::new(AtomicU64::new(0)),
            },
            evt_rx,
        )
    }

    /// Append an item.  Playback starts at once if the device is idle.
    pub fn enqueue(&self, item: PlaybackItem) -> Result<(), PlaybackError> {
        self.commands
            .send(Command::Enqueue(item))
            .map_err(|_| PlaybackError::Closed)?;
        self.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Halt the current item and drop the queue.  Returns once the device
    /// is silent.  Safe to call at any time.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Stop and release the sink.  Idempotent.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> PlaybackState {
        self.status().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Playing
    }

    /// Wait until every item enqueued so far has settled.
    pub async fn wait_idle(&self) {
        let target = self.submitted.load(Ordering::Acquire);
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|s| s.settled >= target || s.state == PlaybackState::Closed)
            .await;
    }
}

// ── Playback task ────────────────────────────────────────────────

struct Current {
    index: usize,
    done: oneshot::Receiver<()>,
}

struct Player {
    sink: Box<dyn AudioSink>,
    queue: VecDeque<PlaybackItem>,
    current: Option<Current>,
    settled: u64,
    status: watch::Sender<PlaybackStatus>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
}

/// Resolve when the current item ends; pending forever when idle.
async fn current_ended(current: &mut Option<Current>) -> (usize, bool) {
    match current.as_mut() {
        Some(c) => {
            let natural = (&mut c.done).await.is_ok();
            (c.index, natural)
        }
        None => std::future::pending().await,
    }
}

impl Player {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Enqueue(item)) => self.enqueue(item),
                    Some(Command::Stop(ack)) => {
                        self.stop();
                        let _ = ack.send(());
                    }
                    Some(Command::Close(ack)) => {
                        commands.close();
                        self.close();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.close();
                        break;
                    }
                },
                (index, natural) = current_ended(&mut self.current), if self.current.is_some() => {
                    self.current = None;
                    if !natural {
                        warn!(index, sink = self.sink.name(), "Sink dropped item without signalling end");
                    }
                    self.settled += 1;
                    self.emit(PlaybackEvent::Finished { index });
                    self.start_next();
                }
            }
        }
        debug!("Playback scheduler exited");
    }

    fn enqueue(&mut self, item: PlaybackItem) {
        debug!(index = item.index, pending = self.queue.len(), "Playback item queued");
        self.queue.push_back(item);
        if self.current.is_none() {
            self.start_next();
        } else {
            self.publish(PlaybackState::Playing);
        }
    }

    /// Start the next playable item, skipping ones the sink refuses.
    fn start_next(&mut self) {
        while let Some(item) = self.queue.pop_front() {
            match self.sink.play(&item) {
                Ok(done) => {
                    debug!(index = item.index, duration = ?item.duration(), "Playback started");
                    self.current = Some(Current {
                        index: item.index,
                        done,
                    });
                    self.emit(PlaybackEvent::Started { index: item.index });
                    self.publish(PlaybackState::Playing);
                    return;
                }
                Err(e) => {
                    error!(index = item.index, error = %e, "Playback failed; skipping item");
                    self.settled += 1;
                    self.emit(PlaybackEvent::Failed {
                        index: item.index,
                        error: e.to_string(),
                    });
                }
            }
        }
        self.publish(PlaybackState::Idle);
        self.emit(PlaybackEvent::Idle);
    }

    fn stop(&mut self) {
        let had_current = self.current.take().is_some();
        if had_current {
            if let Err(e) = self.sink.stop() {
                warn!(error = %e, "Sink stop failed");
            }
            self.settled += 1;
        }
        let dropped = self.queue.len();
        self.queue.clear();
        self.settled += dropped as u64;

        debug!(had_current, dropped, "Playback stopped");
        self.emit(PlaybackEvent::Stopped { dropped });
        self.publish(PlaybackState::Idle);
    }

    fn close(&mut self) {
        if self.current.is_some() || !self.queue.is_empty() {
            self.stop();
        }
        if let Err(e) = self.sink.close() {
            warn!(error = %e, "Sink close failed");
        }
        self.publish(PlaybackState::Closed);
    }

    fn publish(&self, state: PlaybackState) {
        let status = PlaybackStatus {
            state,
            current: self.current.as_ref().map(|c| c.index),
            pending: self.queue.len(),
            settled: self.settled,
        };
        self.status.send_replace(status);
    }

    fn emit(&self, event: PlaybackEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::sink::mock::MockAudioSink;

    fn item(index: usize) -> PlaybackItem {
        PlaybackItem::new(index, vec![0.0; 240], 24000, format!("item {index}"))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn idle(scheduler: &PlaybackScheduler) {
        tokio::time::timeout(Duration::from_secs(5), scheduler.wait_idle())
            .await
            .expect("playback did not go idle");
    }

    #[tokio::test]
    async fn plays_in_order_without_overlap() {
        let sink = MockAudioSink::new(Duration::from_millis(10));
        let timeline = sink.timeline();
        let (scheduler, mut events) = PlaybackScheduler::spawn(Box::new(sink));

        for i in 0..4 {
            scheduler.enqueue(item(i)).unwrap();
        }
        idle(&scheduler).await;

        assert_eq!(timeline.finished(), vec![0, 1, 2, 3]);
        assert!(!timeline.has_overlap());
        assert_eq!(scheduler.state(), PlaybackState::Idle);

        let events = drain(&mut events);
        assert_eq!(events[0], PlaybackEvent::Started { index: 0 });
        assert_eq!(events.last(), Some(&PlaybackEvent::Idle));
    }

    #[tokio::test]
    async fn enqueue_during_playback_waits_for_current() {
        let sink = MockAudioSink::new(Duration::from_millis(30));
        let timeline = sink.timeline();
        let (scheduler, _events) = PlaybackScheduler::spawn(Box::new(sink));

        scheduler.enqueue(item(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(scheduler.is_playing());
        scheduler.enqueue(item(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(scheduler.status().current, Some(0));
        assert_eq!(scheduler.status().pending, 1);

        idle(&scheduler).await;
        assert_eq!(timeline.finished(), vec![0, 1]);
        assert!(!timeline.has_overlap());
    }

    #[tokio::test]
    async fn stop_clears_queue_and_halts_current() {
        let sink = MockAudioSink::new(Duration::from_secs(10));
        let timeline = sink.timeline();
        let (scheduler, mut events) = PlaybackScheduler::spawn(Box::new(sink));

        for i in 0..3 {
            scheduler.enqueue(item(i)).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.stop().await;

        let status = scheduler.status();
        assert_eq!(status.state, PlaybackState::Idle);
        assert_eq!(status.current, None);
        assert_eq!(status.pending, 0);
        assert_eq!(timeline.started(), vec![0]);
        assert!(timeline.finished().is_empty());
        assert!(drain(&mut events).contains(&PlaybackEvent::Stopped { dropped: 2 }));

        // Stop on an idle scheduler is a no-op.
        scheduler.stop().await;
        idle(&scheduler).await;
    }

    #[tokio::test]
    async fn accepts_items_after_stop() {
        let sink = MockAudioSink::new(Duration::from_millis(5));
        let timeline = sink.timeline();
        let (scheduler, _events) = PlaybackScheduler::spawn(Box::new(sink));

        scheduler.enqueue(item(0)).unwrap();
        scheduler.stop().await;
        scheduler.enqueue(item(1)).unwrap();
        idle(&scheduler).await;

        assert_eq!(timeline.finished(), vec![1]);
    }

    #[tokio::test]
    async fn sink_failure_skips_only_that_item() {
        let sink = MockAudioSink::new(Duration::from_millis(5)).failing_on(1);
        let timeline = sink.timeline();
        let (scheduler, mut events) = PlaybackScheduler::spawn(Box::new(sink));

        for i in 0..3 {
            scheduler.enqueue(item(i)).unwrap();
        }
        idle(&scheduler).await;

        assert_eq!(timeline.finished(), vec![0, 2]);
        let events = drain(&mut events);
        assert!(events
            .iter()
            .any(|e| matches!(e, PlaybackEvent::Failed { index: 1, .. })));
    }

    #[tokio::test]
    async fn stop_error_is_ignored() {
        let sink = MockAudioSink::new(Duration::from_secs(10)).failing_stop();
        let (scheduler, _events) = PlaybackScheduler::spawn(Box::new(sink));
        scheduler.enqueue(item(0)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        scheduler.stop().await;
        assert_eq!(scheduler.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_enqueue() {
        let sink = MockAudioSink::new(Duration::from_millis(5));
        let (scheduler, _events) = PlaybackScheduler::spawn(Box::new(sink));

        scheduler.close().await;
        scheduler.close().await;
        scheduler.stop().await;
        assert_eq!(scheduler.state(), PlaybackState::Closed);
        assert!(matches!(scheduler.enqueue(item(0)), Err(PlaybackError::Closed)));
        idle(&scheduler).await;
    }

    #[tokio::test]
    async fn wait_idle_covers_items_not_yet_started() {
        let sink = MockAudioSink::new(Duration::from_millis(10));
        let timeline = sink.timeline();
        let (scheduler, _events) = PlaybackScheduler::spawn(Box::new(sink));

        scheduler.enqueue(item(0)).unwrap();
        scheduler.enqueue(item(1)).unwrap();
        idle(&scheduler).await;
        assert_eq!(timeline.finished().len(), 2);
    }
}
