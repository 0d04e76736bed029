//! Simulated audio device for tests.
//!
//! Each item "plays" for a fixed duration (or its real length) on a timer
//! task.  Start and end instants are recorded on a shared
//! [`SinkTimeline`] so tests can check ordering and overlap.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::AudioSink;
use crate::voice::error::PlaybackError;
use crate::voice::playback::PlaybackItem;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Playing,
    Finished,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub index: usize,
    pub started: Instant,
    pub ended: Option<Instant>,
    pub outcome: SinkOutcome,
}

/// Shared log of everything a [`MockAudioSink`] played.
#[derive(Debug, Clone, Default)]
pub struct SinkTimeline {
    records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl SinkTimeline {
    pub fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Indices in the order playback started.
    pub fn started(&self) -> Vec<usize> {
        self.records().iter().map(|r| r.index).collect()
    }

    /// Indices that played to their natural end.
    pub fn finished(&self) -> Vec<usize> {
        self.records()
            .iter()
            .filter(|r| r.outcome == SinkOutcome::Finished)
            .map(|r| r.index)
            .collect()
    }

    /// True if any item started before the previous one ended.
    pub fn has_overlap(&self) -> bool {
        self.records().windows(2).any(|pair| match pair[0].ended {
            Some(ended) => pair[1].started < ended,
            None => true,
        })
    }

    fn push(&self, index: usize) -> usize {
        let Ok(mut records) = self.records.lock() else {
            return 0;
        };
        records.push(SinkRecord {
            index,
            started: Instant::now(),
            ended: None,
            outcome: SinkOutcome::Playing,
        });
        records.len() - 1
    }

    fn end(&self, slot: usize, outcome: SinkOutcome) {
        if let Ok(mut records) = self.records.lock() {
            if let Some(record) = records.get_mut(slot) {
                if record.outcome == SinkOutcome::Playing {
                    record.ended = Some(Instant::now());
                    record.outcome = outcome;
                }
            }
        }
    }
}

pub struct MockAudioSink {
    /// Fixed play time per item; `None` uses the buffer's real duration.
    item_duration: Option<Duration>,
    fail_on: HashSet<usize>,
    fail_stop: bool,
    timeline: SinkTimeline,
    current: Option<(usize, JoinHandle<()>)>,
    closed: bool,
}

impl MockAudioSink {
    pub fn new(item_duration: Duration) -> Self {
        Self {
            item_duration: Some(item_duration),
            fail_on: HashSet::new(),
            fail_stop: false,
            timeline: SinkTimeline::default(),
            current: None,
            closed: false,
        }
    }

    /// Play each item for its real duration.
    pub fn realtime() -> Self {
        Self {
            item_duration: None,
            ..Self::new(Duration::ZERO)
        }
    }

    /// Refuse to start the item with this sequence index.
    pub fn failing_on(mut self, index: usize) -> Self {
        self.fail_on.insert(index);
        self
    }

    /// Report an error from every `stop` (after halting).
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn timeline(&self) -> SinkTimeline {
        self.timeline.clone()
    }
}

impl AudioSink for MockAudioSink {
    fn play(&mut self, item: &PlaybackItem) -> Result<oneshot::Receiver<()>, PlaybackError> {
        if self.closed {
            return Err(PlaybackError::Closed);
        }
        if self.fail_on.contains(&item.index) {
            return Err(PlaybackError::Start(format!(
                "mock device rejected item {}",
                item.index
            )));
        }

        let duration = self.item_duration.unwrap_or_else(|| item.duration());
        let slot = self.timeline.push(item.index);
        let timeline = self.timeline.clone();
        let (tx, rx) = oneshot::channel();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            timeline.end(slot, SinkOutcome::Finished);
            let _ = tx.send(());
        });

        self.current = Some((slot, timer));
        Ok(rx)
    }

    fn stop(&mut self) -> Result<(), PlaybackError> {
        if let Some((slot, timer)) = self.current.take() {
            timer.abort();
            self.timeline.end(slot, SinkOutcome::Stopped);
        }
        if self.fail_stop {
            return Err(PlaybackError::Stop("mock device stop failure".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        let stopped = self.stop();
        self.closed = true;
        stopped
    }

    fn name(&self) -> &str {
        "mock"
    }
}
