//! Audio output devices.
//!
//! An [`AudioSink`] plays one item at a time.  It is owned exclusively by
//! the playback scheduler task, so implementations need no internal
//! locking.  Natural end of an item is signalled through the oneshot
//! receiver returned by [`AudioSink::play`]; a stopped item never signals.

pub mod mock;
pub mod wav;

use tokio::sync::oneshot;

use super::error::PlaybackError;
use super::playback::PlaybackItem;

pub use mock::MockAudioSink;
pub use wav::WavFileSink;

pub trait AudioSink: Send + 'static {
    /// Start playing `item`.  The receiver resolves when it ends naturally.
    fn play(&mut self, item: &PlaybackItem) -> Result<oneshot::Receiver<()>, PlaybackError>;

    /// Halt the current item, if any.
    fn stop(&mut self) -> Result<(), PlaybackError>;

    /// Release the device.  Further `play` calls fail with `Closed`.
    fn close(&mut self) -> Result<(), PlaybackError>;

    fn name(&self) -> &str;
}

/// Sink that discards audio and finishes each item instantly.
#[derive(Debug, Default)]
pub struct NullSink {
    closed: bool,
}

impl AudioSink for NullSink {
    fn play(&mut self, _item: &PlaybackItem) -> Result<oneshot::Receiver<()>, PlaybackError> {
        if self.closed {
            return Err(PlaybackError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(());
        Ok(rx)
    }

    fn stop(&mut self) -> Result<(), PlaybackError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlaybackError> {
        self.closed = true;
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}
