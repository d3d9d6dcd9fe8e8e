//! Host audio primitive abstraction.
//!
//! A sink is used in two steps so callbacks are always bound before play is
//! issued: `attach` registers the event channel and returns the live handle,
//! then `start` asks the host to begin.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::AudioResource;

/// Events the host reports for an attached item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Audio is actually progressing.
    Started,
    Ended,
    /// Host paused playback on its own.
    Paused,
    Failed(String),
    /// Host refused to play without a user gesture.
    Rejected,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("playback rejected by host; user gesture required")]
    Rejected,

    #[error("transient playback failure: {0}")]
    Transient(String),
}

/// The one live handle on host playback. Releasing it (explicitly or by drop)
/// stops the audio, detaches the event channel and frees temporary resources.
pub struct PlaybackHandle {
    item_id: Uuid,
    events: mpsc::UnboundedReceiver<SinkEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl PlaybackHandle {
    pub fn new(
        item_id: Uuid,
        events: mpsc::UnboundedReceiver<SinkEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            item_id,
            events,
            release: Some(Box::new(release)),
        }
    }

    pub fn item_id(&self) -> Uuid {
        self.item_id
    }

    /// Next host event; `None` once the host side has gone away.
    pub async fn next_event(&mut self) -> Option<SinkEvent> {
        self.events.recv().await
    }

    /// Idempotent.
    pub fn release(&mut self) {
        self.events.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PlaybackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackHandle")
            .field("item_id", &self.item_id)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Binds event delivery for `item_id`. Produces no sound.
    fn attach(&self, item_id: Uuid, resource: &AudioResource) -> PlaybackHandle;

    /// Issues play for an attached item.
    async fn start(&self, item_id: Uuid) -> Result<(), PlaybackError>;
}
