//! Audio playback. Serializes spoken questions and feedback so at most one
//! clip is audible at any time.
//!
//! - `sink`: the host audio primitive (play + started/ended/error events)
//! - `sequencer`: the single-flight FIFO actor with retry and manual replay
//! - `relay`: the production sink, which drives a connected client over SSE

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

pub mod relay;
pub mod sequencer;
pub mod sink;
#[cfg(test)]
pub mod testing;

pub use relay::RelaySink;
pub use sequencer::AudioSequencer;
pub use sink::{AudioSink, PlaybackError, PlaybackHandle, SinkEvent};

/// Something the host can play right now.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioResource {
    Url(String),
    /// Locally synthesized audio; released with its playback handle.
    Inline { bytes: Bytes, content_type: String },
}

impl AudioResource {
    pub fn is_empty(&self) -> bool {
        match self {
            AudioResource::Url(url) => url.trim().is_empty(),
            AudioResource::Inline { bytes, .. } => bytes.is_empty(),
        }
    }
}

/// What a queued item carries: a ready resource or text needing synthesis.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    Ready(AudioResource),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Utterance {
    Question,
    Feedback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackItem {
    pub id: Uuid,
    pub utterance: Utterance,
    pub source: AudioSource,
}

impl PlaybackItem {
    pub fn new(utterance: Utterance, source: AudioSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            utterance,
            source,
        }
    }

    /// A spoken question: the oracle's audio reference when present, else synthesized text.
    pub fn question(text: &str, audio_ref: Option<&str>) -> Self {
        let source = match audio_ref.filter(|r| !r.trim().is_empty()) {
            Some(url) => AudioSource::Ready(AudioResource::Url(url.to_string())),
            None => AudioSource::Text(text.to_string()),
        };
        Self::new(Utterance::Question, source)
    }

    pub fn feedback(text: &str) -> Self {
        Self::new(Utterance::Feedback, AudioSource::Text(text.to_string()))
    }
}

/// Lifecycle of the item at the head of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Failed,
    Done,
}

/// Published view of the sequencer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub current: Option<Uuid>,
    /// Item parked after a host rejection, waiting for a user-triggered replay.
    pub awaiting_gesture: Option<Uuid>,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
}

impl Default for PlaybackSnapshot {
    fn default() -> Self {
        Self {
            state: PlaybackState::Idle,
            current: None,
            awaiting_gesture: None,
            queued: 0,
            completed: 0,
            failed: 0,
        }
    }
}

impl PlaybackSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Nothing loading, playing, or queued. A parked item only moves on a
    /// user gesture, so it counts as quiet.
    pub fn is_quiet(&self) -> bool {
        !matches!(self.state, PlaybackState::Loading | PlaybackState::Playing) && self.queued == 0
    }
}
