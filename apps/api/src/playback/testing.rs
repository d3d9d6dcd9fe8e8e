//! Scriptable sink and synthesizer for sequencer and session tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::sink::{AudioSink, PlaybackError, PlaybackHandle, SinkEvent};
use super::AudioResource;
use crate::speech::{SpeechError, SpeechSynthesizer};

/// What the fake host does when asked to start an item.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Reports started, then ended after the given duration.
    Play(Duration),
    Reject,
    FailStart,
    /// Accepts play but never reports progress.
    NeverStart,
}

#[derive(Default)]
struct Shared {
    listeners: Mutex<HashMap<Uuid, mpsc::UnboundedSender<SinkEvent>>>,
    live: AtomicUsize,
    ended: Mutex<Vec<Uuid>>,
}

#[derive(Default)]
pub struct FakeSink {
    default: Option<Behavior>,
    script: Mutex<VecDeque<Behavior>>,
    shared: Arc<Shared>,
    max_live: AtomicUsize,
    starts: AtomicUsize,
}

impl FakeSink {
    pub fn new(default: Behavior) -> Arc<Self> {
        Arc::new(Self {
            default: Some(default),
            ..Default::default()
        })
    }

    /// Behaviours consumed by successive `start` calls before the default applies.
    pub fn script(&self, behaviors: impl IntoIterator<Item = Behavior>) {
        self.script.lock().unwrap().extend(behaviors);
    }

    pub fn live(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn ended_order(&self) -> Vec<Uuid> {
        self.shared.ended.lock().unwrap().clone()
    }

    fn listener(&self, item_id: Uuid) -> Option<mpsc::UnboundedSender<SinkEvent>> {
        self.shared.listeners.lock().unwrap().get(&item_id).cloned()
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    fn attach(&self, item_id: Uuid, _resource: &AudioResource) -> PlaybackHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.listeners.lock().unwrap().insert(item_id, tx);
        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        PlaybackHandle::new(item_id, rx, move || {
            shared.listeners.lock().unwrap().remove(&item_id);
            shared.live.fetch_sub(1, Ordering::SeqCst);
        })
    }

    async fn start(&self, item_id: Uuid) -> Result<(), PlaybackError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.default.clone())
            .unwrap_or(Behavior::NeverStart);

        match behavior {
            Behavior::Play(duration) => {
                let Some(tx) = self.listener(item_id) else {
                    return Err(PlaybackError::Transient("not attached".into()));
                };
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    let _ = tx.send(SinkEvent::Started);
                    tokio::time::sleep(duration).await;
                    if tx.send(SinkEvent::Ended).is_ok() {
                        shared.ended.lock().unwrap().push(item_id);
                    }
                });
                Ok(())
            }
            Behavior::Reject => Err(PlaybackError::Rejected),
            Behavior::FailStart => Err(PlaybackError::Transient("network".into())),
            Behavior::NeverStart => Ok(()),
        }
    }
}

/// Synthesizer with per-text latency and scripted failures.
#[derive(Default)]
pub struct FakeSynth {
    latencies: HashMap<String, Duration>,
    failures: Mutex<HashMap<String, u32>>,
    calls: AtomicUsize,
}

impl FakeSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, text: &str, latency: Duration) -> Self {
        self.latencies.insert(text.to_string(), latency);
        self
    }

    /// Fails the first `times` syntheses of `text`.
    pub fn failing(self, text: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(text.to_string(), times);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<AudioResource, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self
            .latencies
            .get(text)
            .copied()
            .unwrap_or(Duration::from_millis(5));
        tokio::time::sleep(latency).await;

        let should_fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(text) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(SpeechError::Api {
                status: 503,
                message: "synthesis unavailable".into(),
            });
        }

        Ok(AudioResource::Inline {
            bytes: Bytes::copy_from_slice(text.as_bytes()),
            content_type: "audio/mpeg".into(),
        })
    }
}
