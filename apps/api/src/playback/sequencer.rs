//! Audio Playback Sequencer.
//!
//! A single actor task owns the FIFO queue and the one live `PlaybackHandle`,
//! which makes it the only place the "current handle" is ever swapped. Callers
//! talk to it through an unbounded command channel and observe it through a
//! `watch` snapshot.
//!
//! Per item:
//! 1. text is synthesized (or a ready resource used as-is)
//! 2. any current handle is stopped and released
//! 3. the sink binds event delivery, then play is issued
//! 4. a host rejection, or no "started" report within the verify window,
//!    parks the item until a manual replay or a newer item supersedes it
//! 5. transient failures retry with linear backoff (1x, 2x base)
//! 6. on completion or exhausted retries the next item starts

use std::collections::VecDeque;
use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn};

use super::sink::{AudioSink, PlaybackError, PlaybackHandle, SinkEvent};
use super::{AudioResource, AudioSource, PlaybackItem, PlaybackSnapshot, PlaybackState};
use crate::config::PlaybackSettings;
use crate::speech::{SpeechError, SpeechSynthesizer};

enum Command {
    Enqueue(PlaybackItem),
    Replay,
    StopAll,
}

/// Handle to a running sequencer. Dropping it stops playback and releases
/// every resource the actor holds.
pub struct AudioSequencer {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<PlaybackSnapshot>,
    worker: JoinHandle<()>,
}

impl AudioSequencer {
    pub fn spawn(
        sink: Arc<dyn AudioSink>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        settings: PlaybackSettings,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(PlaybackSnapshot::default());
        let worker = Worker {
            sink,
            synthesizer,
            settings,
            queue: VecDeque::new(),
            stage: Stage::Idle,
            last: PlaybackState::Idle,
            completed: 0,
            failed: 0,
            snapshot: snapshot_tx,
        };
        let worker = tokio::spawn(worker.run(receiver));
        Self {
            commands,
            snapshot,
            worker,
        }
    }

    pub fn enqueue(&self, item: PlaybackItem) {
        if self.commands.send(Command::Enqueue(item)).is_err() {
            warn!("Audio sequencer has stopped; dropping playback item");
        }
    }

    /// User-gesture replay of an item parked after a host rejection.
    pub fn replay(&self) {
        let _ = self.commands.send(Command::Replay);
    }

    /// Force-stops the current item and drops everything queued.
    pub fn stop_all(&self) {
        let _ = self.commands.send(Command::StopAll);
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot.clone()
    }
}

impl Drop for AudioSequencer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Actor
// ────────────────────────────────────────────────────────────────────────────

enum Stage {
    Idle,
    Loading {
        item: PlaybackItem,
        attempt: u32,
        job: JoinHandle<Result<AudioResource, SpeechError>>,
    },
    Playing {
        item: PlaybackItem,
        attempt: u32,
        resource: AudioResource,
        handle: PlaybackHandle,
        /// Armed until the host confirms audio is progressing.
        verify: Option<Pin<Box<Sleep>>>,
    },
    Backoff {
        item: PlaybackItem,
        attempt: u32,
        resource: Option<AudioResource>,
        wake: Pin<Box<Sleep>>,
    },
    Blocked {
        item: PlaybackItem,
        resource: AudioResource,
    },
}

enum Wake {
    Command(Command),
    Synthesized(Result<AudioResource, String>),
    Sink(Option<SinkEvent>),
    VerifyElapsed,
    RetryDue,
}

struct Worker {
    sink: Arc<dyn AudioSink>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    settings: PlaybackSettings,
    queue: VecDeque<PlaybackItem>,
    stage: Stage,
    /// Terminal state of the most recent item, shown while idle.
    last: PlaybackState,
    completed: u64,
    failed: u64,
    snapshot: watch::Sender<PlaybackSnapshot>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            self.play_next().await;
            self.publish();

            let wake = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => break,
                },
                wake = next_wake(&mut self.stage) => wake,
            };
            self.handle(wake).await;
        }

        self.stop_and_release_current();
        self.publish();
        debug!("Audio sequencer stopped");
    }

    async fn play_next(&mut self) {
        while matches!(self.stage, Stage::Idle) {
            let Some(item) = self.queue.pop_front() else {
                return;
            };
            self.begin_attempt(item, 0).await;
        }
    }

    async fn handle(&mut self, wake: Wake) {
        match wake {
            Wake::Command(Command::Enqueue(item)) => {
                debug!(item = %item.id, utterance = ?item.utterance, "enqueued");
                self.queue.push_back(item);
                if let Stage::Blocked { item, .. } = &self.stage {
                    info!(item = %item.id, "blocked item superseded by newer audio");
                    self.failed += 1;
                    self.last = PlaybackState::Failed;
                    self.stage = Stage::Idle;
                }
            }
            Wake::Command(Command::Replay) => {
                match std::mem::replace(&mut self.stage, Stage::Idle) {
                    Stage::Blocked { item, resource } => {
                        info!(item = %item.id, "manual replay");
                        self.begin_playback(item, 0, resource).await;
                    }
                    other => {
                        debug!("replay ignored: nothing awaiting a gesture");
                        self.stage = other;
                    }
                }
            }
            Wake::Command(Command::StopAll) => {
                self.queue.clear();
                self.stop_and_release_current();
            }
            Wake::Synthesized(result) => match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Loading { item, attempt, .. } => match result {
                    Ok(resource) => self.begin_playback(item, attempt, resource).await,
                    Err(reason) => self.fail_attempt(item, attempt, None, reason),
                },
                other => self.stage = other,
            },
            Wake::Sink(event) => self.on_sink_event(event),
            Wake::VerifyElapsed => match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Playing {
                    item,
                    resource,
                    mut handle,
                    ..
                } => {
                    warn!(item = %item.id, "playback accepted but never started");
                    handle.release();
                    self.block(item, resource);
                }
                other => self.stage = other,
            },
            Wake::RetryDue => match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Backoff {
                    item,
                    attempt,
                    resource,
                    ..
                } => match resource {
                    Some(resource) => self.begin_playback(item, attempt + 1, resource).await,
                    None => self.begin_attempt(item, attempt + 1).await,
                },
                other => self.stage = other,
            },
        }
    }

    fn on_sink_event(&mut self, event: Option<SinkEvent>) {
        let (item, attempt, resource, mut handle, verify) =
            match std::mem::replace(&mut self.stage, Stage::Idle) {
                Stage::Playing {
                    item,
                    attempt,
                    resource,
                    handle,
                    verify,
                } => (item, attempt, resource, handle, verify),
                other => {
                    self.stage = other;
                    return;
                }
            };

        match event {
            Some(SinkEvent::Started) => {
                if verify.is_some() {
                    debug!(item = %item.id, "playback confirmed");
                }
                self.stage = Stage::Playing {
                    item,
                    attempt,
                    resource,
                    handle,
                    verify: None,
                };
            }
            Some(SinkEvent::Ended) => {
                handle.release();
                debug!(item = %item.id, "playback finished");
                self.completed += 1;
                self.last = PlaybackState::Done;
            }
            Some(SinkEvent::Paused) | Some(SinkEvent::Rejected) => {
                handle.release();
                self.block(item, resource);
            }
            Some(SinkEvent::Failed(reason)) => {
                handle.release();
                self.fail_attempt(item, attempt, Some(resource), reason);
            }
            None => {
                handle.release();
                self.fail_attempt(
                    item,
                    attempt,
                    Some(resource),
                    "host event channel closed".to_string(),
                );
            }
        }
    }

    async fn begin_attempt(&mut self, item: PlaybackItem, attempt: u32) {
        match item.source.clone() {
            AudioSource::Ready(resource) => self.begin_playback(item, attempt, resource).await,
            AudioSource::Text(text) => {
                let synthesizer = self.synthesizer.clone();
                let job = tokio::spawn(async move { synthesizer.synthesize(&text).await });
                self.stage = Stage::Loading { item, attempt, job };
            }
        }
    }

    async fn begin_playback(&mut self, item: PlaybackItem, attempt: u32, resource: AudioResource) {
        self.stop_and_release_current();

        if resource.is_empty() {
            self.fail_attempt(item, attempt, None, "empty audio resource".to_string());
            return;
        }

        let handle = self.sink.attach(item.id, &resource);
        match self.sink.start(item.id).await {
            Ok(()) => {
                debug!(item = %item.id, attempt, "play issued");
                self.stage = Stage::Playing {
                    item,
                    attempt,
                    resource,
                    handle,
                    verify: Some(Box::pin(sleep(self.settings.verify_after))),
                };
            }
            Err(PlaybackError::Rejected) => {
                drop(handle);
                self.block(item, resource);
            }
            Err(PlaybackError::Transient(reason)) => {
                drop(handle);
                self.fail_attempt(item, attempt, Some(resource), reason);
            }
        }
    }

    fn block(&mut self, item: PlaybackItem, resource: AudioResource) {
        warn!(item = %item.id, "playback blocked by host; awaiting user gesture");
        self.stage = Stage::Blocked { item, resource };
    }

    fn fail_attempt(
        &mut self,
        item: PlaybackItem,
        attempt: u32,
        resource: Option<AudioResource>,
        reason: String,
    ) {
        if attempt < self.settings.max_retries {
            let delay = self.settings.retry_base * (attempt + 1);
            warn!(
                item = %item.id,
                "playback attempt {} failed ({reason}); retrying in {}ms",
                attempt + 1,
                delay.as_millis()
            );
            self.stage = Stage::Backoff {
                item,
                attempt,
                resource,
                wake: Box::pin(sleep(delay)),
            };
        } else {
            warn!(
                item = %item.id,
                "playback failed after {} attempts ({reason}); skipping",
                attempt + 1
            );
            self.failed += 1;
            self.last = PlaybackState::Failed;
            self.stage = Stage::Idle;
        }
    }

    /// Halts in-flight playback and releases its handle. Idempotent.
    fn stop_and_release_current(&mut self) {
        match std::mem::replace(&mut self.stage, Stage::Idle) {
            Stage::Playing {
                item, mut handle, ..
            } => {
                debug!(item = %item.id, "stopping current playback");
                handle.release();
            }
            Stage::Loading { job, .. } => job.abort(),
            Stage::Backoff { .. } | Stage::Blocked { .. } | Stage::Idle => {}
        }
    }

    fn publish(&self) {
        let (state, current, awaiting_gesture) = match &self.stage {
            Stage::Idle => (self.last, None, None),
            Stage::Loading { item, .. } | Stage::Backoff { item, .. } => {
                (PlaybackState::Loading, Some(item.id), None)
            }
            Stage::Playing { item, .. } => (PlaybackState::Playing, Some(item.id), None),
            Stage::Blocked { item, .. } => (PlaybackState::Failed, Some(item.id), Some(item.id)),
        };
        let next = PlaybackSnapshot {
            state,
            current,
            awaiting_gesture,
            queued: self.queue.len(),
            completed: self.completed,
            failed: self.failed,
        };
        self.snapshot.send_if_modified(|snapshot| {
            if *snapshot == next {
                false
            } else {
                *snapshot = next;
                true
            }
        });
    }
}

async fn next_wake(stage: &mut Stage) -> Wake {
    match stage {
        Stage::Loading { job, .. } => {
            let result = match job.await {
                Ok(Ok(resource)) => Ok(resource),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("synthesis task failed: {e}")),
            };
            Wake::Synthesized(result)
        }
        Stage::Playing { handle, verify, .. } => match verify {
            Some(timer) => tokio::select! {
                event = handle.next_event() => Wake::Sink(event),
                _ = timer.as_mut() => Wake::VerifyElapsed,
            },
            None => Wake::Sink(handle.next_event().await),
        },
        Stage::Backoff { wake, .. } => {
            wake.as_mut().await;
            Wake::RetryDue
        }
        Stage::Idle | Stage::Blocked { .. } => pending().await,
    }
}
