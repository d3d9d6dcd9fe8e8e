//! Production `AudioSink`: the audible host is the connected client.
//!
//! Play and stop commands go out over an SSE stream. The client reports
//! started/ended/paused/error/rejected back over HTTP, and those reports are
//! routed to whichever handle is attached for that item. Reports for released
//! items are dropped. Synthesized audio is parked in a clip store and served by
//! URL until its handle is released.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::response::sse::{Event, KeepAlive, Sse};
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

use super::sink::{AudioSink, PlaybackError, PlaybackHandle, SinkEvent};
use super::AudioResource;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayCommand {
    Play { item_id: Uuid, url: String },
    Stop { item_id: Uuid },
}

impl RelayCommand {
    fn event_name(&self) -> &'static str {
        match self {
            RelayCommand::Play { .. } => "play",
            RelayCommand::Stop { .. } => "stop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Started,
    Ended,
    Paused,
    Error,
    Rejected,
}

/// Body of `POST .../audio/report`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientReport {
    pub item_id: Uuid,
    pub event: ReportKind,
    #[serde(default)]
    pub message: Option<String>,
}

impl ClientReport {
    fn into_sink_event(self) -> SinkEvent {
        match self.event {
            ReportKind::Started => SinkEvent::Started,
            ReportKind::Ended => SinkEvent::Ended,
            ReportKind::Paused => SinkEvent::Paused,
            ReportKind::Rejected => SinkEvent::Rejected,
            ReportKind::Error => SinkEvent::Failed(
                self.message
                    .unwrap_or_else(|| "client playback error".to_string()),
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clip {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Default)]
struct Attached {
    listeners: HashMap<Uuid, mpsc::UnboundedSender<SinkEvent>>,
    urls: HashMap<Uuid, String>,
    clips: HashMap<Uuid, Clip>,
}

pub struct RelaySink {
    commands: broadcast::Sender<RelayCommand>,
    attached: Arc<Mutex<Attached>>,
    /// Prefix under which inline clips are served; the item id is appended.
    clip_base_url: String,
}

impl RelaySink {
    pub fn new(clip_base_url: impl Into<String>) -> Self {
        let (commands, _) = broadcast::channel(32);
        Self {
            commands,
            attached: Arc::new(Mutex::new(Attached::default())),
            clip_base_url: clip_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayCommand> {
        self.commands.subscribe()
    }

    pub fn has_listeners(&self) -> bool {
        self.commands.receiver_count() > 0
    }

    /// Routes a client report to the attached handle. Returns `false` when the
    /// item is no longer attached.
    pub fn report(&self, report: ClientReport) -> bool {
        let item_id = report.item_id;
        let listener = self
            .attached
            .lock()
            .ok()
            .and_then(|attached| attached.listeners.get(&item_id).cloned());
        match listener {
            Some(tx) => {
                let delivered = tx.send(report.into_sink_event()).is_ok();
                debug!(item = %item_id, delivered, "client playback report");
                delivered
            }
            None => {
                debug!(item = %item_id, "ignoring report for released item");
                false
            }
        }
    }

    pub fn clip(&self, item_id: Uuid) -> Option<Clip> {
        self.attached
            .lock()
            .ok()
            .and_then(|attached| attached.clips.get(&item_id).cloned())
    }

    /// SSE stream of play/stop commands for one connected client.
    pub fn event_stream(&self) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        debug!("Audio client connected");
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| async move {
            match result {
                Ok(command) => match serde_json::to_string(&command) {
                    Ok(json) => Some(Ok(Event::default().event(command.event_name()).data(json))),
                    Err(e) => {
                        warn!("Failed to serialize relay command: {e}");
                        None
                    }
                },
                Err(e) => {
                    warn!("Audio event stream lagged: {e:?}");
                    None
                }
            }
        });

        Sse::new(stream).keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keep-alive"),
        )
    }
}

#[async_trait]
impl AudioSink for RelaySink {
    fn attach(&self, item_id: Uuid, resource: &AudioResource) -> PlaybackHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = match resource {
            AudioResource::Url(url) => url.clone(),
            AudioResource::Inline { .. } => format!("{}/{item_id}", self.clip_base_url),
        };

        if let Ok(mut attached) = self.attached.lock() {
            attached.listeners.insert(item_id, tx);
            attached.urls.insert(item_id, url);
            if let AudioResource::Inline {
                bytes,
                content_type,
            } = resource
            {
                attached.clips.insert(
                    item_id,
                    Clip {
                        bytes: bytes.clone(),
                        content_type: content_type.clone(),
                    },
                );
            }
        }

        let attached = Arc::clone(&self.attached);
        let commands = self.commands.clone();
        PlaybackHandle::new(item_id, rx, move || {
            if let Ok(mut attached) = attached.lock() {
                attached.listeners.remove(&item_id);
                attached.urls.remove(&item_id);
                attached.clips.remove(&item_id);
            }
            let _ = commands.send(RelayCommand::Stop { item_id });
        })
    }

    async fn start(&self, item_id: Uuid) -> Result<(), PlaybackError> {
        if !self.has_listeners() {
            return Err(PlaybackError::Rejected);
        }
        let url = self
            .attached
            .lock()
            .ok()
            .and_then(|attached| attached.urls.get(&item_id).cloned())
            .ok_or_else(|| PlaybackError::Transient(format!("item {item_id} is not attached")))?;

        self.commands
            .send(RelayCommand::Play { item_id, url })
            .map(|_| ())
            .map_err(|_| PlaybackError::Rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inline(bytes: &'static [u8]) -> AudioResource {
        AudioResource::Inline {
            bytes: Bytes::from_static(bytes),
            content_type: "audio/mpeg".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_without_connected_client_is_rejected() {
        let sink = RelaySink::new("http://localhost/clips");
        let handle = sink.attach(Uuid::new_v4(), &inline(b"mp3"));
        let id = handle.item_id();
        assert_eq!(sink.start(id).await, Err(PlaybackError::Rejected));
    }

    #[tokio::test]
    async fn test_inline_clip_is_served_until_release() {
        let sink = RelaySink::new("http://localhost/clips/");
        let mut client = sink.subscribe();
        let id = Uuid::new_v4();
        let mut handle = sink.attach(id, &inline(b"mp3"));

        sink.start(id).await.unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            RelayCommand::Play {
                item_id: id,
                url: format!("http://localhost/clips/{id}"),
            }
        );
        assert_eq!(sink.clip(id).unwrap().bytes, Bytes::from_static(b"mp3"));

        handle.release();
        assert!(sink.clip(id).is_none());
        assert_eq!(client.recv().await.unwrap(), RelayCommand::Stop { item_id: id });
    }

    #[tokio::test]
    async fn test_url_resource_is_relayed_verbatim() {
        let sink = RelaySink::new("http://localhost/clips");
        let mut client = sink.subscribe();
        let id = Uuid::new_v4();
        let _handle = sink.attach(id, &AudioResource::Url("https://cdn/q1.mp3".into()));

        sink.start(id).await.unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            RelayCommand::Play {
                item_id: id,
                url: "https://cdn/q1.mp3".into(),
            }
        );
        assert!(sink.clip(id).is_none());
    }

    #[tokio::test]
    async fn test_reports_reach_the_attached_handle_only() {
        let sink = RelaySink::new("http://localhost/clips");
        let id = Uuid::new_v4();
        let mut handle = sink.attach(id, &inline(b"x"));

        assert!(sink.report(ClientReport {
            item_id: id,
            event: ReportKind::Error,
            message: Some("decode".into()),
        }));
        assert_eq!(
            handle.next_event().await,
            Some(SinkEvent::Failed("decode".into()))
        );

        handle.release();
        assert!(!sink.report(ClientReport {
            item_id: id,
            event: ReportKind::Ended,
            message: None,
        }));
    }

    #[test]
    fn test_report_body_parses() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"item_id":"{id}","event":"rejected"}}"#);
        let report: ClientReport = serde_json::from_str(&body).unwrap();
        assert_eq!(report.event, ReportKind::Rejected);
        assert_eq!(report.into_sink_event(), SinkEvent::Rejected);
    }
}
