use std::sync::Arc;

use sqlx::PgPool;

use crate::interview::registry::SessionRegistry;
use crate::speech::{SpeechSynthesizer, Transcriber};

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// Live interview sessions, each with its own audio sequencer.
    pub sessions: Arc<SessionRegistry>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}
