pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::interview::handlers;
use crate::speech::handlers as speech;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Interview API
        .route("/api/v1/interviews/:round/start", post(handlers::handle_start))
        .route(
            "/api/v1/interviews/:round/:session_id/submit-answer",
            post(handlers::handle_submit_answer),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/submit-audio",
            post(handlers::handle_submit_audio),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/next-question",
            post(handlers::handle_next_question),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/feedback",
            get(handlers::handle_feedback),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/end",
            put(handlers::handle_end),
        )
        // Audio relay
        .route(
            "/api/v1/interviews/:round/:session_id/audio/events",
            get(handlers::handle_audio_events),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/audio/report",
            post(handlers::handle_audio_report),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/audio/replay",
            post(handlers::handle_audio_replay),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/audio/state",
            get(handlers::handle_audio_state),
        )
        .route(
            "/api/v1/interviews/:round/:session_id/audio/clips/:item_id",
            get(handlers::handle_audio_clip),
        )
        // Speech API
        .route("/api/v1/speech/transcribe", post(speech::handle_transcribe))
        .route("/api/v1/speech/tts", get(speech::handle_tts))
        .with_state(state)
}
