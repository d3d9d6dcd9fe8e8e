//! Axum route handlers for the Interview API. Each one resolves the session
//! and passes straight through to the `SessionMachine`.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::interview::machine::{
    AnswerInput, EndOutcome, Progress, QuestionView, SubmitOutcome,
};
use crate::interview::registry::SessionEntry;
use crate::interview::round::RoundKind;
use crate::interview::session::{SessionFeedback, SessionStatus};
use crate::playback::relay::ClientReport;
use crate::playback::PlaybackSnapshot;
use crate::speech::transcribe_or_empty;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub session_id: Uuid,
    pub round: RoundKind,
    pub status: SessionStatus,
    pub question: QuestionView,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAnswerRequest {
    /// Typed answer or client-side transcript.
    #[serde(default, alias = "transcript")]
    pub answer: Option<String>,
    #[serde(default)]
    pub response_time_secs: Option<f64>,
    /// Set by clients whose own answer timer ran out.
    #[serde(default)]
    pub timed_out: bool,
    /// The question being answered; a mismatch is rejected with 409.
    #[serde(default)]
    pub question_number: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitAudioQuery {
    #[serde(default)]
    pub response_time_secs: Option<f64>,
    #[serde(default)]
    pub question_number: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ReportResponse {
    pub delivered: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/v1/interviews/:round/start
pub async fn handle_start(
    State(state): State<AppState>,
    Path(round): Path<String>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<StartResponse>), AppError> {
    let round = parse_round(&round)?;
    let (entry, question) = state.sessions.start(request.user_id.trim(), round).await?;

    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            session_id: entry.machine.id(),
            round,
            status: SessionStatus::Active,
            question,
        }),
    ))
}

/// POST /api/v1/interviews/:round/:session_id/submit-answer
pub async fn handle_submit_answer(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
    Json(request): Json<SubmitAnswerRequest>,
) -> Result<Json<SubmitOutcome>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    let input = if request.timed_out {
        AnswerInput::TimedOut {
            question_number: request.question_number,
        }
    } else {
        AnswerInput::Transcript {
            text: request.answer,
            response_time_secs: request.response_time_secs,
            question_number: request.question_number,
        }
    };
    let outcome = entry.machine.submit_answer(input).await?;
    state.sessions.release_if_retired(&entry).await;
    Ok(Json(outcome))
}

/// POST /api/v1/interviews/:round/:session_id/submit-audio
///
/// Raw audio body. A failed or empty transcription is submitted as an empty
/// answer, which the classifier turns into the "No Answer" sentinel.
pub async fn handle_submit_audio(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
    Query(query): Query<SubmitAudioQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitOutcome>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    let transcript =
        transcribe_or_empty(state.transcriber.as_ref(), body, content_type(&headers)).await;

    let outcome = entry
        .machine
        .submit_answer(AnswerInput::Transcript {
            text: Some(transcript),
            response_time_secs: query.response_time_secs,
            question_number: query.question_number,
        })
        .await?;
    state.sessions.release_if_retired(&entry).await;
    Ok(Json(outcome))
}

/// POST /api/v1/interviews/:round/:session_id/next-question
pub async fn handle_next_question(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
) -> Result<Json<Progress>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    let progress = entry.machine.next_question().await?;
    state.sessions.release_if_retired(&entry).await;
    Ok(Json(progress))
}

/// GET /api/v1/interviews/:round/:session_id/feedback
pub async fn handle_feedback(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
) -> Result<Json<SessionFeedback>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    let feedback = entry.machine.generate_feedback().await?;
    state.sessions.release_if_retired(&entry).await;
    Ok(Json(feedback))
}

/// PUT /api/v1/interviews/:round/:session_id/end
pub async fn handle_end(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
) -> Result<Json<EndOutcome>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    Ok(Json(state.sessions.end(&entry).await))
}

/// GET /api/v1/interviews/:round/:session_id/audio/events
pub async fn handle_audio_events(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let entry = session(&state, &round, session_id).await?;
    Ok(entry.relay.event_stream())
}

/// POST /api/v1/interviews/:round/:session_id/audio/report
pub async fn handle_audio_report(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
    Json(report): Json<ClientReport>,
) -> Result<Json<ReportResponse>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    Ok(Json(ReportResponse {
        delivered: entry.relay.report(report),
    }))
}

/// POST /api/v1/interviews/:round/:session_id/audio/replay
pub async fn handle_audio_replay(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
) -> Result<Json<PlaybackSnapshot>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    Ok(Json(entry.machine.replay_audio().await?))
}

/// GET /api/v1/interviews/:round/:session_id/audio/state
pub async fn handle_audio_state(
    State(state): State<AppState>,
    Path((round, session_id)): Path<(String, Uuid)>,
) -> Result<Json<PlaybackSnapshot>, AppError> {
    let entry = session(&state, &round, session_id).await?;
    Ok(Json(entry.machine.audio_snapshot()))
}

/// GET /api/v1/interviews/:round/:session_id/audio/clips/:item_id
pub async fn handle_audio_clip(
    State(state): State<AppState>,
    Path((round, session_id, item_id)): Path<(String, Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let entry = session(&state, &round, session_id).await?;
    let clip = entry
        .relay
        .clip(item_id)
        .ok_or_else(|| AppError::NotFound(format!("clip {item_id} is no longer available")))?;
    Ok(([(header::CONTENT_TYPE, clip.content_type)], clip.bytes).into_response())
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn parse_round(raw: &str) -> Result<RoundKind, AppError> {
    raw.parse::<RoundKind>()
        .map_err(|e| AppError::Validation(e.to_string()))
}

async fn session(state: &AppState, round: &str, id: Uuid) -> Result<SessionEntry, AppError> {
    let round = parse_round(round)?;
    Ok(state.sessions.get(id, round).await?)
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/webm")
}
