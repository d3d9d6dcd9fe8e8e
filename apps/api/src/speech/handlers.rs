//! Axum route handlers for the Speech API.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use super::transcribe_or_empty;
use crate::classifier::{classify, ClassificationView};
use crate::errors::AppError;
use crate::playback::AudioResource;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TranscribeResponse {
    pub transcript: String,
    pub classification: ClassificationView,
}

#[derive(Debug, Deserialize)]
pub struct TtsQuery {
    pub text: String,
}

/// POST /api/v1/speech/transcribe
///
/// Raw audio body. Returns the transcript together with the classifier's
/// verdict, so clients can preview what a submission would store.
pub async fn handle_transcribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<TranscribeResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("audio/webm");
    let transcript = transcribe_or_empty(state.transcriber.as_ref(), body, content_type).await;
    let classification = ClassificationView::from(&classify(Some(&transcript)));

    Json(TranscribeResponse {
        transcript,
        classification,
    })
}

/// GET /api/v1/speech/tts?text=
pub async fn handle_tts(
    State(state): State<AppState>,
    Query(query): Query<TtsQuery>,
) -> Result<Response, AppError> {
    if query.text.trim().is_empty() {
        return Err(AppError::Validation("text cannot be empty".to_string()));
    }

    match state.synthesizer.synthesize(&query.text).await? {
        AudioResource::Inline {
            bytes,
            content_type,
        } => Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response()),
        AudioResource::Url(url) => Ok(Redirect::temporary(&url).into_response()),
    }
}
