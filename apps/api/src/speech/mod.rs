//! Speech collaborators: speech-to-text and speech synthesis.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::warn;

use crate::playback::AudioResource;

pub mod handlers;
pub mod openai;

pub use openai::OpenAiSpeech;

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("speech API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("empty audio input")]
    EmptyInput,

    #[error("synthesis returned no audio")]
    EmptyOutput,
}

impl SpeechError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SpeechError::Http(_) => true,
            SpeechError::Api { status, .. } => *status == 429 || *status >= 500,
            SpeechError::EmptyInput | SpeechError::EmptyOutput => false,
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes, content_type: &str) -> Result<String, SpeechError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioResource, SpeechError>;
}

/// Transcribes a capture, degrading every failure to an empty transcript.
/// Callers then classify the empty string as a non-answer.
pub async fn transcribe_or_empty(
    transcriber: &dyn Transcriber,
    audio: Bytes,
    content_type: &str,
) -> String {
    if audio.is_empty() {
        return String::new();
    }
    match transcriber.transcribe(audio, content_type).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Transcription failed, treating capture as empty: {e}");
            String::new()
        }
    }
}
