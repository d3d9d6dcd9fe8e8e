/// OpenAI-compatible speech client: Whisper transcription and TTS synthesis.
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Client};
use serde::Serialize;
use tracing::{debug, info};

use super::{SpeechError, SpeechSynthesizer, Transcriber};
use crate::playback::AudioResource;

const TRANSCRIBE_MODEL: &str = "whisper-1";
const TTS_MODEL: &str = "tts-1";
const TTS_VOICE: &str = "alloy";
const TTS_CONTENT_TYPE: &str = "audio/mpeg";
/// Longest text sent to synthesis in one request.
const MAX_TTS_CHARS: usize = 4096;

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

#[derive(Clone)]
pub struct OpenAiSpeech {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiSpeech {
    pub fn new(api_key: String, base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!("Speech client initialized (base: {base_url})");
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
            base_url,
        }
    }

    async fn error_from(response: reqwest::Response) -> SpeechError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        SpeechError::Api { status, message }
    }
}

#[async_trait]
impl Transcriber for OpenAiSpeech {
    async fn transcribe(&self, audio: Bytes, content_type: &str) -> Result<String, SpeechError> {
        if audio.is_empty() {
            return Err(SpeechError::EmptyInput);
        }

        let part = multipart::Part::bytes(audio.to_vec())
            .file_name(format!("answer.{}", file_extension(content_type)))
            .mime_str(content_type)?;
        let form = multipart::Form::new()
            .text("model", TRANSCRIBE_MODEL)
            .text("response_format", "text")
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let text = response.text().await?;
        debug!("Transcription returned {} chars", text.len());
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<AudioResource, SpeechError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechError::EmptyInput);
        }
        let input = truncate_chars(text, MAX_TTS_CHARS);

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&SpeechRequest {
                model: TTS_MODEL,
                voice: TTS_VOICE,
                input,
                response_format: "mp3",
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Err(SpeechError::EmptyOutput);
        }
        debug!("Synthesized {} bytes for {} chars", bytes.len(), input.len());
        Ok(AudioResource::Inline {
            bytes,
            content_type: TTS_CONTENT_TYPE.to_string(),
        })
    }
}

fn file_extension(content_type: &str) -> &'static str {
    let base = content_type.split(';').next().unwrap_or_default().trim();
    match base {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        _ => "webm",
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
