use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub speech_api_key: String,
    pub speech_api_url: String,
    /// Base URL clients use to reach this service; clip URLs are built from it.
    pub public_base_url: String,
    pub port: u16,
    pub rust_log: String,
    pub interview: InterviewSettings,
    pub playback: PlaybackSettings,
}

/// Knobs of the session state machine.
#[derive(Debug, Clone)]
pub struct InterviewSettings {
    /// Finalized turns required before a session can be force-completed
    /// when the oracle stops producing questions.
    pub min_viable_turns: u32,
    /// Wall-clock limit for answering one question. `None` disables the timer.
    pub answer_timeout: Option<Duration>,
    /// Caps every round's question target, for short practice rounds.
    pub question_limit: Option<u32>,
}

impl InterviewSettings {
    pub fn target_for(&self, round_target: u32) -> u32 {
        match self.question_limit {
            Some(limit) => round_target.min(limit.max(1)),
            None => round_target,
        }
    }
}

impl Default for InterviewSettings {
    fn default() -> Self {
        Self {
            min_viable_turns: 3,
            answer_timeout: Some(Duration::from_secs(60)),
            question_limit: None,
        }
    }
}

/// Knobs of the audio playback sequencer.
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    /// Additional attempts after a transient failure.
    pub max_retries: u32,
    /// Linear backoff base: retry k waits `k * retry_base`.
    pub retry_base: Duration,
    /// How long an accepted play may go without a "started" report.
    pub verify_after: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base: Duration::from_millis(1000),
            verify_after: Duration::from_millis(1500),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let port = parse_env("PORT", 8080u16)?;
        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let timeout_secs = parse_env("ANSWER_TIMEOUT_SECS", 60u64)?;
        let question_limit = parse_env("QUESTION_LIMIT", 0u32)?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            speech_api_key: require_env("SPEECH_API_KEY")?,
            speech_api_url: std::env::var("SPEECH_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            public_base_url,
            port,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            interview: InterviewSettings {
                min_viable_turns: parse_env("MIN_VIABLE_TURNS", 3u32)?,
                answer_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
                question_limit: (question_limit > 0).then_some(question_limit),
            },
            playback: PlaybackSettings {
                max_retries: parse_env("PLAYBACK_MAX_RETRIES", 2u32)?,
                retry_base: Duration::from_millis(parse_env("PLAYBACK_RETRY_BASE_MS", 1000u64)?),
                verify_after: Duration::from_millis(parse_env("PLAYBACK_VERIFY_MS", 1500u64)?),
            },
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("{key} has an invalid value '{raw}'"))
}
