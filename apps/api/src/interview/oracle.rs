//! Question/answer oracle contract.
//!
//! The session machine treats question generation, answer scoring and
//! aggregate evaluation as one opaque request/response collaborator.

use async_trait::async_trait;
use thiserror::Error;

use super::profile::Profile;
use super::round::RoundKind;
use super::session::{Scores, Turn};
use crate::llm_client::LlmError;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    #[error("oracle returned unusable output: {0}")]
    Malformed(String),
}

impl From<LlmError> for OracleError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Parse(_) | LlmError::EmptyContent => OracleError::Malformed(e.to_string()),
            LlmError::Http(_) | LlmError::Api { .. } | LlmError::RateLimited { .. } => {
                OracleError::Unavailable(e.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuestion {
    pub text: String,
    /// Pre-rendered audio, when the oracle provides it.
    pub audio_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NextQuestion {
    Ask(GeneratedQuestion),
    Completed,
}

pub struct NextQuestionRequest<'a> {
    pub round: RoundKind,
    pub profile: &'a Profile,
    /// 1-based number of the question to produce.
    pub number: u32,
    pub target: u32,
    /// Finalized turns so far, in order.
    pub history: &'a [Turn],
    pub last_answer: Option<&'a str>,
}

pub struct ScoreRequest<'a> {
    pub round: RoundKind,
    pub question_number: u32,
    pub question: &'a str,
    /// Cleaned answer or the "No Answer" sentinel.
    pub answer: &'a str,
    pub response_time_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerEvaluation {
    pub scores: Scores,
    pub feedback: String,
    pub followup: Option<String>,
    /// Oracle asks to end the round early.
    pub interview_complete: bool,
}

pub struct FeedbackRequest<'a> {
    pub round: RoundKind,
    pub profile: &'a Profile,
    pub turns: &'a [Turn],
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackReport {
    pub overall_score: u8,
    pub scores: Scores,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

#[async_trait]
pub trait InterviewOracle: Send + Sync {
    async fn next_question(&self, req: NextQuestionRequest<'_>) -> Result<NextQuestion, OracleError>;

    async fn score_answer(&self, req: ScoreRequest<'_>) -> Result<AnswerEvaluation, OracleError>;

    async fn feedback(&self, req: FeedbackRequest<'_>) -> Result<FeedbackReport, OracleError>;
}
