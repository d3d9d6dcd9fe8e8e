//! `InterviewOracle` backed by the shared LLM client.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::oracle::{
    AnswerEvaluation, FeedbackReport, FeedbackRequest, GeneratedQuestion, InterviewOracle,
    NextQuestion, NextQuestionRequest, OracleError, ScoreRequest,
};
use super::prompts;
use super::session::Scores;
use crate::classifier::NO_ANSWER;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{LlmClient, Temperature};

const NO_ANSWER_FEEDBACK: &str = "No answer provided.";
const NO_ANSWER_FOLLOWUP: &str = "Let's continue with the next question.";

#[derive(Debug, Deserialize)]
struct QuestionOutput {
    #[serde(default)]
    question: String,
    #[serde(default)]
    interview_complete: bool,
}

#[derive(Debug, Deserialize)]
struct ScoreOutput {
    #[serde(default)]
    scores: HashMap<String, f64>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    followup: Option<String>,
    #[serde(default)]
    interview_complete: bool,
}

#[derive(Debug, Deserialize)]
struct FeedbackOutput {
    overall_score: f64,
    #[serde(default)]
    scores: HashMap<String, f64>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    summary: String,
}

#[derive(Clone)]
pub struct LlmOracle {
    llm: LlmClient,
}

impl LlmOracle {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn system(role: &str) -> String {
        format!("{role}\n\n{JSON_ONLY_SYSTEM}")
    }
}

#[async_trait]
impl InterviewOracle for LlmOracle {
    async fn next_question(&self, req: NextQuestionRequest<'_>) -> Result<NextQuestion, OracleError> {
        if let Some(warmup) = req.round.warmup_question(req.number) {
            debug!(round = %req.round, number = req.number, "serving warm-up question");
            return Ok(NextQuestion::Ask(GeneratedQuestion {
                text: warmup.to_string(),
                audio_ref: None,
            }));
        }

        let output: QuestionOutput = self
            .llm
            .call_json(
                &prompts::next_question_prompt(&req),
                &Self::system(prompts::INTERVIEWER_SYSTEM),
                Temperature::Varied,
            )
            .await?;

        if output.interview_complete {
            info!(round = %req.round, number = req.number, "oracle ended the round early");
            return Ok(NextQuestion::Completed);
        }
        let text = output.question.trim();
        if text.is_empty() {
            return Err(OracleError::Malformed("empty question".to_string()));
        }
        Ok(NextQuestion::Ask(GeneratedQuestion {
            text: text.to_string(),
            audio_ref: None,
        }))
    }

    async fn score_answer(&self, req: ScoreRequest<'_>) -> Result<AnswerEvaluation, OracleError> {
        if req.answer == NO_ANSWER {
            debug!(number = req.question_number, "scoring sentinel answer locally");
            return Ok(AnswerEvaluation {
                scores: Scores::zeroed(req.round),
                feedback: NO_ANSWER_FEEDBACK.to_string(),
                followup: Some(NO_ANSWER_FOLLOWUP.to_string()),
                interview_complete: false,
            });
        }

        let output: ScoreOutput = self
            .llm
            .call_json(
                &prompts::score_prompt(&req),
                &Self::system(prompts::EVALUATOR_SYSTEM),
                Temperature::Precise,
            )
            .await?;

        Ok(AnswerEvaluation {
            scores: Scores::for_round(req.round, &output.scores),
            feedback: output.feedback.trim().to_string(),
            followup: output
                .followup
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
            interview_complete: output.interview_complete,
        })
    }

    async fn feedback(&self, req: FeedbackRequest<'_>) -> Result<FeedbackReport, OracleError> {
        let output: FeedbackOutput = self
            .llm
            .call_json(
                &prompts::feedback_prompt(&req),
                &Self::system(prompts::EVALUATOR_SYSTEM),
                Temperature::Precise,
            )
            .await?;

        let mut raw = output.scores;
        raw.insert("overall".to_string(), output.overall_score);
        let scores = Scores::for_round(req.round, &raw);

        Ok(FeedbackReport {
            overall_score: scores.overall(),
            scores,
            strengths: output.strengths,
            improvements: output.improvements,
            recommendations: output.recommendations,
            summary: output.summary,
        })
    }
}
