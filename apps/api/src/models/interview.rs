use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::interview::session::Scores;

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: String,
    pub round: String,
    pub status: String,
    pub question_index: i32,
    pub target_questions: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TurnRow {
    pub question_number: i32,
    pub question: String,
    pub audio_ref: Option<String>,
    pub asked_at: DateTime<Utc>,
    pub raw_transcript: Option<String>,
    pub answer: Option<String>,
    pub response_time_secs: Option<f64>,
    pub scores: Option<Json<Scores>>,
    pub feedback: Option<String>,
    pub followup: Option<String>,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct FeedbackRow {
    pub overall_score: i16,
    pub scores: Json<Scores>,
    pub strengths: Json<Vec<String>>,
    pub improvements: Json<Vec<String>>,
    pub recommendations: Json<Vec<String>>,
    pub summary: String,
    pub source: String,
    pub turns_evaluated: i32,
}
