//! Durable store for sessions and turns. The store is the system of record;
//! the in-memory session is a cache rebuilt from it on resume.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use super::round::RoundKind;
use super::session::{
    Evaluation, InterviewSession, RecordedAnswer, SessionFeedback, SessionStatus, Turn,
};
use crate::models::interview::{FeedbackRow, SessionRow, TurnRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("turn {number} of session {session_id} is already finalized or out of order")]
    Conflict { session_id: Uuid, number: u32 },

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a new active session together with its first question.
    async fn create_session(
        &self,
        id: Uuid,
        user_id: &str,
        round: RoundKind,
        target: u32,
        first: &Turn,
    ) -> Result<InterviewSession, StoreError>;

    async fn load_session(&self, id: Uuid) -> Result<Option<InterviewSession>, StoreError>;

    async fn append_question(&self, id: Uuid, turn: &Turn) -> Result<(), StoreError>;

    /// Records the classified answer on an unfinalized turn. May be repeated
    /// until the turn is finalized.
    async fn record_answer(
        &self,
        id: Uuid,
        number: u32,
        answer: &RecordedAnswer,
    ) -> Result<(), StoreError>;

    /// Finalizes turn `number` and advances the session's question index to
    /// it. Fails with `Conflict` unless the turn is answered, unfinalized and
    /// directly follows the current index of an active session.
    async fn finalize_turn(
        &self,
        id: Uuid,
        number: u32,
        evaluation: &Evaluation,
    ) -> Result<(), StoreError>;

    /// Moves an active session to a terminal status. No-op once terminal.
    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), StoreError>;

    /// First writer wins; returns whatever feedback is stored afterwards.
    async fn save_feedback(
        &self,
        id: Uuid,
        feedback: &SessionFeedback,
    ) -> Result<SessionFeedback, StoreError>;
}

pub struct PgSessionStore {
    db: PgPool,
}

impl PgSessionStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn load_feedback(&self, id: Uuid) -> Result<Option<SessionFeedback>, StoreError> {
        let row: Option<FeedbackRow> = sqlx::query_as(
            r#"
            SELECT overall_score, scores, strengths, improvements, recommendations,
                   summary, source, turns_evaluated
            FROM session_feedback
            WHERE session_id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(feedback_from_row).transpose()
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create_session(
        &self,
        id: Uuid,
        user_id: &str,
        round: RoundKind,
        target: u32,
        first: &Turn,
    ) -> Result<InterviewSession, StoreError> {
        let created_at = Utc::now();

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO interview_sessions
                (id, user_id, round, status, question_index, target_questions, created_at, updated_at)
            VALUES ($1, $2, $3, 'active', 0, $4, $5, $5)
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(round.as_str())
        .bind(target as i32)
        .bind(created_at)
        .execute(&mut *tx)
        .await?;
        insert_turn(&mut tx, id, first).await?;
        tx.commit().await?;

        debug!(session_id = %id, %round, "session created");
        Ok(InterviewSession {
            id,
            user_id: user_id.to_string(),
            round,
            status: SessionStatus::Active,
            question_index: 0,
            target_questions: target,
            created_at,
            turns: vec![first.clone()],
            feedback: None,
        })
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<InterviewSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, round, status, question_index, target_questions, created_at
            FROM interview_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let turns: Vec<TurnRow> = sqlx::query_as(
            r#"
            SELECT question_number, question, audio_ref, asked_at, raw_transcript, answer,
                   response_time_secs, scores, feedback, followup, finalized_at
            FROM interview_turns
            WHERE session_id = $1
            ORDER BY question_number ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;

        let feedback = self.load_feedback(id).await?;
        session_from_rows(row, turns, feedback).map(Some)
    }

    async fn append_question(&self, id: Uuid, turn: &Turn) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;
        insert_turn(&mut tx, id, turn).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_answer(
        &self,
        id: Uuid,
        number: u32,
        answer: &RecordedAnswer,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE interview_turns
            SET raw_transcript = $3, answer = $4, response_time_secs = $5
            WHERE session_id = $1 AND question_number = $2 AND finalized_at IS NULL
            "#,
        )
        .bind(id)
        .bind(number as i32)
        .bind(&answer.raw_transcript)
        .bind(&answer.text)
        .bind(answer.response_time_secs)
        .execute(&self.db)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict {
                session_id: id,
                number,
            });
        }
        Ok(())
    }

    async fn finalize_turn(
        &self,
        id: Uuid,
        number: u32,
        evaluation: &Evaluation,
    ) -> Result<(), StoreError> {
        let conflict = StoreError::Conflict {
            session_id: id,
            number,
        };
        let mut tx = self.db.begin().await?;

        let turn = sqlx::query(
            r#"
            UPDATE interview_turns
            SET scores = $3, feedback = $4, followup = $5, finalized_at = now()
            WHERE session_id = $1 AND question_number = $2
              AND finalized_at IS NULL AND answer IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(number as i32)
        .bind(Json(&evaluation.scores))
        .bind(&evaluation.feedback)
        .bind(&evaluation.followup)
        .execute(&mut *tx)
        .await?;
        if turn.rows_affected() != 1 {
            return Err(conflict);
        }

        let session = sqlx::query(
            r#"
            UPDATE interview_sessions
            SET question_index = $2, updated_at = now()
            WHERE id = $1 AND question_index = $2 - 1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(number as i32)
        .execute(&mut *tx)
        .await?;
        if session.rows_affected() != 1 {
            return Err(conflict);
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE interview_sessions
            SET status = $2, updated_at = now(), ended_at = now()
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn save_feedback(
        &self,
        id: Uuid,
        feedback: &SessionFeedback,
    ) -> Result<SessionFeedback, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_feedback
                (session_id, overall_score, scores, strengths, improvements,
                 recommendations, summary, source, turns_evaluated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(feedback.overall_score as i16)
        .bind(Json(&feedback.scores))
        .bind(Json(&feedback.strengths))
        .bind(Json(&feedback.improvements))
        .bind(Json(&feedback.recommendations))
        .bind(&feedback.summary)
        .bind(feedback.source.as_str())
        .bind(feedback.turns_evaluated as i32)
        .execute(&self.db)
        .await?;

        self.load_feedback(id)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("feedback for {id} vanished after insert")))
    }
}

async fn insert_turn(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    turn: &Turn,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO interview_turns (session_id, question_number, question, audio_ref, asked_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(turn.number as i32)
    .bind(&turn.question)
    .bind(&turn.audio_ref)
    .bind(turn.asked_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn session_from_rows(
    row: SessionRow,
    turns: Vec<TurnRow>,
    feedback: Option<SessionFeedback>,
) -> Result<InterviewSession, StoreError> {
    let round = row
        .round
        .parse::<RoundKind>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let status = row
        .status
        .parse::<SessionStatus>()
        .map_err(StoreError::Corrupt)?;

    let turns: Vec<Turn> = turns.into_iter().map(turn_from_row).collect();
    for (expected, turn) in (1u32..).zip(&turns) {
        if turn.number != expected {
            return Err(StoreError::Corrupt(format!(
                "session {} has turn {} where {expected} was expected",
                row.id, turn.number
            )));
        }
    }

    Ok(InterviewSession {
        id: row.id,
        user_id: row.user_id,
        round,
        status,
        question_index: row.question_index.max(0) as u32,
        target_questions: row.target_questions.max(0) as u32,
        created_at: row.created_at,
        turns,
        feedback,
    })
}

fn turn_from_row(row: TurnRow) -> Turn {
    let answer = row.answer.map(|text| RecordedAnswer {
        raw_transcript: row.raw_transcript,
        text,
        response_time_secs: row.response_time_secs.unwrap_or(0.0),
    });
    let evaluation = match (row.finalized_at, row.scores) {
        (Some(_), Some(Json(scores))) => Some(Evaluation {
            scores,
            feedback: row.feedback.unwrap_or_default(),
            followup: row.followup,
        }),
        _ => None,
    };
    Turn {
        number: row.question_number.max(0) as u32,
        question: row.question,
        audio_ref: row.audio_ref,
        asked_at: row.asked_at,
        answer,
        evaluation,
    }
}

fn feedback_from_row(row: FeedbackRow) -> Result<SessionFeedback, StoreError> {
    Ok(SessionFeedback {
        overall_score: row.overall_score.clamp(0, 100) as u8,
        scores: row.scores.0,
        strengths: row.strengths.0,
        improvements: row.improvements.0,
        recommendations: row.recommendations.0,
        summary: row.summary,
        source: row.source.parse().map_err(StoreError::Corrupt)?,
        turns_evaluated: row.turns_evaluated.max(0) as u32,
    })
}
