//! In-memory collaborators for session machine and registry tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::oracle::{
    AnswerEvaluation, FeedbackReport, FeedbackRequest, GeneratedQuestion, InterviewOracle,
    NextQuestion, NextQuestionRequest, OracleError, ScoreRequest,
};
use super::profile::{Profile, ProfileResolver};
use super::round::RoundKind;
use super::session::{
    Evaluation, InterviewSession, RecordedAnswer, Scores, SessionFeedback, SessionStatus, Turn,
};
use super::store::{SessionStore, StoreError};

/// Same acceptance rules as `PgSessionStore`, kept in a map.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<Uuid, InterviewSession>>,
    fail_status: AtomicBool,
    finalized: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `set_status` call fail with a database error.
    pub fn fail_status_updates(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn get(&self, id: Uuid) -> Option<InterviewSession> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    /// Question numbers of finalized turns, in stored order.
    pub fn finalized_numbers(&self, id: Uuid) -> Vec<u32> {
        self.get(id)
            .map(|s| s.finalized_turns().map(|t| t.number).collect())
            .unwrap_or_default()
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut InterviewSession) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(&id)
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        f(session)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        id: Uuid,
        user_id: &str,
        round: RoundKind,
        target: u32,
        first: &Turn,
    ) -> Result<InterviewSession, StoreError> {
        let session = InterviewSession {
            id,
            user_id: user_id.to_string(),
            round,
            status: SessionStatus::Active,
            question_index: 0,
            target_questions: target,
            created_at: Utc::now(),
            turns: vec![first.clone()],
            feedback: None,
        };
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn load_session(&self, id: Uuid) -> Result<Option<InterviewSession>, StoreError> {
        Ok(self.get(id))
    }

    async fn append_question(&self, id: Uuid, turn: &Turn) -> Result<(), StoreError> {
        self.with_session(id, |s| {
            if s.turns.iter().any(|t| t.number == turn.number) {
                return Err(StoreError::Conflict {
                    session_id: id,
                    number: turn.number,
                });
            }
            s.turns.push(turn.clone());
            Ok(())
        })
    }

    async fn record_answer(
        &self,
        id: Uuid,
        number: u32,
        answer: &RecordedAnswer,
    ) -> Result<(), StoreError> {
        self.with_session(id, |s| {
            let turn = s
                .turns
                .iter_mut()
                .find(|t| t.number == number && !t.is_finalized())
                .ok_or(StoreError::Conflict {
                    session_id: id,
                    number,
                })?;
            turn.answer = Some(answer.clone());
            Ok(())
        })
    }

    async fn finalize_turn(
        &self,
        id: Uuid,
        number: u32,
        evaluation: &Evaluation,
    ) -> Result<(), StoreError> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        self.with_session(id, |s| {
            let conflict = StoreError::Conflict {
                session_id: id,
                number,
            };
            if s.status != SessionStatus::Active || s.question_index + 1 != number {
                return Err(conflict);
            }
            let turn = s
                .turns
                .iter_mut()
                .find(|t| t.number == number && t.answer.is_some() && !t.is_finalized())
                .ok_or(conflict)?;
            turn.evaluation = Some(evaluation.clone());
            s.question_index = number;
            Ok(())
        })
    }

    async fn set_status(&self, id: Uuid, status: SessionStatus) -> Result<(), StoreError> {
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.with_session(id, |s| {
            if s.status == SessionStatus::Active {
                s.status = status;
            }
            Ok(())
        })
    }

    async fn save_feedback(
        &self,
        id: Uuid,
        feedback: &SessionFeedback,
    ) -> Result<SessionFeedback, StoreError> {
        self.with_session(id, |s| Ok(s.feedback.get_or_insert(feedback.clone()).clone()))
    }
}

/// Oracle with deterministic questions ("Question {n}") and switchable failures.
#[derive(Default)]
pub struct ScriptedOracle {
    /// `next_question` fails for every number at or above this.
    fail_next_from: Option<u32>,
    fail_scoring: AtomicU32,
    fail_feedback: bool,
    score_delay: Option<Duration>,
    /// `score_answer` signals completion for this question number.
    complete_at: Option<u32>,
    followup: Option<String>,
    question_calls: AtomicUsize,
    score_calls: AtomicUsize,
    feedback_calls: AtomicUsize,
    scored: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_next_from(mut self, number: u32) -> Self {
        self.fail_next_from = Some(number);
        self
    }

    pub fn failing_scoring(self, times: u32) -> Self {
        self.fail_scoring.store(times, Ordering::SeqCst);
        self
    }

    pub fn failing_feedback(mut self) -> Self {
        self.fail_feedback = true;
        self
    }

    pub fn with_score_delay(mut self, delay: Duration) -> Self {
        self.score_delay = Some(delay);
        self
    }

    pub fn completing_at(mut self, number: u32) -> Self {
        self.complete_at = Some(number);
        self
    }

    pub fn with_followup(mut self, text: &str) -> Self {
        self.followup = Some(text.to_string());
        self
    }

    pub fn question_calls(&self) -> usize {
        self.question_calls.load(Ordering::SeqCst)
    }

    pub fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }

    pub fn feedback_calls(&self) -> usize {
        self.feedback_calls.load(Ordering::SeqCst)
    }

    /// Answers the oracle was asked to score, in call order.
    pub fn scored_answers(&self) -> Vec<String> {
        self.scored.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterviewOracle for ScriptedOracle {
    async fn next_question(&self, req: NextQuestionRequest<'_>) -> Result<NextQuestion, OracleError> {
        self.question_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_from.is_some_and(|from| req.number >= from) {
            return Err(OracleError::Unavailable("connection refused".into()));
        }
        Ok(NextQuestion::Ask(GeneratedQuestion {
            text: format!("Question {}", req.number),
            audio_ref: None,
        }))
    }

    async fn score_answer(&self, req: ScoreRequest<'_>) -> Result<AnswerEvaluation, OracleError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        self.scored.lock().unwrap().push(req.answer.to_string());
        if let Some(delay) = self.score_delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .fail_scoring
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OracleError::Unavailable("timeout".into()));
        }
        Ok(AnswerEvaluation {
            scores: Scores::uniform(req.round, 70),
            feedback: format!("Feedback {}", req.question_number),
            followup: self.followup.clone(),
            interview_complete: self.complete_at == Some(req.question_number),
        })
    }

    async fn feedback(&self, req: FeedbackRequest<'_>) -> Result<FeedbackReport, OracleError> {
        self.feedback_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_feedback {
            return Err(OracleError::Unavailable("overloaded".into()));
        }
        Ok(FeedbackReport {
            overall_score: 72,
            scores: Scores::uniform(req.round, 72),
            strengths: vec!["Clear structure.".into()],
            improvements: vec!["More metrics.".into()],
            recommendations: vec!["Practice system design.".into()],
            summary: format!("Evaluated {} answers.", req.turns.len()),
        })
    }
}

/// Resolver over a fixed set of known users.
pub struct StaticProfiles(pub Vec<String>);

impl StaticProfiles {
    pub fn of(users: &[&str]) -> Self {
        Self(users.iter().map(|u| u.to_string()).collect())
    }
}

#[async_trait]
impl ProfileResolver for StaticProfiles {
    async fn resolve(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        Ok(self
            .0
            .iter()
            .any(|u| u == user_id)
            .then(|| Profile::bare(user_id)))
    }
}
