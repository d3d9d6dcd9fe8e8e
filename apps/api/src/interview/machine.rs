//! Session State Machine.
//!
//! One `SessionMachine` per live session. The cached `InterviewSession` sits
//! behind a tokio mutex that may be held across store writes but never across
//! oracle calls, so `end` can land while a submission or question fetch is in
//! flight. Every mutation re-checks the status under the lock; results that
//! arrive after the session became terminal are dropped.
//!
//! Persist order per submission:
//! 1. classified answer recorded on the outstanding turn
//! 2. oracle scoring (no lock held)
//! 3. turn finalized together with the session's question index
//! 4. completion, or the next question fetched and announced

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::feedback;
use super::guards::{InFlight, Operation, OperationGuards};
use super::oracle::{
    FeedbackRequest, InterviewOracle, NextQuestion, NextQuestionRequest, OracleError,
    ScoreRequest,
};
use super::profile::Profile;
use super::round::RoundKind;
use super::session::{
    Evaluation, InterviewSession, RecordedAnswer, Scores, SessionFeedback, SessionStatus, Turn,
};
use super::store::{SessionStore, StoreError};
use crate::classifier::{classify, Classification, ClassificationView, NoAnswerReason};
use crate::config::InterviewSettings;
use crate::playback::{AudioSequencer, PlaybackItem, PlaybackSnapshot};

/// Raw transcript recorded when the answer window runs out.
pub const TIME_EXPIRED: &str = "[Time expired]";

/// How long a replay request waits for the parked item to move on.
const REPLAY_SETTLE: Duration = Duration::from_secs(2);

/// Delay before a failed timed-out submission is tried again.
const TIMEOUT_RETRY: Duration = Duration::from_secs(5);

/// How long a submission waits on a concurrent question fetch.
const FETCH_SETTLE: Duration = Duration::from_secs(30);
const FETCH_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{} is already in flight", .0.as_str())]
    Duplicate(Operation),

    #[error("no profile found for user '{0}'")]
    ProfileNotFound(String),

    #[error("user id may only contain letters, digits, '_' and '-'")]
    InvalidUserId,

    #[error("session {0} not found")]
    NotFound(Uuid),

    #[error("session is {0}")]
    Closed(SessionStatus),

    #[error("no question is awaiting an answer")]
    NoOutstandingQuestion,

    #[error("answer is for question {answered}, but question {outstanding} is outstanding")]
    StaleAnswer { answered: u32, outstanding: u32 },

    #[error("session belongs to the {actual} round, not {requested}")]
    WrongRound {
        requested: RoundKind,
        actual: RoundKind,
    },

    #[error("feedback is available once the session has ended")]
    NotFinished,

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("session cannot continue: {0}")]
    Unrecoverable(String),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Oracle(_) | SessionError::Store(StoreError::Database(_))
        )
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct MachineDeps {
    pub store: Arc<dyn SessionStore>,
    pub oracle: Arc<dyn InterviewOracle>,
    pub settings: InterviewSettings,
}

/// `question_number`, when given, must name the outstanding question; an
/// answer that arrives after its question moved on is rejected.
#[derive(Debug, Clone)]
pub enum AnswerInput {
    Transcript {
        text: Option<String>,
        /// Client-measured; the time since the question was asked otherwise.
        response_time_secs: Option<f64>,
        question_number: Option<u32>,
    },
    TimedOut {
        question_number: Option<u32>,
    },
}

impl AnswerInput {
    fn question_number(&self) -> Option<u32> {
        match self {
            AnswerInput::Transcript {
                question_number, ..
            }
            | AnswerInput::TimedOut { question_number } => *question_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub number: u32,
    pub total: u32,
    pub text: String,
    pub audio_ref: Option<String>,
    pub is_warmup: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub status: SessionStatus,
    pub question: Option<QuestionView>,
    pub session_feedback: Option<SessionFeedback>,
}

/// `next_question` is `None` on an active session only when a concurrent
/// fetch outlasted the wait; the question is then served by next-question.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub question_number: u32,
    /// Stored answer: cleaned text or the "No Answer" sentinel.
    pub answer: String,
    pub classification: ClassificationView,
    pub scores: Scores,
    pub feedback: String,
    pub followup: Option<String>,
    pub status: SessionStatus,
    pub next_question: Option<QuestionView>,
    pub session_feedback: Option<SessionFeedback>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndOutcome {
    pub status: SessionStatus,
    pub questions_answered: u32,
    /// Whether the store acknowledged the terminal status.
    #[serde(skip)]
    pub persisted: bool,
}

type AnswerTimer = (u32, JoinHandle<()>);

pub struct SessionMachine {
    id: Uuid,
    round: RoundKind,
    target: u32,
    profile: Profile,
    state: Mutex<InterviewSession>,
    guards: OperationGuards,
    audio: AudioSequencer,
    deps: MachineDeps,
    timer: StdMutex<Option<AnswerTimer>>,
    status_synced: AtomicBool,
    me: Weak<SessionMachine>,
}

impl SessionMachine {
    /// Fetches question 1, then persists session `id`. Nothing is stored
    /// when the oracle fails.
    pub async fn start(
        deps: MachineDeps,
        id: Uuid,
        profile: Profile,
        round: RoundKind,
        audio: AudioSequencer,
    ) -> Result<(Arc<Self>, QuestionView), SessionError> {
        let target = deps.settings.target_for(round.target_questions());
        let first = match deps
            .oracle
            .next_question(NextQuestionRequest {
                round,
                profile: &profile,
                number: 1,
                target,
                history: &[],
                last_answer: None,
            })
            .await?
        {
            NextQuestion::Ask(q) => q,
            NextQuestion::Completed => {
                return Err(OracleError::Malformed(
                    "round completed before the first question".to_string(),
                )
                .into())
            }
        };

        let turn = Turn::asked(1, first.text, first.audio_ref);
        let session = deps
            .store
            .create_session(id, &profile.user_id, round, target, &turn)
            .await?;

        info!(
            session_id = %session.id,
            user_id = %profile.user_id,
            round = %round,
            target,
            "interview session started"
        );

        let machine = Self::build(session, profile, audio, deps);
        machine.announce(&turn);
        let view = machine.question_view(&turn);
        Ok((machine, view))
    }

    /// Rebuilds a machine from stored state. An outstanding question's
    /// answer timer is re-armed with whatever time is left.
    pub fn resume(
        session: InterviewSession,
        profile: Profile,
        audio: AudioSequencer,
        deps: MachineDeps,
    ) -> Arc<Self> {
        let pending = (session.status == SessionStatus::Active)
            .then(|| session.outstanding().map(|t| (t.number, t.asked_at)))
            .flatten();
        let timeout = deps.settings.answer_timeout;

        let machine = Self::build(session, profile, audio, deps);
        machine.status_synced.store(true, Ordering::Release);
        if let (Some((number, asked_at)), Some(limit)) = (pending, timeout) {
            let elapsed = (Utc::now() - asked_at).to_std().unwrap_or_default();
            machine.arm_timer(number, limit.saturating_sub(elapsed));
        }
        info!(session_id = %machine.id, round = %machine.round, "interview session resumed");
        machine
    }

    fn build(
        session: InterviewSession,
        profile: Profile,
        audio: AudioSequencer,
        deps: MachineDeps,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id: session.id,
            round: session.round,
            target: session.target_questions,
            profile,
            state: Mutex::new(session),
            guards: OperationGuards::default(),
            audio,
            deps,
            timer: StdMutex::new(None),
            status_synced: AtomicBool::new(false),
            me: me.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn round(&self) -> RoundKind {
        self.round
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.lock().await.status
    }

    /// Terminal, recorded in the store, and done speaking. A busy lock
    /// means an operation is still running, so the session is not retired.
    pub fn is_retired(&self) -> bool {
        let terminal = self
            .state
            .try_lock()
            .is_ok_and(|s| s.status.is_terminal());
        terminal && self.status_synced.load(Ordering::Acquire) && self.audio.snapshot().is_quiet()
    }

    pub fn audio_snapshot(&self) -> PlaybackSnapshot {
        self.audio.snapshot()
    }

    pub async fn submit_answer(&self, input: AnswerInput) -> Result<SubmitOutcome, SessionError> {
        let _in_flight = self.acquire(Operation::SubmitAnswer)?;

        let answering = input.question_number();
        let (raw_transcript, classification, given_time) = match input {
            AnswerInput::Transcript {
                text,
                response_time_secs,
                ..
            } => {
                let classification = classify(text.as_deref());
                (text, classification, response_time_secs)
            }
            AnswerInput::TimedOut { .. } => (
                Some(TIME_EXPIRED.to_string()),
                Classification::NoAnswer(NoAnswerReason::Empty),
                self.deps.settings.answer_timeout.map(|d| d.as_secs_f64()),
            ),
        };

        let (number, question, answer) = {
            let mut state = self.state.lock().await;
            ensure_active(&state)?;
            let (number, question, asked_at) = state
                .outstanding()
                .map(|t| (t.number, t.question.clone(), t.asked_at))
                .ok_or(SessionError::NoOutstandingQuestion)?;
            if let Some(answered) = answering.filter(|n| *n != number) {
                info!(
                    session_id = %self.id,
                    answered,
                    outstanding = number,
                    "rejecting answer for a question that has moved on"
                );
                return Err(SessionError::StaleAnswer {
                    answered,
                    outstanding: number,
                });
            }

            let elapsed = (Utc::now() - asked_at).to_std().unwrap_or_default();
            let answer = RecordedAnswer {
                raw_transcript,
                text: classification.stored_text().to_string(),
                response_time_secs: given_time
                    .filter(|t| t.is_finite() && *t >= 0.0)
                    .unwrap_or(elapsed.as_secs_f64()),
            };
            self.deps
                .store
                .record_answer(self.id, number, &answer)
                .await?;
            if let Some(turn) = state.outstanding_mut() {
                turn.answer = Some(answer.clone());
            }
            (number, question, answer)
        };

        debug!(
            session_id = %self.id,
            question_number = number,
            reason = ?classification.reason(),
            "answer recorded"
        );

        let verdict = self
            .deps
            .oracle
            .score_answer(ScoreRequest {
                round: self.round,
                question_number: number,
                question: &question,
                answer: &answer.text,
                response_time_secs: answer.response_time_secs,
            })
            .await
            .inspect_err(|e| {
                warn!(session_id = %self.id, question_number = number, "scoring failed: {e}")
            })?;

        let end_requested = verdict.interview_complete;
        let evaluation = Evaluation {
            scores: verdict.scores,
            feedback: verdict.feedback,
            followup: verdict.followup,
        };

        let reached_target = {
            let mut state = self.state.lock().await;
            if state.status.is_terminal() {
                info!(
                    session_id = %self.id,
                    question_number = number,
                    "discarding score that arrived after the session ended"
                );
                return Err(SessionError::Closed(state.status));
            }
            self.deps
                .store
                .finalize_turn(self.id, number, &evaluation)
                .await?;
            if let Some(turn) = state.outstanding_mut() {
                turn.evaluation = Some(evaluation.clone());
            }
            state.question_index = number;
            state.reached_target()
        };

        self.cancel_timer();
        if let Some(followup) = evaluation.followup.as_deref().filter(|f| !f.trim().is_empty()) {
            self.audio.enqueue(PlaybackItem::feedback(followup));
        }
        info!(
            session_id = %self.id,
            round = %self.round,
            question_number = number,
            overall = evaluation.scores.overall(),
            "turn finalized"
        );

        let progress = if reached_target || end_requested {
            self.complete().await
        } else {
            match self.guards.try_acquire(Operation::NextQuestion) {
                Some(_fetching) => self.advance().await?,
                None => self.after_concurrent_fetch().await?,
            }
        };

        Ok(SubmitOutcome {
            question_number: number,
            answer: answer.text,
            classification: ClassificationView::from(&classification),
            scores: evaluation.scores,
            feedback: evaluation.feedback,
            followup: evaluation.followup,
            status: progress.status,
            next_question: progress.question,
            session_feedback: progress.session_feedback,
        })
    }

    /// Returns the outstanding question, fetching the next one if the last
    /// turn is finalized.
    pub async fn next_question(&self) -> Result<Progress, SessionError> {
        let _in_flight = self.acquire(Operation::NextQuestion)?;
        {
            let state = self.state.lock().await;
            match state.status {
                SessionStatus::Cancelled => return Err(SessionError::Closed(state.status)),
                SessionStatus::Completed => {
                    return Ok(Progress {
                        status: state.status,
                        question: None,
                        session_feedback: state.feedback.clone(),
                    })
                }
                SessionStatus::Active => {}
            }
        }
        self.advance().await
    }

    /// Ends the session: `Completed` at or past the target, `Cancelled`
    /// otherwise. Audio is stopped even when the store cannot be told.
    pub async fn end(&self) -> EndOutcome {
        let (status, persisted) = self
            .terminate(|s| {
                if s.reached_target() {
                    SessionStatus::Completed
                } else {
                    SessionStatus::Cancelled
                }
            })
            .await;
        self.audio.stop_all();
        let questions_answered = self.state.lock().await.question_index;
        EndOutcome {
            status,
            questions_answered,
            persisted,
        }
    }

    pub async fn generate_feedback(&self) -> Result<SessionFeedback, SessionError> {
        let _in_flight = self.acquire(Operation::Feedback)?;
        self.feedback_inner().await
    }

    /// Replays an item parked after a host rejection and waits briefly for
    /// the sequencer to pick it up.
    pub async fn replay_audio(&self) -> Result<PlaybackSnapshot, SessionError> {
        let _in_flight = self.acquire(Operation::PlayAudio)?;
        let mut rx = self.audio.subscribe();
        let parked = rx.borrow_and_update().awaiting_gesture;
        self.audio.replay();

        if parked.is_some() {
            let settled = async {
                while rx.changed().await.is_ok() {
                    if rx.borrow().awaiting_gesture != parked {
                        break;
                    }
                }
            };
            if tokio::time::timeout(REPLAY_SETTLE, settled).await.is_err() {
                debug!(session_id = %self.id, "replay still pending");
            }
        }
        Ok(self.audio.snapshot())
    }

    fn acquire(&self, op: Operation) -> Result<InFlight<'_>, SessionError> {
        self.guards.try_acquire(op).ok_or_else(|| {
            debug!(session_id = %self.id, operation = op.as_str(), "duplicate call ignored");
            SessionError::Duplicate(op)
        })
    }

    /// Waits for a concurrent `next_question` to release its permit, then
    /// reports what it produced without a second oracle call.
    async fn after_concurrent_fetch(&self) -> Result<Progress, SessionError> {
        let deadline = tokio::time::Instant::now() + FETCH_SETTLE;
        loop {
            if let Some(_fetching) = self.guards.try_acquire(Operation::NextQuestion) {
                return self.advance().await;
            }
            if tokio::time::Instant::now() >= deadline {
                debug!(session_id = %self.id, "question fetch still in flight");
                return Ok(Progress {
                    status: SessionStatus::Active,
                    question: None,
                    session_feedback: None,
                });
            }
            tokio::time::sleep(FETCH_POLL).await;
        }
    }

    /// Caller holds the `NextQuestion` permit.
    async fn advance(&self) -> Result<Progress, SessionError> {
        let (number, history, last_answer) = {
            let state = self.state.lock().await;
            if state.status.is_terminal() {
                return Ok(Progress {
                    status: state.status,
                    question: None,
                    session_feedback: state.feedback.clone(),
                });
            }
            if let Some(turn) = state.outstanding() {
                return Ok(Progress {
                    status: state.status,
                    question: Some(self.question_view(turn)),
                    session_feedback: None,
                });
            }
            let history: Vec<Turn> = state.finalized_turns().cloned().collect();
            let last_answer = history
                .last()
                .and_then(Turn::answer_text)
                .map(str::to_string);
            (state.question_index + 1, history, last_answer)
        };

        let fetched = self
            .deps
            .oracle
            .next_question(NextQuestionRequest {
                round: self.round,
                profile: &self.profile,
                number,
                target: self.target,
                history: &history,
                last_answer: last_answer.as_deref(),
            })
            .await;

        match fetched {
            Ok(NextQuestion::Ask(q)) => {
                let turn = Turn::asked(number, q.text, q.audio_ref);
                {
                    let mut state = self.state.lock().await;
                    if state.status.is_terminal() {
                        info!(
                            session_id = %self.id,
                            question_number = number,
                            "discarding question that arrived after the session ended"
                        );
                        return Ok(Progress {
                            status: state.status,
                            question: None,
                            session_feedback: state.feedback.clone(),
                        });
                    }
                    self.deps.store.append_question(self.id, &turn).await?;
                    state.turns.push(turn.clone());
                }
                self.announce(&turn);
                Ok(Progress {
                    status: SessionStatus::Active,
                    question: Some(self.question_view(&turn)),
                    session_feedback: None,
                })
            }
            Ok(NextQuestion::Completed) => {
                info!(session_id = %self.id, question_number = number, "oracle completed the round");
                Ok(self.complete().await)
            }
            Err(e) if number - 1 >= self.deps.settings.min_viable_turns => {
                warn!(
                    session_id = %self.id,
                    answered = number - 1,
                    "next question unavailable, completing with collected turns: {e}"
                );
                Ok(self.complete().await)
            }
            Err(e) => {
                error!(
                    session_id = %self.id,
                    answered = number - 1,
                    "next question unavailable before minimum turns, abandoning session: {e}"
                );
                self.terminate(|_| SessionStatus::Cancelled).await;
                self.audio.stop_all();
                Err(SessionError::Unrecoverable(e.to_string()))
            }
        }
    }

    async fn complete(&self) -> Progress {
        let (status, _) = self.terminate(|_| SessionStatus::Completed).await;
        let session_feedback = match self.feedback_inner().await {
            Ok(feedback) => Some(feedback),
            Err(e) => {
                warn!(session_id = %self.id, "feedback not generated on completion: {e}");
                None
            }
        };
        Progress {
            status,
            question: None,
            session_feedback,
        }
    }

    /// Moves the session to the status `decide` picks. A store failure is
    /// logged and reported through the returned flag; the local transition
    /// stands either way.
    async fn terminate(
        &self,
        decide: impl FnOnce(&InterviewSession) -> SessionStatus,
    ) -> (SessionStatus, bool) {
        let mut state = self.state.lock().await;
        if state.status.is_terminal() {
            return (state.status, self.status_synced.load(Ordering::Acquire));
        }
        let status = decide(&state);
        state.status = status;
        self.cancel_timer();

        let persisted = match self.deps.store.set_status(self.id, status).await {
            Ok(()) => true,
            Err(e) => {
                warn!(session_id = %self.id, %status, "failed to record terminal status: {e}");
                false
            }
        };
        self.status_synced.store(persisted, Ordering::Release);
        info!(
            session_id = %self.id,
            round = %self.round,
            %status,
            answered = state.question_index,
            "interview session ended"
        );
        (status, persisted)
    }

    async fn feedback_inner(&self) -> Result<SessionFeedback, SessionError> {
        let turns: Vec<Turn> = {
            let state = self.state.lock().await;
            if !state.status.is_terminal() {
                return Err(SessionError::NotFinished);
            }
            if let Some(feedback) = &state.feedback {
                return Ok(feedback.clone());
            }
            state.finalized_turns().cloned().collect()
        };
        let evaluated = turns.len() as u32;

        let computed = if feedback::valid_answers(&turns).next().is_none() {
            info!(session_id = %self.id, evaluated, "no valid responses to evaluate");
            feedback::no_valid_responses(self.round, evaluated)
        } else {
            match self
                .deps
                .oracle
                .feedback(FeedbackRequest {
                    round: self.round,
                    profile: &self.profile,
                    turns: &turns,
                })
                .await
            {
                Ok(report) => feedback::from_report(report, evaluated),
                Err(e) => {
                    warn!(session_id = %self.id, "feedback oracle failed, using heuristic: {e}");
                    feedback::heuristic(self.round, &turns, self.target)
                }
            }
        };

        let mut state = self.state.lock().await;
        let stored = self.deps.store.save_feedback(self.id, &computed).await?;
        Ok(state.feedback.get_or_insert(stored).clone())
    }

    fn announce(&self, turn: &Turn) {
        self.audio
            .enqueue(PlaybackItem::question(&turn.question, turn.audio_ref.as_deref()));
        if let Some(limit) = self.deps.settings.answer_timeout {
            self.arm_timer(turn.number, limit);
        }
    }

    fn question_view(&self, turn: &Turn) -> QuestionView {
        QuestionView {
            number: turn.number,
            total: self.target,
            text: turn.question.clone(),
            audio_ref: turn.audio_ref.clone(),
            is_warmup: self.round.warmup_question(turn.number).is_some(),
        }
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<AnswerTimer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm_timer(&self, number: u32, after: Duration) {
        let me = self.me.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(machine) = me.upgrade() {
                machine.on_answer_timeout(number).await;
            }
        });
        if let Some((_, previous)) = self.timer_slot().replace((number, task)) {
            previous.abort();
        }
    }

    fn cancel_timer(&self) {
        if let Some((_, task)) = self.timer_slot().take() {
            task.abort();
        }
    }

    async fn on_answer_timeout(&self, number: u32) {
        // Take our own slot so the submission below cannot abort this task.
        {
            let mut slot = self.timer_slot();
            match slot.as_ref() {
                Some((armed, _)) if *armed == number => {
                    slot.take();
                }
                _ => return,
            }
        }

        let result = self
            .submit_answer(AnswerInput::TimedOut {
                question_number: Some(number),
            })
            .await;
        match result {
            Ok(outcome) => info!(
                session_id = %self.id,
                question_number = outcome.question_number,
                "answer window expired"
            ),
            Err(SessionError::StaleAnswer { .. }) | Err(SessionError::Closed(_)) => debug!(
                session_id = %self.id,
                question_number = number,
                "question settled before its timeout"
            ),
            Err(e) => {
                if matches!(e, SessionError::Duplicate(_)) {
                    debug!(
                        session_id = %self.id,
                        question_number = number,
                        "timeout raced a submission"
                    );
                } else {
                    warn!(
                        session_id = %self.id,
                        question_number = number,
                        retryable = e.is_retryable(),
                        "timed-out submission failed: {e}"
                    );
                }
                self.rearm_if_unanswered(number).await;
            }
        }
    }

    /// Keeps a deadline on question `number` while it is still outstanding.
    /// Holding the state lock orders this against finalization, which cancels
    /// the timer once the lock is released.
    async fn rearm_if_unanswered(&self, number: u32) {
        let state = self.state.lock().await;
        let unanswered = state.status == SessionStatus::Active
            && state.outstanding().map(|t| t.number) == Some(number);
        if unanswered && self.timer_slot().is_none() {
            debug!(session_id = %self.id, question_number = number, "re-arming answer timeout");
            self.arm_timer(number, TIMEOUT_RETRY);
        }
    }
}

impl Drop for SessionMachine {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

fn ensure_active(session: &InterviewSession) -> Result<(), SessionError> {
    match session.status {
        SessionStatus::Active => Ok(()),
        other => Err(SessionError::Closed(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NO_ANSWER;
    use crate::config::PlaybackSettings;
    use crate::interview::feedback::NO_VALID_RESPONSES_SUMMARY;
    use crate::interview::session::FeedbackSource;
    use crate::interview::testing::{MemoryStore, ScriptedOracle};
    use crate::playback::testing::{Behavior, FakeSink, FakeSynth};
    use crate::playback::PlaybackState;

    const GOOD_ANSWER: &str = "I have 3 years of experience building backend services in Python.";

    struct Harness {
        store: Arc<MemoryStore>,
        oracle: Arc<ScriptedOracle>,
        sink: Arc<FakeSink>,
        synth: Arc<FakeSynth>,
        settings: InterviewSettings,
    }

    impl Harness {
        fn new(oracle: ScriptedOracle) -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                oracle: Arc::new(oracle),
                sink: FakeSink::new(Behavior::Play(Duration::from_millis(20))),
                synth: Arc::new(FakeSynth::new()),
                settings: InterviewSettings {
                    min_viable_turns: 3,
                    answer_timeout: None,
                    question_limit: Some(3),
                },
            }
        }

        fn settings(mut self, f: impl FnOnce(&mut InterviewSettings)) -> Self {
            f(&mut self.settings);
            self
        }

        fn deps(&self) -> MachineDeps {
            MachineDeps {
                store: self.store.clone(),
                oracle: self.oracle.clone(),
                settings: self.settings.clone(),
            }
        }

        fn sequencer(&self) -> AudioSequencer {
            AudioSequencer::spawn(
                self.sink.clone(),
                self.synth.clone(),
                PlaybackSettings::default(),
            )
        }

        async fn start(&self) -> Arc<SessionMachine> {
            let (machine, first) = SessionMachine::start(
                self.deps(),
                Uuid::new_v4(),
                Profile::bare("u_42"),
                RoundKind::Technical,
                self.sequencer(),
            )
            .await
            .unwrap();
            assert_eq!(first.number, 1);
            machine
        }
    }

    fn said(text: &str) -> AnswerInput {
        AnswerInput::Transcript {
            text: Some(text.to_string()),
            response_time_secs: Some(12.5),
            question_number: None,
        }
    }

    #[tokio::test]
    async fn test_three_question_round_completes_after_third_answer() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;

        for n in 1..=2 {
            let out = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
            assert_eq!(out.question_number, n);
            assert_eq!(out.status, SessionStatus::Active);
            assert_eq!(out.next_question.as_ref().map(|q| q.number), Some(n + 1));
            assert!(out.session_feedback.is_none());
        }

        let last = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        assert_eq!(last.status, SessionStatus::Completed);
        assert!(last.next_question.is_none());
        let fb = last.session_feedback.expect("feedback on completion");
        assert_eq!(fb.turns_evaluated, 3);
        assert_eq!(fb.source, FeedbackSource::Oracle);
        assert_eq!(fb.summary, "Evaluated 3 answers.");

        assert_eq!(h.store.finalized_numbers(machine.id()), vec![1, 2, 3]);
        let stored = h.store.get(machine.id()).unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.question_index, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submissions_finalize_one_turn() {
        let h = Harness::new(ScriptedOracle::new().with_score_delay(Duration::from_millis(200)));
        let machine = h.start().await;

        let (a, b) = tokio::join!(
            machine.submit_answer(said(GOOD_ANSWER)),
            machine.submit_answer(said("A completely different answer about databases."))
        );

        assert!(a.is_ok());
        assert!(matches!(
            b,
            Err(SessionError::Duplicate(Operation::SubmitAnswer))
        ));
        assert_eq!(h.oracle.score_calls(), 1);
        assert_eq!(h.store.finalize_calls(), 1);
        assert_eq!(h.store.finalized_numbers(machine.id()), vec![1]);
    }

    #[tokio::test]
    async fn test_feedback_is_idempotent() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;
        for _ in 0..3 {
            machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        }

        let first = machine.generate_feedback().await.unwrap();
        let second = machine.generate_feedback().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(h.oracle.feedback_calls(), 1);
    }

    #[tokio::test]
    async fn test_all_sentinel_answers_report_no_valid_responses() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;

        let empty = AnswerInput::Transcript {
            text: None,
            response_time_secs: None,
            question_number: None,
        };
        machine.submit_answer(empty).await.unwrap();
        machine.submit_answer(said("um")).await.unwrap();
        let last = machine.submit_answer(said("   ")).await.unwrap();

        assert_eq!(h.oracle.scored_answers(), vec![NO_ANSWER; 3]);
        let fb = last.session_feedback.unwrap();
        assert_eq!(fb.overall_score, 0);
        assert!(fb.scores.iter().all(|(_, v)| v == 0));
        assert_eq!(fb.summary, NO_VALID_RESPONSES_SUMMARY);
        assert_eq!(h.oracle.feedback_calls(), 0);
    }

    #[tokio::test]
    async fn test_scoring_failure_leaves_turn_open_for_retry() {
        let h = Harness::new(ScriptedOracle::new().failing_scoring(1));
        let machine = h.start().await;

        let err = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap_err();
        assert!(matches!(err, SessionError::Oracle(_)));
        assert!(err.is_retryable());
        assert!(h.store.finalized_numbers(machine.id()).is_empty());
        let stored = h.store.get(machine.id()).unwrap();
        assert_eq!(
            stored.turns[0].answer.as_ref().map(|a| a.text.as_str()),
            Some(GOOD_ANSWER)
        );

        let retry = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        assert_eq!(retry.question_number, 1);
        assert_eq!(h.store.finalized_numbers(machine.id()), vec![1]);
    }

    #[tokio::test]
    async fn test_missing_next_question_before_minimum_is_fatal() {
        let h = Harness::new(ScriptedOracle::new().failing_next_from(2));
        let machine = h.start().await;

        let err = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap_err();
        assert!(matches!(err, SessionError::Unrecoverable(_)));

        let stored = h.store.get(machine.id()).unwrap();
        assert_eq!(stored.status, SessionStatus::Cancelled);
        assert_eq!(h.store.finalized_numbers(machine.id()), vec![1]);
        assert!(matches!(
            machine.submit_answer(said(GOOD_ANSWER)).await,
            Err(SessionError::Closed(SessionStatus::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_missing_next_question_after_minimum_force_completes() {
        let h = Harness::new(ScriptedOracle::new().failing_next_from(4))
            .settings(|s| s.question_limit = None);
        let machine = h.start().await;

        for _ in 0..2 {
            machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        }
        let third = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        assert_eq!(third.status, SessionStatus::Completed);
        assert_eq!(third.session_feedback.unwrap().turns_evaluated, 3);
    }

    #[tokio::test]
    async fn test_oracle_completion_signal_ends_round_early() {
        let h = Harness::new(ScriptedOracle::new().completing_at(2))
            .settings(|s| s.question_limit = None);
        let machine = h.start().await;

        machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        let second = machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        assert_eq!(second.status, SessionStatus::Completed);
        assert_eq!(h.oracle.question_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_mid_round_cancels_and_stops_audio() {
        let mut h = Harness::new(ScriptedOracle::new());
        h.sink = FakeSink::new(Behavior::Play(Duration::from_secs(30)));
        let machine = h.start().await;

        let mut rx = machine.audio.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_playing()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.sink.live(), 1);

        let ended = machine.end().await;
        assert_eq!(ended.status, SessionStatus::Cancelled);
        assert!(ended.persisted);
        assert_eq!(ended.questions_answered, 0);

        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|s| s.state != PlaybackState::Playing),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(h.sink.live(), 0);
        assert!(matches!(
            machine.submit_answer(said(GOOD_ANSWER)).await,
            Err(SessionError::Closed(SessionStatus::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_end_completes_locally_when_store_is_unreachable() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;
        h.store.fail_status_updates();

        let ended = machine.end().await;
        assert_eq!(ended.status, SessionStatus::Cancelled);
        assert!(!ended.persisted);
        assert_eq!(machine.status().await, SessionStatus::Cancelled);
        assert_eq!(
            h.store.get(machine.id()).unwrap().status,
            SessionStatus::Active
        );
        assert!(machine.generate_feedback().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_score_is_discarded_after_end() {
        let h = Harness::new(ScriptedOracle::new().with_score_delay(Duration::from_millis(500)));
        let machine = h.start().await;

        let submitting = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.submit_answer(said(GOOD_ANSWER)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        machine.end().await;

        let late = submitting.await.unwrap();
        assert!(matches!(
            late,
            Err(SessionError::Closed(SessionStatus::Cancelled))
        ));
        assert_eq!(h.store.finalize_calls(), 0);
        assert!(h.store.finalized_numbers(machine.id()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_timeout_submits_sentinel() {
        let h = Harness::new(ScriptedOracle::new())
            .settings(|s| s.answer_timeout = Some(Duration::from_secs(60)));
        let machine = h.start().await;

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(h.oracle.scored_answers(), vec![NO_ANSWER.to_string()]);
        let stored = h.store.get(machine.id()).unwrap();
        let answer = stored.turns[0].answer.clone().unwrap();
        assert_eq!(answer.text, NO_ANSWER);
        assert_eq!(answer.raw_transcript.as_deref(), Some(TIME_EXPIRED));
        assert_eq!(stored.question_index, 1);
        assert_eq!(stored.turns.len(), 2, "question 2 asked after the timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_answer_arriving_after_timeout_is_not_applied_to_next_question() {
        let h = Harness::new(ScriptedOracle::new())
            .settings(|s| s.answer_timeout = Some(Duration::from_secs(60)));
        let machine = h.start().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        let late = machine
            .submit_answer(AnswerInput::Transcript {
                text: Some(GOOD_ANSWER.to_string()),
                response_time_secs: Some(61.0),
                question_number: Some(1),
            })
            .await;

        assert!(matches!(
            late,
            Err(SessionError::StaleAnswer {
                answered: 1,
                outstanding: 2
            })
        ));
        let stored = h.store.get(machine.id()).unwrap();
        assert_eq!(
            stored.turns[0].answer.as_ref().map(|a| a.text.as_str()),
            Some(NO_ANSWER)
        );
        assert!(stored.turns[1].answer.is_none());
        assert_eq!(h.oracle.scored_answers(), vec![NO_ANSWER.to_string()]);

        let on_time = machine
            .submit_answer(AnswerInput::Transcript {
                text: Some(GOOD_ANSWER.to_string()),
                response_time_secs: None,
                question_number: Some(2),
            })
            .await
            .unwrap();
        assert_eq!(on_time.question_number, 2);
        assert_eq!(on_time.answer, GOOD_ANSWER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_timeout_submission_is_retried() {
        let h = Harness::new(ScriptedOracle::new().failing_scoring(1))
            .settings(|s| s.answer_timeout = Some(Duration::from_secs(60)));
        let machine = h.start().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.oracle.score_calls(), 1);
        assert!(h.store.finalized_numbers(machine.id()).is_empty());

        tokio::time::sleep(TIMEOUT_RETRY + Duration::from_secs(1)).await;
        assert_eq!(h.oracle.score_calls(), 2);
        assert_eq!(h.store.finalized_numbers(machine.id()), vec![1]);
        let stored = h.store.get(machine.id()).unwrap();
        assert_eq!(
            stored.turns[0].answer.as_ref().and_then(|a| a.raw_transcript.as_deref()),
            Some(TIME_EXPIRED)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submission_waits_out_concurrent_question_fetch() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;

        let fetching = machine.guards.try_acquire(Operation::NextQuestion).unwrap();
        let submitting = {
            let machine = machine.clone();
            tokio::spawn(async move { machine.submit_answer(said(GOOD_ANSWER)).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.store.finalized_numbers(machine.id()), vec![1]);
        drop(fetching);

        let out = submitting.await.unwrap().unwrap();
        assert_eq!(out.status, SessionStatus::Active);
        assert_eq!(out.next_question.map(|q| q.number), Some(2));
    }

    #[tokio::test]
    async fn test_failed_start_persists_nothing() {
        let h = Harness::new(ScriptedOracle::new().failing_next_from(1));
        let result = SessionMachine::start(
            h.deps(),
            Uuid::new_v4(),
            Profile::bare("u_42"),
            RoundKind::Coding,
            h.sequencer(),
        )
        .await;

        assert!(matches!(result, Err(SessionError::Oracle(_))));
        assert_eq!(h.store.session_count(), 0);
    }

    #[tokio::test]
    async fn test_feedback_before_end_is_rejected() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;
        assert!(matches!(
            machine.generate_feedback().await,
            Err(SessionError::NotFinished)
        ));
    }

    #[tokio::test]
    async fn test_feedback_falls_back_to_heuristic() {
        let h = Harness::new(ScriptedOracle::new().failing_feedback());
        let machine = h.start().await;
        for _ in 0..3 {
            machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        }
        let fb = machine.generate_feedback().await.unwrap();
        assert_eq!(fb.source, FeedbackSource::Heuristic);
        assert!(fb.overall_score > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_followup_is_spoken_between_questions() {
        let h = Harness::new(ScriptedOracle::new().with_followup("Tell me more about that."));
        let machine = h.start().await;
        machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();

        let mut rx = machine.audio.subscribe();
        tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| s.completed == 3))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.synth.calls(), 3);
        assert_eq!(h.sink.max_live(), 1);
    }

    #[tokio::test]
    async fn test_resume_returns_outstanding_question_without_oracle_call() {
        let h = Harness::new(ScriptedOracle::new());
        let machine = h.start().await;
        machine.submit_answer(said(GOOD_ANSWER)).await.unwrap();
        let calls = h.oracle.question_calls();

        let stored = h.store.get(machine.id()).unwrap();
        let resumed =
            SessionMachine::resume(stored, Profile::bare("u_42"), h.sequencer(), h.deps());
        let progress = resumed.next_question().await.unwrap();

        assert_eq!(progress.question.map(|q| q.number), Some(2));
        assert_eq!(h.oracle.question_calls(), calls);
    }
}
