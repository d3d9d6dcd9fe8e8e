//! Session, turn and feedback values shared by the state machine, the store
//! and the HTTP layer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::round::{RoundKind, OVERALL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "completed" => Ok(SessionStatus::Completed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// Per-dimension scores, each 0..=100. Always carries `overall`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scores(BTreeMap<String, u8>);

impl Scores {
    /// Normalises raw model output onto the round's dimensions. Missing
    /// dimensions score 0; a missing `overall` is the mean of the others.
    pub fn for_round(round: RoundKind, raw: &HashMap<String, f64>) -> Self {
        let mut scores = BTreeMap::new();
        for dim in round.dimensions() {
            scores.insert(dim.to_string(), clamp_score(raw.get(*dim).copied()));
        }
        let overall = match raw.get(OVERALL) {
            Some(v) => clamp_score(Some(*v)),
            None => mean(scores.values().copied()),
        };
        scores.insert(OVERALL.to_string(), overall);
        Self(scores)
    }

    /// Every dimension, `overall` included, set to `value`.
    pub fn uniform(round: RoundKind, value: u8) -> Self {
        let value = value.min(100);
        let mut scores: BTreeMap<String, u8> = round
            .dimensions()
            .iter()
            .map(|d| (d.to_string(), value))
            .collect();
        scores.insert(OVERALL.to_string(), value);
        Self(scores)
    }

    pub fn zeroed(round: RoundKind) -> Self {
        Self::uniform(round, 0)
    }

    pub fn get(&self, dimension: &str) -> Option<u8> {
        self.0.get(dimension).copied()
    }

    pub fn overall(&self) -> u8 {
        self.get(OVERALL).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

fn clamp_score(raw: Option<f64>) -> u8 {
    match raw {
        Some(v) if v.is_finite() => v.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

fn mean(values: impl Iterator<Item = u8>) -> u8 {
    let (sum, n) = values.fold((0u32, 0u32), |(s, n), v| (s + v as u32, n + 1));
    if n == 0 {
        0
    } else {
        ((sum as f64) / (n as f64)).round() as u8
    }
}

/// The classified answer recorded against a turn before it is scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub raw_transcript: Option<String>,
    /// Cleaned text or the "No Answer" sentinel.
    pub text: String,
    pub response_time_secs: f64,
}

/// Oracle verdict that finalizes a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub scores: Scores,
    pub feedback: String,
    pub followup: Option<String>,
}

/// One question of a session. Finalized once `evaluation` is set; never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    pub number: u32,
    pub question: String,
    pub audio_ref: Option<String>,
    pub asked_at: DateTime<Utc>,
    pub answer: Option<RecordedAnswer>,
    pub evaluation: Option<Evaluation>,
}

impl Turn {
    pub fn asked(number: u32, question: String, audio_ref: Option<String>) -> Self {
        Self {
            number,
            question,
            audio_ref,
            asked_at: Utc::now(),
            answer: None,
            evaluation: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.evaluation.is_some()
    }

    /// Stored answer text of a finalized turn.
    pub fn answer_text(&self) -> Option<&str> {
        self.answer.as_ref().map(|a| a.text.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSource {
    Oracle,
    Heuristic,
    NoValidResponses,
}

impl FeedbackSource {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackSource::Oracle => "oracle",
            FeedbackSource::Heuristic => "heuristic",
            FeedbackSource::NoValidResponses => "no_valid_responses",
        }
    }
}

impl FromStr for FeedbackSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oracle" => Ok(FeedbackSource::Oracle),
            "heuristic" => Ok(FeedbackSource::Heuristic),
            "no_valid_responses" => Ok(FeedbackSource::NoValidResponses),
            other => Err(format!("unknown feedback source '{other}'")),
        }
    }
}

/// Aggregate evaluation of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFeedback {
    pub overall_score: u8,
    pub scores: Scores,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
    pub source: FeedbackSource,
    pub turns_evaluated: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterviewSession {
    pub id: Uuid,
    pub user_id: String,
    pub round: RoundKind,
    pub status: SessionStatus,
    /// Number of finalized turns.
    pub question_index: u32,
    pub target_questions: u32,
    pub created_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
    pub feedback: Option<SessionFeedback>,
}

impl InterviewSession {
    /// The emitted but not yet finalized turn, if any.
    pub fn outstanding(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .find(|t| t.number == self.question_index + 1 && !t.is_finalized())
    }

    pub fn outstanding_mut(&mut self) -> Option<&mut Turn> {
        let next = self.question_index + 1;
        self.turns
            .iter_mut()
            .find(|t| t.number == next && !t.is_finalized())
    }

    pub fn finalized_turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.is_finalized())
    }

    pub fn reached_target(&self) -> bool {
        self.question_index >= self.target_questions
    }
}
