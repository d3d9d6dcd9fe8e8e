use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Interview category. Each round has a fixed question target and its own
/// scoring dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    Technical,
    Coding,
    Hr,
    Star,
}

/// Dimension every round reports alongside its own.
pub const OVERALL: &str = "overall";

/// Fixed HR openers, served without calling the model.
const HR_WARMUPS: [&str; 3] = [
    "Tell me about yourself.",
    "Why are you interested in this position?",
    "What are your career goals?",
];

impl RoundKind {
    pub const ALL: [RoundKind; 4] = [
        RoundKind::Technical,
        RoundKind::Coding,
        RoundKind::Hr,
        RoundKind::Star,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoundKind::Technical => "technical",
            RoundKind::Coding => "coding",
            RoundKind::Hr => "hr",
            RoundKind::Star => "star",
        }
    }

    pub fn target_questions(self) -> u32 {
        match self {
            RoundKind::Coding => 5,
            RoundKind::Technical | RoundKind::Hr | RoundKind::Star => 10,
        }
    }

    /// Round-specific scoring dimensions, excluding `overall`.
    pub fn dimensions(self) -> &'static [&'static str] {
        match self {
            RoundKind::Technical => &["relevance", "technical_accuracy", "communication"],
            RoundKind::Coding => &["correctness", "problem_solving", "communication"],
            RoundKind::Hr => &["communication", "cultural_fit", "motivation", "clarity"],
            RoundKind::Star => &["situation", "task", "action", "result"],
        }
    }

    /// Warm-up question for a 1-based question number, if the round has one.
    pub fn warmup_question(self, number: u32) -> Option<&'static str> {
        match self {
            RoundKind::Hr => number
                .checked_sub(1)
                .and_then(|i| HR_WARMUPS.get(i as usize))
                .copied(),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            RoundKind::Technical => "technical",
            RoundKind::Coding => "coding",
            RoundKind::Hr => "HR",
            RoundKind::Star => "behavioral (STAR)",
        }
    }
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown interview round '{0}'")]
pub struct UnknownRound(pub String);

impl FromStr for RoundKind {
    type Err = UnknownRound;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoundKind::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownRound(s.to_string()))
    }
}
