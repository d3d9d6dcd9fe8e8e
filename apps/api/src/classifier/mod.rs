//! Transcript Classifier. Decides whether a speech-to-text transcript is a
//! genuine interview answer or must be recorded as the "No Answer" sentinel.
//!
//! Speech recognition run against silence or background media reliably
//! produces plausible but contentless text (video sign-offs, lyrics, stage
//! directions). Those transcripts are rejected here, before they reach scoring.
//!
//! The classifier never fails: anything it cannot make sense of is `NoAnswer(Empty)`.

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod rules;
mod vocabulary;

use rules::{TranscriptView, RULES};

/// The literal persisted in place of an unusable transcript.
pub const NO_ANSWER: &str = "No Answer";

/// Why a transcript was rejected. Diagnostics only; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoAnswerReason {
    Empty,
    GarbagePhrase,
    Filler,
    TooShort,
    Hallucinated,
    UrlOrCaption,
    MultipleIrrelevant,
    Parenthetical,
    AudioDescription,
    SongReference,
    NoRelevance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Valid(String),
    NoAnswer(NoAnswerReason),
}

impl Classification {
    pub fn is_no_answer(&self) -> bool {
        matches!(self, Classification::NoAnswer(_))
    }

    pub fn reason(&self) -> Option<NoAnswerReason> {
        match self {
            Classification::NoAnswer(reason) => Some(*reason),
            Classification::Valid(_) => None,
        }
    }

    /// The value that is persisted and sent to the scoring oracle.
    pub fn stored_text(&self) -> &str {
        match self {
            Classification::Valid(text) => text,
            Classification::NoAnswer(_) => NO_ANSWER,
        }
    }
}

/// Serializable summary used by the speech preview endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationView {
    pub is_no_answer: bool,
    pub reason: Option<NoAnswerReason>,
    pub stored_text: String,
}

impl From<&Classification> for ClassificationView {
    fn from(c: &Classification) -> Self {
        Self {
            is_no_answer: c.is_no_answer(),
            reason: c.reason(),
            stored_text: c.stored_text().to_string(),
        }
    }
}

/// Classifies a raw transcript. `None` is treated as an empty capture.
pub fn classify(raw: Option<&str>) -> Classification {
    let cleaned = raw.unwrap_or_default().trim();
    let view = TranscriptView::new(cleaned);

    match RULES.iter().find(|rule| rule.matches(&view)) {
        Some(rule) => {
            debug!(rule = rule.name, chars = cleaned.len(), "transcript rejected");
            Classification::NoAnswer(rule.reason)
        }
        None => Classification::Valid(cleaned.to_string()),
    }
}
