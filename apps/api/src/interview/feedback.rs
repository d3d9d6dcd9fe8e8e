//! Local fallbacks for end-of-session feedback.
//!
//! Used when there is nothing worth sending to the oracle, or when the oracle
//! is unavailable. Both are pure functions of the finalized turns, so repeated
//! calls give identical results.

use super::oracle::FeedbackReport;
use super::round::RoundKind;
use super::session::{FeedbackSource, Scores, SessionFeedback, Turn};
use crate::classifier::NO_ANSWER;

pub const NO_VALID_RESPONSES_SUMMARY: &str = "Interview ended early with no valid responses.";

/// Words an answer needs (longer than two characters) to count as valid.
const MIN_SUBSTANTIVE_WORDS: usize = 3;
/// Average answer length treated as full depth by the heuristic.
const FULL_DEPTH_WORDS: f64 = 60.0;

pub fn is_valid_answer(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text == NO_ANSWER {
        return false;
    }
    text.split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .count()
        >= MIN_SUBSTANTIVE_WORDS
}

pub fn valid_answers<'a>(turns: &'a [Turn]) -> impl Iterator<Item = &'a str> {
    turns
        .iter()
        .filter(|t| t.is_finalized())
        .filter_map(Turn::answer_text)
        .filter(|a| is_valid_answer(a))
}

pub fn no_valid_responses(round: RoundKind, turns_evaluated: u32) -> SessionFeedback {
    SessionFeedback {
        overall_score: 0,
        scores: Scores::zeroed(round),
        strengths: Vec::new(),
        improvements: vec![
            "Answer each question out loud; silent or unclear responses cannot be evaluated."
                .to_string(),
        ],
        recommendations: vec![
            "Check your microphone before starting and retake the interview.".to_string(),
        ],
        summary: NO_VALID_RESPONSES_SUMMARY.to_string(),
        source: FeedbackSource::NoValidResponses,
        turns_evaluated,
    }
}

/// Summary built only from counts and lengths of valid answers.
pub fn heuristic(round: RoundKind, turns: &[Turn], target: u32) -> SessionFeedback {
    let finalized = turns.iter().filter(|t| t.is_finalized()).count() as u32;
    let lengths: Vec<usize> = valid_answers(turns)
        .map(|a| a.split_whitespace().count())
        .collect();

    if lengths.is_empty() {
        return no_valid_responses(round, finalized);
    }

    let valid = lengths.len() as f64;
    let coverage = (valid / target.max(1) as f64).min(1.0);
    let avg_words = lengths.iter().sum::<usize>() as f64 / valid;
    let depth = (avg_words / FULL_DEPTH_WORDS).min(1.0);
    let overall = (100.0 * (0.6 * coverage + 0.4 * depth)).round().clamp(0.0, 100.0) as u8;

    let mut strengths = Vec::new();
    let mut improvements = Vec::new();
    if coverage >= 0.8 {
        strengths.push("Answered nearly every question.".to_string());
    } else {
        improvements.push(format!(
            "Only {} of {target} questions received a usable answer.",
            lengths.len()
        ));
    }
    if depth >= 0.5 {
        strengths.push("Answers were developed in reasonable detail.".to_string());
    } else {
        improvements.push("Answers were brief; expand with concrete examples.".to_string());
    }

    SessionFeedback {
        overall_score: overall,
        scores: Scores::uniform(round, overall),
        strengths,
        improvements,
        recommendations: vec![
            "Retake the interview once detailed AI feedback is available.".to_string(),
        ],
        summary: format!(
            "Estimated from {} valid answers out of {finalized} questions \
             (average {avg_words:.0} words). Detailed evaluation was unavailable.",
            lengths.len()
        ),
        source: FeedbackSource::Heuristic,
        turns_evaluated: finalized,
    }
}

pub fn from_report(report: FeedbackReport, turns_evaluated: u32) -> SessionFeedback {
    SessionFeedback {
        overall_score: report.overall_score,
        scores: report.scores,
        strengths: report.strengths,
        improvements: report.improvements,
        recommendations: report.recommendations,
        summary: report.summary,
        source: FeedbackSource::Oracle,
        turns_evaluated,
    }
}
