//! Ordered rule table for transcript classification.
//!
//! Each rule is a named predicate over a pre-normalised view of the transcript.
//! Rules are evaluated top to bottom and the first hit wins; later rules may
//! assume every earlier rule returned `false`.

use std::sync::LazyLock;

use regex::Regex;

use super::vocabulary::{
    AMBIENT_AUDIO_TERMS, FILLER_WORDS, GARBAGE_PHRASES, HALLUCINATED_PATTERNS,
    IRRELEVANT_PHRASES, RELEVANCE_TERMS, SONG_FRAGMENTS, SOUND_NOUNS, STAGE_DIRECTION_TERMS,
    URL_CAPTION_PATTERNS,
};
use super::{NoAnswerReason, NO_ANSWER};

/// Minimum character count of an acceptable answer.
const MIN_ANSWER_CHARS: usize = 3;
/// Transcripts longer than this must show some interview relevance.
const RELEVANCE_CHECK_MIN_CHARS: usize = 20;

/// Pre-computed forms of one transcript shared by every rule.
#[derive(Debug)]
pub struct TranscriptView<'a> {
    /// Input with surrounding whitespace removed.
    pub cleaned: &'a str,
    /// `cleaned`, lowercased.
    pub lower: String,
    /// `lower` with surrounding punctuation stripped and whitespace collapsed.
    pub normalized: String,
}

impl<'a> TranscriptView<'a> {
    pub fn new(cleaned: &'a str) -> Self {
        let lower = cleaned.to_lowercase();
        let normalized = lower
            .trim_matches(|c: char| c.is_whitespace() || is_edge_punctuation(c))
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            cleaned,
            lower,
            normalized,
        }
    }

    fn is_single_token(&self) -> bool {
        !self.normalized.is_empty() && !self.normalized.contains(' ')
    }
}

fn is_edge_punctuation(c: char) -> bool {
    matches!(
        c,
        '.' | ',' | '!' | '?' | ';' | ':' | '"' | '\'' | '…' | '-' | '“' | '”'
    )
}

/// A single classification rule.
pub struct Rule {
    pub name: &'static str,
    pub reason: NoAnswerReason,
    check: fn(&TranscriptView<'_>) -> bool,
}

impl Rule {
    pub fn matches(&self, view: &TranscriptView<'_>) -> bool {
        (self.check)(view)
    }
}

/// The rule table, in priority order.
pub static RULES: &[Rule] = &[
    Rule {
        name: "empty",
        reason: NoAnswerReason::Empty,
        check: is_empty,
    },
    Rule {
        name: "garbage_phrase",
        reason: NoAnswerReason::GarbagePhrase,
        check: is_garbage_phrase,
    },
    Rule {
        name: "filler",
        reason: NoAnswerReason::Filler,
        check: is_filler,
    },
    Rule {
        name: "too_short",
        reason: NoAnswerReason::TooShort,
        check: is_too_short,
    },
    Rule {
        name: "hallucinated",
        reason: NoAnswerReason::Hallucinated,
        check: is_hallucinated,
    },
    Rule {
        name: "url_or_caption",
        reason: NoAnswerReason::UrlOrCaption,
        check: is_url_or_caption,
    },
    Rule {
        name: "multiple_irrelevant",
        reason: NoAnswerReason::MultipleIrrelevant,
        check: has_multiple_irrelevant,
    },
    Rule {
        name: "parenthetical",
        reason: NoAnswerReason::Parenthetical,
        check: has_stage_direction,
    },
    Rule {
        name: "audio_description",
        reason: NoAnswerReason::AudioDescription,
        check: is_audio_description,
    },
    Rule {
        name: "song_reference",
        reason: NoAnswerReason::SongReference,
        check: is_song_reference,
    },
    Rule {
        name: "no_relevance",
        reason: NoAnswerReason::NoRelevance,
        check: lacks_relevance,
    },
];

// ────────────────────────────────────────────────────────────────────────────
// Compiled vocabularies
// ────────────────────────────────────────────────────────────────────────────

fn alternation(words: &[&str]) -> String {
    words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|")
}

fn word_set(words: &[&str]) -> Regex {
    Regex::new(&format!(r"\b(?:{})\b", alternation(words))).expect("valid regex")
}

static GARBAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alt = alternation(GARBAGE_PHRASES);
    Regex::new(&format!(r"^(?:{alt})(?:\W|$)|(?:^|\W)(?:{alt})$")).expect("valid regex")
});

static HALLUCINATED_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    HALLUCINATED_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
});

static URL_CAPTION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    URL_CAPTION_PATTERNS
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
});

static IRRELEVANT_RE: LazyLock<Regex> = LazyLock::new(|| word_set(IRRELEVANT_PHRASES));
static AMBIENT_RE: LazyLock<Regex> = LazyLock::new(|| word_set(AMBIENT_AUDIO_TERMS));
static SOUND_NOUN_RE: LazyLock<Regex> = LazyLock::new(|| word_set(SOUND_NOUNS));
static PLAYING_RE: LazyLock<Regex> = LazyLock::new(|| word_set(&["playing"]));
static RELEVANCE_RE: LazyLock<Regex> = LazyLock::new(|| word_set(RELEVANCE_TERMS));

/// Whole transcript wrapped in brackets or asterisks.
static WRAPPED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[\(\[\*].*[\)\]\*]\s*$").expect("valid regex"));

/// A bracketed or starred segment naming an ambient sound.
static STAGE_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alt = alternation(STAGE_DIRECTION_TERMS);
    Regex::new(&format!(
        r"[\(\[\*][^\)\]\*]*\b(?:{alt})\b[^\)\]\*]*[\)\]\*]"
    ))
    .expect("valid regex")
});

// ────────────────────────────────────────────────────────────────────────────
// Predicates
// ────────────────────────────────────────────────────────────────────────────

fn is_empty(view: &TranscriptView<'_>) -> bool {
    view.cleaned.is_empty() || view.cleaned == NO_ANSWER
}

fn is_garbage_phrase(view: &TranscriptView<'_>) -> bool {
    GARBAGE_RE.is_match(&view.normalized)
}

fn is_filler(view: &TranscriptView<'_>) -> bool {
    view.is_single_token() && FILLER_WORDS.contains(&view.normalized.as_str())
}

fn is_too_short(view: &TranscriptView<'_>) -> bool {
    view.cleaned.chars().count() < MIN_ANSWER_CHARS
}

fn is_hallucinated(view: &TranscriptView<'_>) -> bool {
    HALLUCINATED_RES.iter().any(|re| re.is_match(&view.normalized))
}

fn is_url_or_caption(view: &TranscriptView<'_>) -> bool {
    URL_CAPTION_RES.iter().any(|re| re.is_match(&view.lower))
}

fn has_multiple_irrelevant(view: &TranscriptView<'_>) -> bool {
    IRRELEVANT_RE.find_iter(&view.lower).count() >= 2
}

fn has_stage_direction(view: &TranscriptView<'_>) -> bool {
    WRAPPED_RE.is_match(view.cleaned) || STAGE_SEGMENT_RE.is_match(&view.lower)
}

fn is_audio_description(view: &TranscriptView<'_>) -> bool {
    if AMBIENT_RE.find_iter(&view.lower).count() >= 2 {
        return true;
    }
    if PLAYING_RE.is_match(&view.lower) && SOUND_NOUN_RE.is_match(&view.lower) {
        return true;
    }
    view.normalized.starts_with("playing") || view.normalized.ends_with("playing")
}

fn is_song_reference(view: &TranscriptView<'_>) -> bool {
    SONG_FRAGMENTS.iter().any(|s| view.lower.contains(s))
}

fn lacks_relevance(view: &TranscriptView<'_>) -> bool {
    view.cleaned.chars().count() > RELEVANCE_CHECK_MIN_CHARS
        && !RELEVANCE_RE.is_match(&view.lower)
        && AMBIENT_RE.is_match(&view.lower)
}
