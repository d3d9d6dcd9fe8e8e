// Prompts for the LLM-backed interview oracle. Every prompt asks for a single
// JSON object matching the output structs in llm_oracle.rs.

use std::fmt::Write;

use super::oracle::{FeedbackRequest, NextQuestionRequest, ScoreRequest};
use super::profile::Profile;
use super::round::RoundKind;
use super::session::Turn;

pub const INTERVIEWER_SYSTEM: &str = "You are an experienced interviewer running a spoken mock \
    interview. Questions are read aloud, so keep each one to one or two sentences with no \
    lists, code blocks or markdown. Never repeat a question already asked.";

pub const EVALUATOR_SYSTEM: &str = "You are a fair, demanding interview evaluator. Score only \
    what the candidate actually said. Short answers can be correct; vague or off-topic answers \
    score low.";

fn round_focus(round: RoundKind) -> &'static str {
    match round {
        RoundKind::Technical => {
            "Probe fundamentals and depth in the candidate's stated skills and past projects."
        }
        RoundKind::Coding => {
            "Ask problem-solving questions the candidate can reason through verbally: approach, \
             complexity, edge cases."
        }
        RoundKind::Hr => {
            "Ask about motivation, teamwork, conflict, strengths and weaknesses, and culture fit."
        }
        RoundKind::Star => {
            "Ask behavioral questions that invite a Situation, Task, Action, Result answer."
        }
    }
}

fn profile_block(profile: &Profile) -> String {
    let mut out = String::new();
    if let Some(name) = &profile.name {
        let _ = writeln!(out, "Name: {name}");
    }
    if let Some(role) = &profile.target_role {
        let _ = writeln!(out, "Target role: {role}");
    }
    if !profile.skills.is_empty() {
        let _ = writeln!(out, "Skills: {}", profile.skills.join(", "));
    }
    if let Some(summary) = &profile.experience_summary {
        let _ = writeln!(out, "Experience: {summary}");
    }
    if out.is_empty() {
        out.push_str("(no profile details available)\n");
    }
    out
}

fn history_block(turns: &[Turn]) -> String {
    if turns.is_empty() {
        return "(none yet)\n".to_string();
    }
    let mut out = String::new();
    for turn in turns {
        let _ = writeln!(
            out,
            "Q{}: {}\nA{}: {}",
            turn.number,
            turn.question,
            turn.number,
            turn.answer_text().unwrap_or("(unanswered)")
        );
    }
    out
}

fn dimensions_schema(round: RoundKind) -> String {
    round
        .dimensions()
        .iter()
        .chain(std::iter::once(&"overall"))
        .map(|d| format!("\"{d}\": <0-100>"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn next_question_prompt(req: &NextQuestionRequest<'_>) -> String {
    let last = req
        .last_answer
        .map(|a| format!("The candidate just answered: \"{a}\"\n"))
        .unwrap_or_default();
    format!(
        "Conduct question {number} of {target} in a {round} interview.\n\
         {focus}\n\n\
         CANDIDATE PROFILE:\n{profile}\n\
         CONVERSATION SO FAR:\n{history}\n\
         {last}\
         If the conversation has already covered enough ground to evaluate the candidate, you \
         may end the interview early.\n\n\
         Respond with JSON: {{\"question\": \"<next question>\", \"interview_complete\": false}}",
        number = req.number,
        target = req.target,
        round = req.round.display_name(),
        focus = round_focus(req.round),
        profile = profile_block(req.profile),
        history = history_block(req.history),
    )
}

pub fn score_prompt(req: &ScoreRequest<'_>) -> String {
    format!(
        "Evaluate this answer from a {round} interview.\n\n\
         QUESTION {number}: {question}\n\
         ANSWER: {answer}\n\
         RESPONSE TIME: {secs:.0} seconds\n\n\
         Respond with JSON: {{\"scores\": {{{schema}}}, \
         \"feedback\": \"<two sentences for the candidate>\", \
         \"followup\": \"<one short spoken remark before the next question, or null>\"}}",
        round = req.round.display_name(),
        number = req.question_number,
        question = req.question,
        answer = req.answer,
        secs = req.response_time_secs,
        schema = dimensions_schema(req.round),
    )
}

pub fn feedback_prompt(req: &FeedbackRequest<'_>) -> String {
    format!(
        "Write the final evaluation of a {round} interview.\n\n\
         CANDIDATE PROFILE:\n{profile}\n\
         TRANSCRIPT:\n{history}\n\
         Answers recorded as \"No Answer\" were silent or unusable and must count against the \
         candidate.\n\n\
         Respond with JSON: {{\"overall_score\": <0-100>, \"scores\": {{{schema}}}, \
         \"strengths\": [\"...\"], \"improvements\": [\"...\"], \"recommendations\": [\"...\"], \
         \"summary\": \"<one paragraph>\"}}",
        round = req.round.display_name(),
        profile = profile_block(req.profile),
        history = history_block(req.turns),
        schema = dimensions_schema(req.round),
    )
}
