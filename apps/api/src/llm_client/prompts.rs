// Prompt fragments shared by every caller of the LLM client. Callers keep
// their own prompts.rs next to them.

/// Appended to every system prompt; replies are parsed as one JSON object.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with a single valid JSON object. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";
