// Fixed vocabularies used by the transcript rules.
// Entries are lowercase. Multi-word entries are matched on word boundaries.

/// Sign-offs speech recognition produces when it hears background video audio.
pub const GARBAGE_PHRASES: &[&str] = &[
    "thanks for watching",
    "thank you for watching",
    "thank you so much for watching",
    "thanks for listening",
    "thank you for listening",
    "please subscribe",
    "like and subscribe",
    "don't forget to subscribe",
    "subscribe to my channel",
    "see you in the next video",
    "see you next time",
    "bye bye",
    "bye-bye",
];

/// Acknowledgements and hesitation sounds that are never an answer on their own.
pub const FILLER_WORDS: &[&str] = &[
    "um", "umm", "uh", "uhh", "uh-huh", "hmm", "hm", "mm", "mmm", "mhm", "mm-hmm", "ah", "ahh",
    "oh", "er", "erm", "eh", "okay", "ok", "alright", "right", "so", "well", "like", "huh",
];

/// Farewells and meta-commentary about recording or testing.
pub const HALLUCINATED_PATTERNS: &[&str] = &[
    r"^(?:bye|goodbye|good bye)\b",
    r"^thank you(?: very much| so much)?$",
    r"\bsee you (?:later|soon|tomorrow|next week)\b",
    r"\bhave a (?:nice|great|good|wonderful) (?:day|one|night|evening|weekend)\b",
    r"\b(?:this is|just) (?:a )?test(?:ing)?\b",
    r"\btesting,? (?:one|1),? (?:two|2)\b",
    r"\bis (?:this|it) (?:recording|working|on)\b",
    r"\b(?:recording|transcription) (?:by|provided by)\b",
    r"\bi(?:'ll| will) see you\b",
];

/// Web addresses and subtitle credits.
pub const URL_CAPTION_PATTERNS: &[&str] = &[
    r"https?://",
    r"\bwww\.",
    // Bare hostnames only count with a path or standing alone; library
    // names like socket.io and asp.net appear mid-sentence in real answers.
    r"\b[a-z0-9-]+\.(?:com|org|net|tv)/",
    r"^\W*[a-z0-9-]+\.(?:com|org|net|io|tv|co|ly)\W*$",
    r"\b(?:subtitles?|captions?|translation)s? (?:by|provided by|created by|made by)\b",
    r"\b(?:transcribed|translated|subtitled) by\b",
    r"\bamara\b",
];

/// Video/streaming chatter. Entries are phrases so single technical words
/// ("channel", "subscribe", "video") never count. Two or more hits reject.
pub const IRRELEVANT_PHRASES: &[&str] = &[
    "subscribe to my channel",
    "subscribe to our channel",
    "this video",
    "next video",
    "last video",
    "the like button",
    "notification bell",
    "comment below",
    "comments below",
    "link in the description",
    "this episode",
    "next episode",
    "today's sponsor",
    "sponsored by",
    "patreon",
];

/// Ambient-audio descriptors. Two or more hits describe sound, not speech.
pub const AMBIENT_AUDIO_TERMS: &[&str] = &[
    "music",
    "song",
    "melody",
    "instrumental",
    "humming",
    "whistling",
    "applause",
    "background noise",
    "static",
    "silence",
    "lyrics",
    "chorus",
    "tune",
    "beat",
    "singing",
];

/// Nouns that turn "playing" into an audio description.
pub const SOUND_NOUNS: &[&str] = &[
    "music", "song", "sound", "melody", "tune", "track", "audio", "radio",
];

/// Bracket contents that mark a stage direction rather than speech.
pub const STAGE_DIRECTION_TERMS: &[&str] = &[
    "music",
    "applause",
    "laughs",
    "laughter",
    "silence",
    "noise",
    "sound",
    "playing",
    "singing",
    "inaudible",
    "coughs",
    "sighs",
    "background",
    "static",
    "blank_audio",
];

/// Song fragments recognition emits for background music.
pub const SONG_FRAGMENTS: &[&str] = &[
    "twinkle twinkle little star",
    "twinkle, twinkle",
    "happy birthday to you",
    "never gonna give you up",
    "baby shark",
    "row row row your boat",
    "jingle bells",
    "la la la",
    "na na na",
];

/// Words that make a transcript plausibly an interview answer.
pub const RELEVANCE_TERMS: &[&str] = &[
    "i", "i'm", "i've", "i'd", "i'll", "my", "me", "we", "our", "us", "experience", "project",
    "projects", "team", "work", "worked", "working", "job", "role", "company", "skill", "skills",
    "develop", "developed", "developer", "build", "built", "design", "designed", "manage",
    "managed", "lead", "led", "learn", "learned", "problem", "solution", "customer", "client",
    "code", "system", "data", "goal", "challenge", "responsible", "responsibility", "achieve",
    "achieved", "because", "example", "situation", "task", "result", "strength", "weakness",
    "career", "internship", "university", "degree", "technology",
];
