//! Keyword tables shared by the affect parser and the composer.
//!
//! Everything here is immutable `'static` data. Entry order matters: the
//! affect parser breaks score ties by the position of the tone in
//! [`TONE_LEXICON`].

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Warm,
    Sardonic,
    Sad,
    Anxious,
    Angry,
    Neutral,
    Grateful,
    Confused,
}

impl Tone {
    pub const ALL: [Tone; 8] = [
        Tone::Warm,
        Tone::Sardonic,
        Tone::Sad,
        Tone::Anxious,
        Tone::Angry,
        Tone::Neutral,
        Tone::Grateful,
        Tone::Confused,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Warm => "warm",
            Tone::Sardonic => "sardonic",
            Tone::Sad => "sad",
            Tone::Anxious => "anxious",
            Tone::Angry => "angry",
            Tone::Neutral => "neutral",
            Tone::Grateful => "grateful",
            Tone::Confused => "confused",
        }
    }

    /// Parses a stored or user-supplied tone label. `frustrated` has no tone
    /// of its own and reads as angry.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "warm" => Some(Tone::Warm),
            "sardonic" => Some(Tone::Sardonic),
            "sad" => Some(Tone::Sad),
            "anxious" => Some(Tone::Anxious),
            "angry" | "frustrated" => Some(Tone::Angry),
            "neutral" => Some(Tone::Neutral),
            "grateful" => Some(Tone::Grateful),
            "confused" => Some(Tone::Confused),
            _ => None,
        }
    }

    pub fn entry(self) -> &'static ToneEntry {
        TONE_LEXICON
            .iter()
            .find(|entry| entry.tone == self)
            .unwrap_or(&TONE_LEXICON[NEUTRAL_INDEX])
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct ToneEntry {
    pub tone: Tone,
    pub keywords: &'static [&'static str],
    pub base_valence: f32,
    pub base_arousal: f32,
}

const NEUTRAL_INDEX: usize = 5;

pub static TONE_LEXICON: [ToneEntry; 8] = [
    ToneEntry {
        tone: Tone::Warm,
        keywords: &[
            "happy",
            "glad",
            "love",
            "joy",
            "excited",
            "wonderful",
            "amazing",
            "delighted",
            "hopeful",
            "proud",
            "lovely",
            "cheerful",
            "peaceful",
            "good day",
            "great day",
        ],
        base_valence: 0.7,
        base_arousal: 0.5,
    },
    ToneEntry {
        tone: Tone::Sardonic,
        keywords: &[
            "yeah right",
            "sure thing",
            "oh great",
            "just great",
            "obviously",
            "whatever",
            "big surprise",
            "go figure",
            "lucky me",
            "thanks a lot",
            "how convenient",
        ],
        base_valence: -0.2,
        base_arousal: 0.5,
    },
    ToneEntry {
        tone: Tone::Sad,
        keywords: &[
            "sad",
            "exhausted",
            "tired",
            "drained",
            "depressed",
            "lonely",
            "alone",
            "empty",
            "hopeless",
            "grief",
            "grieving",
            "crying",
            "heartbroken",
            "worn out",
            "miserable",
            "down",
            "hurt",
            "numb",
            "heavy",
        ],
        base_valence: -0.6,
        base_arousal: 0.3,
    },
    ToneEntry {
        tone: Tone::Anxious,
        keywords: &[
            "anxious",
            "anxiety",
            "worried",
            "worry",
            "nervous",
            "panic",
            "scared",
            "afraid",
            "overwhelmed",
            "stressed",
            "stress",
            "tension",
            "on edge",
            "dread",
            "restless",
            "uneasy",
            "freaking out",
        ],
        base_valence: -0.5,
        base_arousal: 0.7,
    },
    ToneEntry {
        tone: Tone::Angry,
        keywords: &[
            "angry",
            "furious",
            "pissed",
            "bullshit",
            "hate",
            "livid",
            "enraged",
            "annoyed",
            "frustrated",
            "frustrating",
            "irritated",
            "fed up",
            "sick of",
            "unfair",
            "ridiculous",
        ],
        base_valence: -0.7,
        base_arousal: 0.8,
    },
    ToneEntry {
        tone: Tone::Neutral,
        keywords: &[
            "okay",
            "fine",
            "alright",
            "nothing much",
            "not much",
            "normal",
            "usual",
        ],
        base_valence: 0.0,
        base_arousal: 0.2,
    },
    ToneEntry {
        tone: Tone::Grateful,
        keywords: &[
            "thank you",
            "thanks",
            "grateful",
            "appreciate",
            "thankful",
            "blessed",
        ],
        base_valence: 0.8,
        base_arousal: 0.4,
    },
    ToneEntry {
        tone: Tone::Confused,
        keywords: &[
            "confused",
            "confusing",
            "don't understand",
            "don't know",
            "no idea",
            "unsure",
            "not sure",
            "makes no sense",
            "lost",
            "unclear",
            "mixed up",
            "torn",
        ],
        base_valence: -0.2,
        base_arousal: 0.5,
    },
];

/// Words that raise arousal.
pub const INTENSIFIERS: &[&str] = &[
    "very",
    "so",
    "really",
    "extremely",
    "totally",
    "super",
    "incredibly",
    "absolutely",
    "completely",
    "utterly",
    "fucking",
    "freaking",
];

/// Tokens that negate a keyword when they appear shortly before it.
pub const NEGATIONS: &[&str] = &[
    "not", "no", "never", "don't", "doesn't", "didn't", "can't", "cannot", "won't", "isn't",
    "wasn't", "aren't", "hardly", "without",
];

pub const EXPLETIVES: &[&str] = &[
    "fuck", "fucking", "shit", "bullshit", "damn", "crap", "hell", "wtf", "pissed",
];

/// Nouns that anchor an emotional statement to something specific.
pub const CONCRETE_SUBJECTS: &[&str] = &[
    "work", "job", "project", "boss", "kids", "kid", "meeting", "husband", "wife", "partner",
    "mom", "dad", "school", "class", "exam", "deadline", "money", "rent", "car", "team",
    "client", "manager", "doctor", "family", "friend", "coworker",
];

pub const DEMONSTRATIVES: &[&str] = &["this is", "that's", "that is", "this sucks", "it's so"];

/// Words that make a short user message read as an answer rather than filler.
pub const ANSWER_EMOTION_KEYWORDS: &[&str] = &[
    "tension", "frozen", "rest", "feel", "feeling", "stress", "tired", "relief", "calm", "safe",
    "body", "sleep", "breathe", "heavy", "tight",
];

pub const COMPLAINT_PHRASES: &[&str] = &[
    "you already",
    "not helpful",
    "stop repeating",
    "already asked",
    "you keep asking",
    "same question",
];

pub const DISCLOSURE_KEYWORDS: &[&str] = &[
    "divorce",
    "separated",
    "separation",
    "co-parent",
    "coparent",
    "custody",
    "trauma",
    "loss",
    "diagnosed",
    "diagnosis",
    "passed away",
    "miscarriage",
    "laid off",
    "got fired",
    "abuse",
    "affair",
];

pub const DEFAULT_POETIC_MARKERS: &[&str] = &[
    "fullness",
    "steeped",
    "ecstatic",
    "sanctify",
    "saturat",
    "lyric",
    "luminous",
    "hallowed",
    "reverent",
    "incandescent",
    "threshold of",
    "sacred",
];

/// Lowercases and normalises apostrophes so `’` and `'` match the same keywords.
pub fn fold(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// Splits folded text into word tokens, keeping inner apostrophes and hyphens.
pub fn tokenize(folded: &str) -> Vec<&str> {
    folded
        .split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
        .map(|token| token.trim_matches(|c| c == '\'' || c == '-'))
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

/// Byte offsets of every whole-word occurrence of `needle` in `haystack`.
pub fn whole_word_positions(haystack: &str, needle: &str) -> Vec<usize> {
    if needle.is_empty() {
        return Vec::new();
    }
    let mut positions = Vec::new();
    for (start, _) in haystack.match_indices(needle) {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !is_word_char(c));
        if before_ok && after_ok {
            positions.push(start);
        }
    }
    positions
}

pub fn contains_word(haystack: &str, needle: &str) -> bool {
    !whole_word_positions(haystack, needle).is_empty()
}

pub fn contains_any_word(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| contains_word(haystack, needle))
}

pub fn count_words(haystack: &str, needles: &[&str]) -> usize {
    tokenize(haystack)
        .into_iter()
        .filter(|token| needles.contains(token))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexicon_covers_every_tone_once_in_declared_order() {
        let tones: Vec<Tone> = TONE_LEXICON.iter().map(|entry| entry.tone).collect();
        assert_eq!(tones, Tone::ALL.to_vec());
        assert_eq!(TONE_LEXICON[NEUTRAL_INDEX].tone, Tone::Neutral);
    }

    #[test]
    fn base_values_are_in_range() {
        for entry in &TONE_LEXICON {
            assert!((-1.0..=1.0).contains(&entry.base_valence));
            assert!((0.0..=1.0).contains(&entry.base_arousal));
        }
    }

    #[test]
    fn whole_word_matching_respects_boundaries() {
        let text = fold("I'm Drained, honestly. Downloaded it anyway.");
        assert!(contains_word(&text, "drained"));
        assert!(!contains_word(&text, "down"));
        assert!(contains_word(&fold("feeling down today"), "down"));
        assert!(contains_word(&fold("we're worn out"), "worn out"));
    }

    #[test]
    fn tokenize_keeps_contractions() {
        let folded = fold("I can’t even—think!!");
        assert_eq!(tokenize(&folded), vec!["i", "can't", "even", "think"]);
    }

    #[test]
    fn frustrated_reads_as_angry() {
        assert_eq!(Tone::parse("Frustrated"), Some(Tone::Angry));
        assert_eq!(Tone::parse("sad"), Some(Tone::Sad));
        assert_eq!(Tone::parse("ecstatic"), None);
    }
}
