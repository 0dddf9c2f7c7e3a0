//! Detection of emotionally loud but contextually empty messages, and the
//! open questions used to answer them.

use crate::lexicon::{
    self, Tone, CONCRETE_SUBJECTS, DEMONSTRATIVES, EXPLETIVES, INTENSIFIERS,
};

pub const MIN_AROUSAL: f32 = 0.6;
const MAX_SHORT_WORDS: usize = 5;

/// True when the message is charged (high arousal, negative tone) but says
/// nothing about what caused it.
pub fn is_vague_high_emotion(utterance: &str, tone: Tone, arousal: f32) -> bool {
    if arousal < MIN_AROUSAL {
        return false;
    }
    if !matches!(tone, Tone::Angry | Tone::Anxious | Tone::Sad | Tone::Confused) {
        return false;
    }
    let folded = lexicon::fold(utterance);
    if lexicon::contains_any_word(&folded, CONCRETE_SUBJECTS) {
        return false;
    }
    let tokens = lexicon::tokenize(&folded);
    let charged = lexicon::contains_any_word(&folded, EXPLETIVES)
        || lexicon::count_words(&folded, INTENSIFIERS) >= 2;
    let short_and_charged = tokens.len() <= MAX_SHORT_WORDS && charged;
    let demonstrative = DEMONSTRATIVES.iter().any(|d| folded.contains(d));
    short_and_charged || demonstrative
}

/// Open questions that do not guess at a cause.
pub fn curiosity_bank(tone: Tone) -> &'static [&'static str] {
    match tone {
        Tone::Angry | Tone::Sardonic => &[
            "Oh yeah? What's got you heated?",
            "Whoa, okay. What happened?",
            "Sounds like something really got under your skin. What's going on?",
        ],
        Tone::Anxious => &[
            "Sounds like something's got you on edge. What's happening?",
            "Okay, I'm here. What's going on right now?",
        ],
        Tone::Sad => &[
            "Oh no. What happened?",
            "That sounds rough. What's going on?",
        ],
        Tone::Confused => &[
            "Wait, what's going on?",
            "Hmm, what happened?",
        ],
        _ => &["What's going on?"],
    }
}
