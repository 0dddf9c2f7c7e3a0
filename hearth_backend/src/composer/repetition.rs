//! Keeps the companion from saying the same thing twice, and from asking a
//! question the user has just answered.

use super::rotator::Rotator;
use super::ResponseClass;
use crate::memory::ConversationMemory;
use crate::patterns;

const MAX_FRAGMENT_WORDS: usize = 12;
const MIN_CLAUSE_WORDS: usize = 4;
const CLAUSE_BREAKS: &[&str] = &["and", "but", "because", "so", "though"];

pub const ALTERNATES: &[&str] = &[
    "I'll stay right here with you. What feels most important to focus on right now?",
    "Let's slow down for a second. What would be most helpful to you right now?",
    "I want to make sure I'm following you. What part of this weighs on you most?",
    "We can take this one piece at a time. Where would you like to start?",
];

const PRONOUN_SWAPS: &[(&str, &str)] = &[
    ("i", "you"),
    ("i'm", "you're"),
    ("im", "you're"),
    ("i've", "you've"),
    ("i'd", "you'd"),
    ("i'll", "you'll"),
    ("me", "you"),
    ("my", "your"),
    ("mine", "yours"),
    ("myself", "yourself"),
    ("am", "are"),
    ("was", "were"),
];

/// Outcome of the guard: the reply to use and, when it changed kind, the
/// new response class.
#[derive(Debug, Clone, PartialEq)]
pub struct Guarded {
    pub reply: String,
    pub class: ResponseClass,
}

/// Restates the user's words from their side, short enough to quote back.
pub fn reflect_fragment(user_text: &str) -> String {
    let words: Vec<String> = user_text
        .split_whitespace()
        .map(|raw| {
            let trimmed =
                raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '\u{2019}');
            let folded = trimmed.to_lowercase().replace('\u{2019}', "'");
            PRONOUN_SWAPS
                .iter()
                .find(|(from, _)| *from == folded)
                .map(|(_, to)| to.to_string())
                .unwrap_or_else(|| {
                    if trimmed.chars().any(char::is_uppercase) && folded.len() > 1 {
                        trimmed.to_string()
                    } else {
                        folded
                    }
                })
        })
        .filter(|word| !word.is_empty())
        .collect();

    let mut end = words.len();
    if end > MAX_FRAGMENT_WORDS {
        end = words
            .iter()
            .enumerate()
            .skip(MIN_CLAUSE_WORDS)
            .take(MAX_FRAGMENT_WORDS - MIN_CLAUSE_WORDS + 1)
            .find(|(_, word)| CLAUSE_BREAKS.contains(&word.as_str()))
            .map_or(MAX_FRAGMENT_WORDS, |(index, _)| index);
    }
    words[..end].join(" ")
}

/// The acknowledgement used when the user has just answered a question.
pub fn acknowledgement(user_text: &str) -> String {
    let fragment = reflect_fragment(user_text);
    let fragment = if fragment.is_empty() {
        "this has been a lot".to_string()
    } else {
        fragment
    };
    format!(
        "Thanks for sharing that — it sounds like {fragment}. That makes sense given everything you're juggling. Would you like a grounding exercise or a small practical step right now?"
    )
}

/// Replaces a repeated or re-asked candidate.
///
/// Synthesis replies are only replaced when they repeat a recent reply
/// exactly. The result always differs from the previous assistant reply
/// unless the user repeated themselves verbatim.
pub fn guard(
    candidate: String,
    class: ResponseClass,
    user_text: &str,
    memory: &ConversationMemory,
    window: usize,
    rotator: &mut Rotator,
) -> Guarded {
    let recent = memory.recent_assistant_messages(window);
    let last_reply = memory.last_assistant_message();
    let normalized = patterns::normalize_for_comparison(&candidate);

    let repeats = if class == ResponseClass::Synthesis {
        recent
            .iter()
            .any(|previous| patterns::normalize_for_comparison(previous) == normalized)
    } else {
        patterns::detect_repetition(&candidate, &recent, window)
    };

    let last_clarifier = last_reply.and_then(patterns::clarifier);
    let answered_clarifier =
        last_clarifier.is_some() && patterns::looks_like_answer(user_text);
    let reasks = class != ResponseClass::Synthesis
        && last_clarifier.is_some()
        && patterns::clarifier(&candidate) == last_clarifier;

    let mut guarded = if answered_clarifier && (repeats || reasks) {
        tracing::debug!("User answered the last question; acknowledging instead of re-asking");
        Guarded {
            reply: acknowledgement(user_text),
            class: ResponseClass::Acknowledgement,
        }
    } else if repeats {
        tracing::debug!("Candidate repeats a recent reply; rotating to an alternate");
        Guarded {
            reply: alternate(rotator, &recent),
            class,
        }
    } else {
        Guarded {
            reply: candidate,
            class,
        }
    };

    let user_text_normalized = patterns::normalize_for_comparison(user_text);
    let user_repeated = memory.last_turn().is_some_and(|turn| {
        patterns::normalize_for_comparison(&turn.utterance) == user_text_normalized
    });
    if !user_repeated {
        if let Some(last) = last_reply {
            let last_normalized = patterns::normalize_for_comparison(last);
            if last_normalized == patterns::normalize_for_comparison(&guarded.reply) {
                let mut avoid = recent.clone();
                avoid.push(last.to_string());
                guarded.reply = alternate(rotator, &avoid);
            }
        }
    }
    guarded
}

fn alternate(rotator: &mut Rotator, recent: &[String]) -> String {
    rotator
        .pick(ALTERNATES, recent)
        .unwrap_or(ALTERNATES[0])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::AffectParser;
    use crate::memory::Turn;

    fn memory_with(turns: &[(&str, &str)]) -> ConversationMemory {
        let parser = AffectParser::new();
        let mut memory = ConversationMemory::new();
        for (user, reply) in turns {
            memory.add_turn(Turn::new(
                *user,
                parser.analyze(user),
                None,
                *reply,
                ResponseClass::GlyphGrounded,
            ));
        }
        memory
    }

    #[test]
    fn fragment_swaps_pronouns_and_stops_at_a_clause() {
        assert_eq!(
            reflect_fragment("I just want the tension in my body to melt and to feel some relief"),
            "you just want the tension in your body to melt"
        );
        assert_eq!(reflect_fragment("I'm tired."), "you're tired");
    }

    #[test]
    fn answered_question_gets_acknowledged() {
        let memory = memory_with(&[(
            "I'm overwhelmed",
            "That sounds like a lot at once. What would help you feel a little lighter?",
        )]);
        let mut rotator = Rotator::seeded(1);
        let guarded = guard(
            "What would help you feel a little lighter?".to_string(),
            ResponseClass::GlyphGrounded,
            "I just want the tension in my body to melt and to feel some relief",
            &memory,
            5,
            &mut rotator,
        );
        assert_eq!(guarded.class, ResponseClass::Acknowledgement);
        assert!(guarded.reply.contains("you just want the tension in your body to melt"));
        assert!(!guarded.reply.contains("lighter"));
    }

    #[test]
    fn fresh_question_after_an_answer_is_kept() {
        let memory = memory_with(&[("hello", "I'm listening. What's on your mind today?")]);
        let mut rotator = Rotator::seeded(1);
        let candidate = "That sounds so heavy. What's been draining you the most?";
        let guarded = guard(
            candidate.to_string(),
            ResponseClass::GlyphGrounded,
            "I'm so exhausted I can't even think straight today",
            &memory,
            5,
            &mut rotator,
        );
        assert_eq!(guarded.class, ResponseClass::GlyphGrounded);
        assert_eq!(guarded.reply, candidate);
    }

    #[test]
    fn same_clarifier_behind_a_new_opening_is_acknowledged() {
        let memory = memory_with(&[(
            "I can't switch off at night",
            "That sounds tiring. What would it look like if you could rest?",
        )]);
        let mut rotator = Rotator::seeded(1);
        let guarded = guard(
            "I hear how worn down you are. What would it look like if you could rest?".to_string(),
            ResponseClass::GlyphGrounded,
            "I just want the tension in my body to melt and to feel some relief",
            &memory,
            5,
            &mut rotator,
        );
        assert_eq!(guarded.class, ResponseClass::Acknowledgement);
        assert!(guarded.reply.contains("you just want the tension in your body to melt"));
    }

    #[test]
    fn repeats_rotate_to_an_alternate() {
        let memory = memory_with(&[("ok", "I'm listening. What's on your mind today?")]);
        let mut rotator = Rotator::seeded(3);
        let guarded = guard(
            "I'm listening. What's on your mind today?".to_string(),
            ResponseClass::Reflective,
            "ok",
            &memory,
            5,
            &mut rotator,
        );
        assert!(ALTERNATES.contains(&guarded.reply.as_str()));
        assert_eq!(guarded.class, ResponseClass::Reflective);
    }

    #[test]
    fn synthesis_survives_containment_but_not_exact_repeats() {
        let memory = memory_with(&[("work again", "Earlier you mentioned work. How does that connect?")]);
        let mut rotator = Rotator::seeded(5);
        let kept = guard(
            "Earlier you mentioned work. How does that connect? And what else?".to_string(),
            ResponseClass::Synthesis,
            "it is all work",
            &memory,
            5,
            &mut rotator,
        );
        assert_eq!(kept.class, ResponseClass::Synthesis);
        assert!(kept.reply.starts_with("Earlier you mentioned work."));

        let replaced = guard(
            "Earlier you mentioned work. How does that connect?".to_string(),
            ResponseClass::Synthesis,
            "it is all work",
            &memory,
            5,
            &mut rotator,
        );
        assert_ne!(replaced.reply, "Earlier you mentioned work. How does that connect?");
    }
}
