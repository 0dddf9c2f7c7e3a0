//! Text patterns used across the pipeline: repetition, commitments, themes,
//! disclosures, complaints and rejections.
//!
//! All functions here are pure and operate on raw user or assistant text.

use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::lexicon::{self, ANSWER_EMOTION_KEYWORDS, COMPLAINT_PHRASES, DISCLOSURE_KEYWORDS};

/// Shortest normalised text that counts for containment matching.
const MIN_CONTAINMENT_LEN: usize = 12;
const MAX_COMMITMENT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    FamilyConflict,
    WorkStress,
    RelationshipTension,
    Anxiety,
    GriefLoss,
}

impl Theme {
    pub const ALL: [Theme; 5] = [
        Theme::FamilyConflict,
        Theme::WorkStress,
        Theme::RelationshipTension,
        Theme::Anxiety,
        Theme::GriefLoss,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Theme::FamilyConflict => "family_conflict",
            Theme::WorkStress => "work_stress",
            Theme::RelationshipTension => "relationship_tension",
            Theme::Anxiety => "anxiety",
            Theme::GriefLoss => "grief_loss",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Theme::ALL
            .into_iter()
            .find(|theme| theme.as_str() == raw.trim().to_ascii_lowercase())
    }

    /// Human phrasing used in reflections and narratives.
    pub fn label(self) -> &'static str {
        match self {
            Theme::FamilyConflict => "things with your family",
            Theme::WorkStress => "the pressure at work",
            Theme::RelationshipTension => "tension in your relationship",
            Theme::Anxiety => "anxiety",
            Theme::GriefLoss => "grief and loss",
        }
    }

    fn pattern(self) -> &'static str {
        match self {
            Theme::FamilyConflict => {
                r"(?i)\b(family|mom|mother|dad|father|parents?|siblings?|brother|sister|kids?|children|son|daughter|co-?parent\w*|custody)\b"
            }
            Theme::WorkStress => {
                r"(?i)\b(work|job|boss|deadlines?|meetings?|projects?|office|coworkers?|manager|career|shift)\b"
            }
            Theme::RelationshipTension => {
                r"(?i)\b(partner|husband|wife|boyfriend|girlfriend|marriage|divorce|separated|relationship|breakup|break up)\b"
            }
            Theme::Anxiety => {
                r"(?i)\b(anxious|anxiety|panic\w*|worr(y|ied|ying)|nervous|on edge|overthink\w*)\b"
            }
            Theme::GriefLoss => {
                r"(?i)\b(grief|grieving|loss|lost (my|our)|passed away|died|funeral|miss (him|her|them))\b"
            }
        }
    }
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Explicit,
    Implicit,
}

const EXPLICIT_REJECTIONS: &[&str] = &[
    "that's not it",
    "that's not what",
    "not really",
    "not quite",
    "that's wrong",
    "you're wrong",
    "you got it wrong",
    "not what i meant",
    "doesn't fit",
    "it's more",
];

const IMPLICIT_REJECTIONS: &[&str] = &[
    "kind of",
    "sort of",
    "i guess",
    "maybe",
    "it's more",
    "more like",
    "partly",
    "not exactly",
];

const CLARIFIER_OPENERS: &[&str] = &[
    "what",
    "can you",
    "could you",
    "how",
    "which",
    "where",
    "when",
    "who",
    "tell me",
    "is there",
    "want to tell me",
];

fn theme_patterns() -> &'static [(Theme, Regex)] {
    static PATTERNS: OnceLock<Vec<(Theme, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        Theme::ALL
            .into_iter()
            .filter_map(|theme| match Regex::new(theme.pattern()) {
                Ok(re) => Some((theme, re)),
                Err(e) => {
                    tracing::warn!("Theme pattern for {} failed to compile: {}", theme, e);
                    None
                }
            })
            .collect()
    })
}

fn commitment_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(i'll try|i'll|i will|i can|let's try)\b[^.!?]*").ok())
        .as_ref()
}

/// Lowercase, drop punctuation, collapse whitespace.
pub fn normalize_for_comparison(text: &str) -> String {
    let folded = lexicon::fold(text);
    folded
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn same_or_contained(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.len() >= MIN_CONTAINMENT_LEN && long.contains(short)
}

/// True when `candidate` matches, or is contained in, one of the last
/// `window` entries of `recent` (oldest first).
pub fn detect_repetition(candidate: &str, recent: &[String], window: usize) -> bool {
    let candidate = normalize_for_comparison(candidate);
    let start = recent.len().saturating_sub(window);
    recent[start..]
        .iter()
        .any(|previous| same_or_contained(&candidate, &normalize_for_comparison(previous)))
}

/// Commitment phrases found in assistant text, in order of appearance.
pub fn extract_commitments(reply: &str) -> Vec<String> {
    let Some(re) = commitment_pattern() else {
        return Vec::new();
    };
    let mut found: Vec<String> = Vec::new();
    for caps in re.captures_iter(reply) {
        let (Some(m), Some(starter)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // `\b` also matches before an apostrophe, so "i can" would catch "I can't".
        if reply[starter.end()..].starts_with(['\'', '\u{2019}']) {
            continue;
        }
        let phrase: String = m
            .as_str()
            .trim()
            .trim_end_matches([',', ';', ':'])
            .chars()
            .take(MAX_COMMITMENT_CHARS)
            .collect();
        if phrase.split_whitespace().count() < 2 {
            continue;
        }
        if !found.iter().any(|existing| existing.eq_ignore_ascii_case(&phrase)) {
            found.push(phrase);
        }
    }
    found
}

/// First theme whose pattern matches.
pub fn detect_theme(text: &str) -> Option<Theme> {
    theme_patterns()
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(theme, _)| *theme)
}

/// Every theme whose pattern matches, in declaration order.
pub fn detect_themes(text: &str) -> Vec<Theme> {
    theme_patterns()
        .iter()
        .filter(|(_, re)| re.is_match(text))
        .map(|(theme, _)| *theme)
        .collect()
}

/// The significant-disclosure keyword in `text`, if any.
pub fn classify_disclosure(text: &str) -> Option<&'static str> {
    let folded = lexicon::fold(text);
    DISCLOSURE_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| folded.contains(keyword))
}

pub fn is_complaint(text: &str) -> bool {
    let folded = lexicon::fold(text);
    COMPLAINT_PHRASES.iter().any(|phrase| folded.contains(phrase))
}

/// Whether the user is pushing back on the previous reflection. A phrase that
/// appears in both lists counts as explicit.
pub fn classify_rejection(text: &str) -> Option<RejectionKind> {
    let folded = lexicon::fold(text);
    let first_token = lexicon::tokenize(&folded).first().copied();
    if matches!(first_token, Some("no") | Some("nope") | Some("nah"))
        || EXPLICIT_REJECTIONS.iter().any(|p| folded.contains(p))
    {
        return Some(RejectionKind::Explicit);
    }
    if IMPLICIT_REJECTIONS
        .iter()
        .any(|p| lexicon::contains_word(&folded, p))
    {
        return Some(RejectionKind::Implicit);
    }
    None
}

/// True for a reply whose final sentence asks the user for detail.
pub fn is_clarifying_question(text: &str) -> bool {
    clarifier(text).is_some()
}

/// The closing clarifying question of `text`, normalised for comparison.
pub fn clarifier(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let body = trimmed.strip_suffix('?')?;
    let last_sentence = body
        .rsplit(|c: char| c == '.' || c == '!' || c == '?')
        .next()
        .unwrap_or(body);
    let last_sentence = lexicon::fold(last_sentence.trim());
    let asks = CLARIFIER_OPENERS
        .iter()
        .any(|opener| last_sentence.starts_with(opener))
        || last_sentence.contains("tell me")
        || last_sentence.contains("say a bit more");
    asks.then(|| normalize_for_comparison(&last_sentence))
}

/// A user message that reads as a substantive answer.
pub fn looks_like_answer(text: &str) -> bool {
    let folded = lexicon::fold(text);
    lexicon::tokenize(&folded).len() > 6
        || lexicon::contains_any_word(&folded, ANSWER_EMOTION_KEYWORDS)
}

pub fn word_count(text: &str) -> usize {
    lexicon::tokenize(&lexicon::fold(text)).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_ignores_case_punctuation_and_spacing() {
        assert_eq!(
            normalize_for_comparison("  Can you   tell me MORE?! "),
            "can you tell me more"
        );
    }

    #[test]
    fn repetition_matches_exact_and_contained_within_window() {
        let recent = vec![
            "What happened next?".to_string(),
            "Can you tell me one specific detail about that?".to_string(),
        ];
        assert!(detect_repetition("can you tell me one specific detail about that", &recent, 5));
        assert!(detect_repetition(
            "Okay. Can you tell me one specific detail about that? Anything helps.",
            &recent,
            5
        ));
        assert!(!detect_repetition("What would help right now?", &recent, 5));
        assert!(!detect_repetition("What happened next?", &recent, 1));
    }

    #[test]
    fn short_fragments_do_not_count_as_containment() {
        let recent = vec!["I hear you. What else is going on?".to_string()];
        assert!(!detect_repetition("I hear you", &recent, 5));
    }

    #[test]
    fn commitments_use_the_starter_phrases() {
        let found = extract_commitments(
            "I'll stay with you in this. Let's try one slow breath together. I can also just listen.",
        );
        assert_eq!(
            found,
            vec![
                "I'll stay with you in this".to_string(),
                "Let's try one slow breath together".to_string(),
                "I can also just listen".to_string(),
            ]
        );
        assert!(extract_commitments("What would help right now?").is_empty());
    }

    #[test]
    fn negated_starters_are_not_commitments() {
        assert!(extract_commitments("I can't promise anything, but what would help?").is_empty());
        assert!(extract_commitments("I can\u{2019}t fix this for you.").is_empty());
        assert_eq!(
            extract_commitments("I can't fix it. I can sit with you, though."),
            vec!["I can sit with you, though".to_string()]
        );
    }

    #[test]
    fn clarifier_is_the_closing_question() {
        assert_eq!(
            clarifier("That sounds heavy. What's weighing on you most?").as_deref(),
            Some("what s weighing on you most")
        );
        assert_eq!(clarifier("That sounds heavy."), None);
        assert_eq!(clarifier("Really?"), None);
    }

    #[test]
    fn i_will_try_prefers_the_longer_phrase() {
        let found = extract_commitments("I'll try to keep this simple.");
        assert_eq!(found, vec!["I'll try to keep this simple".to_string()]);
    }

    #[test]
    fn themes_detect_in_declaration_order() {
        assert_eq!(detect_theme("my boss moved the deadline again"), Some(Theme::WorkStress));
        assert_eq!(
            detect_theme("my mom and I keep fighting"),
            Some(Theme::FamilyConflict)
        );
        assert_eq!(
            detect_themes("the divorce means custody talks with the kids"),
            vec![Theme::FamilyConflict, Theme::RelationshipTension]
        );
        assert_eq!(detect_theme("I keep worrying about everything"), Some(Theme::Anxiety));
        assert_eq!(detect_theme("my grandfather passed away"), Some(Theme::GriefLoss));
        assert_eq!(detect_theme("the weather is nice"), None);
    }

    #[test]
    fn disclosure_and_complaint_detection() {
        assert_eq!(
            classify_disclosure("Also, I'm going through a divorce and co-parenting is brutal."),
            Some("divorce")
        );
        assert_eq!(classify_disclosure("work was long today"), None);
        assert!(is_complaint("you already asked me that. not helpful"));
        assert!(is_complaint("Please STOP repeating yourself"));
        assert!(!is_complaint("that helped, thanks"));
    }

    #[test]
    fn overlapping_rejection_phrases_are_explicit() {
        assert_eq!(classify_rejection("it's more like anger"), Some(RejectionKind::Explicit));
        assert_eq!(classify_rejection("No, that's not it"), Some(RejectionKind::Explicit));
        assert_eq!(classify_rejection("kind of, I guess"), Some(RejectionKind::Implicit));
        assert_eq!(classify_rejection("yes, exactly that"), None);
    }

    #[test]
    fn clarifying_questions_and_answers() {
        assert!(is_clarifying_question("What would it look like if you could rest?"));
        assert!(is_clarifying_question(
            "That sounds heavy. Can you tell me one specific detail about that?"
        ));
        assert!(!is_clarifying_question(
            "Would you like a grounding exercise or a small practical step right now?"
        ));
        assert!(!is_clarifying_question("That makes sense."));

        assert!(looks_like_answer(
            "I just want the tension in my body to melt and to feel some relief"
        ));
        assert!(looks_like_answer("tension"));
        assert!(!looks_like_answer("ok sure"));
    }
}
