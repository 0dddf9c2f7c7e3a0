//! Local, deterministic affect scoring.
//!
//! The parser never fails: empty or unrecognisable input comes back as a
//! neutral analysis.

use serde::{Deserialize, Serialize};

use crate::lexicon::{self, Tone, ToneEntry, INTENSIFIERS, NEGATIONS, TONE_LEXICON};
use crate::memory::rehydrate::RehydratedContext;
use crate::patterns;

const WHOLE_WORD_WEIGHT: f32 = 1.5;
const SUBSTRING_WEIGHT: f32 = 0.5;
const MATCH_MULTIPLIER: f32 = 1.2;
const CONFIDENCE_DIVISOR: f32 = 5.0;
const EMPTY_CONFIDENCE: f32 = 0.5;
const NEGATION_WINDOW: usize = 3;
const MAX_SECONDARY_TONES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffectAnalysis {
    pub tone: Tone,
    pub tone_confidence: f32,
    pub valence: f32,
    pub arousal: f32,
    pub secondary_tones: Vec<Tone>,
    pub explanation: String,
}

impl AffectAnalysis {
    pub fn neutral(confidence: f32, explanation: impl Into<String>) -> Self {
        let entry = Tone::Neutral.entry();
        Self {
            tone: Tone::Neutral,
            tone_confidence: clamp01(confidence),
            valence: entry.base_valence,
            arousal: entry.base_arousal,
            secondary_tones: Vec::new(),
            explanation: explanation.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ToneScore {
    tone: Tone,
    score: f32,
    matched: Vec<&'static str>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AffectParser;

impl AffectParser {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, text: &str) -> AffectAnalysis {
        if text.trim().is_empty() {
            return AffectAnalysis::neutral(EMPTY_CONFIDENCE, "Empty message; defaulting to neutral.");
        }

        let folded = lexicon::fold(text);
        let mut scores: Vec<ToneScore> = TONE_LEXICON
            .iter()
            .map(|entry| score_tone(entry, &folded))
            .collect();

        let primary_index = argmax(&scores);
        let intensifiers = lexicon::count_words(&folded, INTENSIFIERS);
        let exclamations = text.chars().filter(|c| *c == '!').count();

        let Some(primary_index) = primary_index else {
            let mut neutral = AffectAnalysis::neutral(0.0, "");
            neutral.arousal = adjusted_arousal(neutral.arousal, intensifiers, exclamations);
            neutral.explanation = format!(
                "No emotional keywords found; neutral (valence {:.2}, arousal {:.2}).",
                neutral.valence, neutral.arousal
            );
            return neutral;
        };

        let primary = scores.remove(primary_index);
        let negated = is_negated(&primary, &folded);
        let entry = primary.tone.entry();

        let mut valence = entry.base_valence;
        if negated {
            if entry.base_valence > 0.0 {
                valence = -valence;
            } else {
                valence *= 0.5;
            }
        }
        let valence = valence.clamp(-1.0, 1.0);
        let arousal = adjusted_arousal(entry.base_arousal, intensifiers, exclamations);
        let confidence = (primary.score / CONFIDENCE_DIVISOR).min(1.0);

        let mut rest: Vec<&ToneScore> = scores.iter().filter(|s| s.score > 0.0).collect();
        // stable sort keeps lexicon order among equal scores
        rest.sort_by(|a, b| b.score.total_cmp(&a.score));
        let secondary_tones: Vec<Tone> = rest
            .into_iter()
            .take(MAX_SECONDARY_TONES)
            .map(|s| s.tone)
            .collect();

        let explanation = format!(
            "Detected {} (confidence {:.2}) from '{}'{}; valence {:.2}, arousal {:.2}.",
            primary.tone,
            confidence,
            primary.matched.join("', '"),
            if negated { " with negation" } else { "" },
            valence,
            arousal
        );

        AffectAnalysis {
            tone: primary.tone,
            tone_confidence: clamp01(confidence),
            valence,
            arousal,
            secondary_tones,
            explanation,
        }
    }

    /// Same as [`analyze`](Self::analyze), with a small confidence lift when the
    /// utterance touches a theme this user already has anchors for.
    pub fn analyze_in_context(&self, text: &str, context: &RehydratedContext) -> AffectAnalysis {
        let mut analysis = self.analyze(text);
        if context.anchors.is_empty() || analysis.tone_confidence == 0.0 {
            return analysis;
        }
        let Some(theme) = patterns::detect_theme(text) else {
            return analysis;
        };
        if context.anchors.iter().any(|anchor| anchor.theme == theme.as_str()) {
            analysis.tone_confidence =
                clamp01(analysis.tone_confidence + 0.1 * context.memory_salience);
        }
        analysis
    }
}

fn score_tone(entry: &'static ToneEntry, folded: &str) -> ToneScore {
    let mut score = 0.0;
    let mut matched = Vec::new();
    for keyword in entry.keywords {
        if lexicon::contains_word(folded, keyword) {
            score += WHOLE_WORD_WEIGHT;
            matched.push(*keyword);
        } else if folded.contains(keyword) {
            score += SUBSTRING_WEIGHT;
            matched.push(*keyword);
        }
    }
    if score > 0.0 {
        score *= MATCH_MULTIPLIER;
    }
    ToneScore {
        tone: entry.tone,
        score,
        matched,
    }
}

fn argmax(scores: &[ToneScore]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, candidate) in scores.iter().enumerate() {
        if candidate.score <= 0.0 {
            continue;
        }
        match best {
            Some(current) if scores[current].score >= candidate.score => {}
            _ => best = Some(index),
        }
    }
    best
}

/// True when a negation token sits within a few tokens before any whole-word
/// occurrence of one of the tone's matched keywords.
fn is_negated(score: &ToneScore, folded: &str) -> bool {
    for keyword in &score.matched {
        for position in lexicon::whole_word_positions(folded, keyword) {
            let preceding = lexicon::tokenize(&folded[..position]);
            let window_start = preceding.len().saturating_sub(NEGATION_WINDOW);
            if preceding[window_start..]
                .iter()
                .any(|token| NEGATIONS.contains(token))
            {
                return true;
            }
        }
    }
    false
}

fn adjusted_arousal(base: f32, intensifiers: usize, exclamations: usize) -> f32 {
    let boosted =
        base + 0.1 * intensifiers.min(3) as f32 + 0.15 * exclamations.min(2) as f32;
    clamp01(boosted)
}

fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}
