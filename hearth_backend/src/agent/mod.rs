//! Per-conversation companion state: mood, working hypothesis, commitments
//! and whether a negative thread is still open.

pub mod mood;

use serde::{Deserialize, Serialize};

pub use mood::Mood;

use crate::affect::AffectAnalysis;
use crate::lexicon;

pub const MOOD_EMA_ALPHA: f32 = 0.3;
pub const TENSION_VALENCE: f32 = -0.3;
pub const TENSION_RELEASE_RISE: f32 = 0.3;
/// Commitments are read back on every turn that is a multiple of this.
pub const COMMITMENT_RECALL_INTERVAL: u32 = 10;

/// (trigger phrases, hypothesis). The first row with a matching phrase wins.
const HYPOTHESIS_TRIGGERS: &[(&[&str], &str)] = &[
    (
        &["shut down", "shutting down", "freeze", "frozen", "numb"],
        "Shutting down may be how they cope when pressure builds.",
    ),
    (
        &["can't stop thinking", "keep thinking", "over and over", "overthinking"],
        "Their mind may be looping on something unresolved.",
    ),
    (
        &["my fault", "i'm useless", "i'm stupid", "i'm a failure", "not good enough"],
        "They may be turning the stress inward as self-blame.",
    ),
    (
        &["exhausted", "drained", "no energy", "burnt out", "burned out"],
        "They may be running on empty and need rest more than advice.",
    ),
    (
        &["alone", "lonely", "nobody", "no one"],
        "They may be feeling unsupported and want connection.",
    ),
    (
        &["deadline", "boss", "work"],
        "Work pressure seems to be a main source of strain.",
    ),
    (
        &["divorce", "custody", "co-parent", "separated"],
        "A major family change is reshaping everything else.",
    ),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub primary_mood: Mood,
    pub mood_intensity: f32,
    #[serde(default)]
    pub emotional_hypothesis: Option<String>,
    #[serde(default)]
    pub established_commitments: Vec<String>,
    #[serde(default)]
    pub unresolved_tension: bool,
    #[serde(default)]
    pub last_valence: Option<f32>,
    #[serde(default)]
    pub turn_count: u32,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            primary_mood: Mood::Listening,
            mood_intensity: 0.0,
            emotional_hypothesis: None,
            established_commitments: Vec::new(),
            unresolved_tension: false,
            last_valence: None,
            turn_count: 0,
        }
    }
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one user turn into the state. Called exactly once per turn.
    pub fn update(&mut self, utterance: &str, affect: &AffectAnalysis) {
        self.primary_mood = self.primary_mood.transition(affect.tone);
        self.mood_intensity = (MOOD_EMA_ALPHA * affect.arousal
            + (1.0 - MOOD_EMA_ALPHA) * self.mood_intensity)
            .clamp(0.0, 1.0);

        if let Some(hypothesis) = hypothesis_for(utterance) {
            self.emotional_hypothesis = Some(hypothesis.to_string());
        }

        let rose = self
            .last_valence
            .is_some_and(|previous| affect.valence - previous >= TENSION_RELEASE_RISE);
        if rose {
            self.unresolved_tension = false;
        } else if affect.valence < TENSION_VALENCE {
            self.unresolved_tension = true;
        }
        self.last_valence = Some(affect.valence);
        self.turn_count += 1;
    }

    /// Appends new commitments, skipping ones already held. Returns the
    /// commitments that were actually added.
    pub fn add_commitments(&mut self, commitments: Vec<String>) -> Vec<String> {
        let mut added = Vec::new();
        for commitment in commitments {
            let known = self
                .established_commitments
                .iter()
                .any(|existing| existing.eq_ignore_ascii_case(&commitment));
            if !known {
                self.established_commitments.push(commitment.clone());
                added.push(commitment);
            }
        }
        added
    }

    /// True on turns where earlier commitments should be read back.
    pub fn commitments_due(&self, turn: u32) -> bool {
        turn > 0 && turn % COMMITMENT_RECALL_INTERVAL == 0 && !self.established_commitments.is_empty()
    }
}

pub fn hypothesis_for(utterance: &str) -> Option<&'static str> {
    let folded = lexicon::fold(utterance);
    HYPOTHESIS_TRIGGERS
        .iter()
        .find(|(triggers, _)| triggers.iter().any(|t| lexicon::contains_word(&folded, t)))
        .map(|(_, hypothesis)| *hypothesis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::AffectParser;

    #[test]
    fn mood_intensity_is_an_ema_of_arousal() {
        let mut state = AgentState::new();
        let parser = AffectParser::new();
        let angry = parser.analyze("this is bullshit");
        state.update("this is bullshit", &angry);
        assert!((state.mood_intensity - 0.3 * angry.arousal).abs() < 1e-6);
        let before = state.mood_intensity;
        state.update("this is bullshit", &angry);
        assert!((state.mood_intensity - (0.3 * angry.arousal + 0.7 * before)).abs() < 1e-6);
        assert_eq!(state.primary_mood, Mood::Protective);
        assert_eq!(state.turn_count, 2);
    }

    #[test]
    fn tension_opens_on_negative_valence_and_clears_on_a_rise() {
        let parser = AffectParser::new();
        let mut state = AgentState::new();
        state.update("I feel so sad", &parser.analyze("I feel so sad"));
        assert!(state.unresolved_tension);

        state.update("ok", &parser.analyze("okay"));
        assert!(!state.unresolved_tension);
    }

    #[test]
    fn hypotheses_come_from_trigger_phrases() {
        assert_eq!(
            hypothesis_for("I just shut down when the deadline hits"),
            Some("Shutting down may be how they cope when pressure builds.")
        );
        assert_eq!(hypothesis_for("nice weather"), None);

        let mut state = AgentState::new();
        let affect = AffectParser::new().analyze("nice weather");
        state.emotional_hypothesis = Some("kept".into());
        state.update("nice weather", &affect);
        assert_eq!(state.emotional_hypothesis.as_deref(), Some("kept"));
    }

    #[test]
    fn commitments_are_deduplicated_and_never_removed() {
        let mut state = AgentState::new();
        let added = state.add_commitments(vec!["I'll check in tomorrow".into()]);
        assert_eq!(added.len(), 1);
        let added = state.add_commitments(vec![
            "i'll check in tomorrow".into(),
            "Let's try a breathing exercise".into(),
        ]);
        assert_eq!(added, vec!["Let's try a breathing exercise".to_string()]);
        assert_eq!(state.established_commitments.len(), 2);

        assert!(!state.commitments_due(9));
        assert!(state.commitments_due(10));
        assert!(state.commitments_due(20));
    }
}
