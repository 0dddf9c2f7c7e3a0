//! Reply composition: one reply per user message, chosen by a fixed
//! decision pipeline (repair, curiosity, template or reflection, sanitizer,
//! synthesis, repetition guard) and finished by the output contract.

pub mod curiosity;
pub mod repair;
pub mod repetition;
pub mod rotator;
pub mod sanitizer;
pub mod synthesis;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::affect::AffectAnalysis;
use crate::agent::AgentState;
use crate::glyphs::selector::GlyphSelector;
use crate::glyphs::templates;
use crate::glyphs::{Glyph, ToneCategory};
use crate::lexicon::DEFAULT_POETIC_MARKERS;
use crate::memory::{ConversationMemory, ThemeHit, Turn};
use crate::patterns;
use crate::persistence::ProcessingMode;
use crate::responder::{Responder, ResponderRequest};

use rotator::Rotator;
use sanitizer::{SanitizeReason, Sanitizer, GROUNDED_FALLBACK};

/// Affect confidence needed before a glyph is chosen or reported.
pub const MIN_GLYPH_CONFIDENCE: f32 = 0.3;
const RESPONDER_HISTORY: usize = 3;
const MAX_RECALLED_COMMITMENTS: usize = 2;

/// How a reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseClass {
    Curiosity,
    GlyphGrounded,
    Reflective,
    Synthesis,
    Repair,
    Acknowledgement,
    Fallback,
    Restored,
}

impl ResponseClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseClass::Curiosity => "curiosity",
            ResponseClass::GlyphGrounded => "glyph_grounded",
            ResponseClass::Reflective => "reflective",
            ResponseClass::Synthesis => "synthesis",
            ResponseClass::Repair => "repair",
            ResponseClass::Acknowledgement => "acknowledgement",
            ResponseClass::Fallback => "fallback",
            ResponseClass::Restored => "restored",
        }
    }
}

impl std::fmt::Display for ResponseClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub poetic_markers: Vec<String>,
    pub max_reply_words: usize,
    pub max_reply_chars: usize,
    pub repetition_window: usize,
    pub enable_tier3_poetic: bool,
    pub processing_mode: ProcessingMode,
    pub responder_timeout: Duration,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self {
            poetic_markers: DEFAULT_POETIC_MARKERS.iter().map(|m| m.to_string()).collect(),
            max_reply_words: 40,
            max_reply_chars: 400,
            repetition_window: 5,
            enable_tier3_poetic: false,
            processing_mode: ProcessingMode::Local,
            responder_timeout: Duration::from_secs(6),
        }
    }
}

/// The composed reply plus what was learned while composing it.
#[derive(Debug, Clone)]
pub struct Composition {
    pub reply: String,
    pub glyph: Option<&'static Glyph>,
    pub class: ResponseClass,
    pub commitments_added: Vec<String>,
    pub theme_hit: Option<ThemeHit>,
    pub stage: Option<synthesis::Stage>,
    /// Number of the turn just recorded.
    pub turn: u32,
}

#[derive(Debug, Clone)]
struct Draft {
    text: String,
    glyph: Option<&'static Glyph>,
    class: ResponseClass,
    stage: Option<synthesis::Stage>,
}

impl Draft {
    fn new(text: impl Into<String>, glyph: Option<&'static Glyph>, class: ResponseClass) -> Self {
        Self {
            text: text.into(),
            glyph,
            class,
            stage: None,
        }
    }
}

/// Per-conversation composer. Holds the rotation state, so one instance
/// must not be shared between conversations.
pub struct Composer {
    settings: ComposerSettings,
    selector: GlyphSelector,
    sanitizer: Sanitizer,
    rotator: Rotator,
    responder: Option<Arc<dyn Responder>>,
    complaints: u32,
}

impl Composer {
    pub fn new(settings: ComposerSettings) -> Self {
        let sanitizer = Sanitizer::new(settings.poetic_markers.clone(), settings.max_reply_words);
        Self {
            settings,
            selector: GlyphSelector::new(),
            sanitizer,
            rotator: Rotator::new(),
            responder: None,
            complaints: 0,
        }
    }

    pub fn with_rotator(mut self, rotator: Rotator) -> Self {
        self.rotator = rotator;
        self
    }

    pub fn with_responder(mut self, responder: Option<Arc<dyn Responder>>) -> Self {
        self.responder = responder;
        self
    }

    pub fn settings(&self) -> &ComposerSettings {
        &self.settings
    }

    /// Produces the reply for `utterance`, records the turn in `memory` and
    /// folds it into `agent`.
    pub async fn compose(
        &mut self,
        utterance: &str,
        affect: &AffectAnalysis,
        memory: &mut ConversationMemory,
        agent: &mut AgentState,
    ) -> Composition {
        let draft = self.draft(utterance, affect, memory).await;
        self.finish(draft, utterance, affect, memory, agent)
    }

    async fn draft(
        &mut self,
        utterance: &str,
        affect: &AffectAnalysis,
        memory: &mut ConversationMemory,
    ) -> Draft {
        let window = self.settings.repetition_window;
        let recent = memory.recent_assistant_messages(window);

        if patterns::is_complaint(utterance) {
            let reply = repair::complaint_reply(self.complaints);
            self.complaints += 1;
            tracing::debug!("Complaint about the conversation; apologising");
            return Draft::new(reply, None, ResponseClass::Repair);
        }

        let last_had_glyph = memory
            .last_turn()
            .is_some_and(|turn| turn.glyph_chosen.is_some());
        if last_had_glyph {
            if let Some(kind) = patterns::classify_rejection(utterance) {
                tracing::debug!("User pushed back on the last reflection ({:?})", kind);
                let reply = repair::rejection_reply(kind, &mut self.rotator, &recent);
                return Draft::new(reply, None, ResponseClass::Repair);
            }
        }

        if curiosity::is_vague_high_emotion(utterance, affect.tone, affect.arousal) {
            tracing::debug!("Vague high-arousal {} message; asking what happened", affect.tone);
            let reply = self
                .rotator
                .pick(curiosity::curiosity_bank(affect.tone), &recent)
                .unwrap_or("What's going on?");
            return Draft::new(reply, None, ResponseClass::Curiosity);
        }

        let selected = if affect.tone_confidence >= MIN_GLYPH_CONFIDENCE {
            self.selector.select(affect.tone, affect.arousal, affect.valence)
        } else {
            None
        };

        let mut draft = self.glyph_draft(affect, selected, &recent);
        if let Some(reason) = self.sanitizer.check(&draft.text, draft.glyph) {
            draft = self.grounded_replacement(utterance, affect, memory, reason).await;
        }

        let exchange = memory.len() + 1;
        if let Some(stage) = synthesis::classify_stage(utterance, memory, exchange) {
            tracing::debug!("Synthesis stage {:?} at exchange {}", stage, exchange);
            let text = synthesis::compose_stage(stage, utterance, memory, exchange);
            draft = Draft {
                text,
                glyph: draft.glyph,
                class: ResponseClass::Synthesis,
                stage: Some(stage),
            };
        }

        let guarded = repetition::guard(
            draft.text,
            draft.class,
            utterance,
            memory,
            window,
            &mut self.rotator,
        );
        Draft {
            glyph: if guarded.class == ResponseClass::Acknowledgement {
                None
            } else {
                draft.glyph
            },
            stage: if guarded.class == ResponseClass::Synthesis {
                draft.stage
            } else {
                None
            },
            text: guarded.reply,
            class: guarded.class,
        }
    }

    fn glyph_draft(
        &mut self,
        affect: &AffectAnalysis,
        selected: Option<&'static Glyph>,
        recent: &[String],
    ) -> Draft {
        let category = ToneCategory::for_tone(affect.tone, affect.arousal);
        if template_applies(affect) {
            if let Some((glyph_name, lines)) =
                templates::templates_for(category, selected.map(|glyph| glyph.name))
            {
                if let Some(line) = self.rotator.pick(lines, recent) {
                    let glyph = self.selector.library().find(glyph_name).or(selected);
                    return Draft::new(
                        templates::normalize_glyph_capitalization(line),
                        glyph,
                        ResponseClass::GlyphGrounded,
                    );
                }
            }
        }
        let reply = self
            .rotator
            .pick(templates::reflective_bank(category), recent)
            .unwrap_or(GROUNDED_FALLBACK);
        Draft::new(reply, selected, ResponseClass::Reflective)
    }

    async fn grounded_replacement(
        &self,
        utterance: &str,
        affect: &AffectAnalysis,
        memory: &ConversationMemory,
        reason: SanitizeReason,
    ) -> Draft {
        tracing::debug!("Replacing candidate reply: {:?}", reason);
        if self.settings.processing_mode == ProcessingMode::Hybrid {
            if let Some(responder) = &self.responder {
                let start = memory.len().saturating_sub(RESPONDER_HISTORY);
                let request = ResponderRequest {
                    utterance: utterance.to_string(),
                    tone: affect.tone,
                    recent: memory.turns()[start..]
                        .iter()
                        .map(|turn| (turn.utterance.clone(), turn.response.clone()))
                        .collect(),
                };
                match tokio::time::timeout(
                    self.settings.responder_timeout,
                    responder.respond(&request),
                )
                .await
                {
                    Ok(Ok(text)) => {
                        let text = sanitizer::strip_metadata(&text);
                        if !text.is_empty() && self.sanitizer.check(&text, None).is_none() {
                            return Draft::new(text, None, ResponseClass::Reflective);
                        }
                        tracing::debug!("Responder reply failed the sanitizer; using fallback");
                    }
                    Ok(Err(e)) => tracing::warn!("Responder failed: {}", e),
                    Err(_) => tracing::warn!(
                        "Responder timed out after {:?}",
                        self.settings.responder_timeout
                    ),
                }
            }
        }
        Draft::new(GROUNDED_FALLBACK, None, ResponseClass::Fallback)
    }

    fn finish(
        &mut self,
        draft: Draft,
        utterance: &str,
        affect: &AffectAnalysis,
        memory: &mut ConversationMemory,
        agent: &mut AgentState,
    ) -> Composition {
        let max_chars = self.settings.max_reply_chars;
        let turn_number = memory.len() as u32 + 1;
        let mut reply = sanitizer::finalize(&draft.text, max_chars);

        let commitments_added = agent.add_commitments(patterns::extract_commitments(&reply));
        if !commitments_added.is_empty() {
            tracing::debug!("New commitment(s): {:?}", commitments_added);
        }

        agent.update(utterance, affect);

        if agent.commitments_due(turn_number) {
            let held = &agent.established_commitments;
            let recalled = held[held.len().saturating_sub(MAX_RECALLED_COMMITMENTS)..].join("; ");
            let with_recall = format!("{reply} Earlier I said: {recalled}.");
            if with_recall.chars().count() <= max_chars {
                reply = with_recall;
            }
        }

        if self.settings.enable_tier3_poetic && draft.class == ResponseClass::GlyphGrounded {
            if let Some(glyph) = draft.glyph {
                let enhanced = format!("{reply} {}", glyph.imagery);
                if enhanced.chars().count() <= max_chars {
                    reply = enhanced;
                }
            }
        }

        let reply = sanitizer::finalize(&reply, max_chars);
        let mut turn = Turn::new(
            utterance,
            affect.clone(),
            draft.glyph.map(|glyph| glyph.name.to_string()),
            reply.clone(),
            draft.class,
        );
        turn.commitments_added = commitments_added.clone();
        let theme_hit = memory.add_turn(turn);

        Composition {
            reply,
            glyph: draft.glyph,
            class: draft.class,
            commitments_added,
            theme_hit,
            stage: draft.stage,
            turn: turn_number,
        }
    }
}

fn template_applies(affect: &AffectAnalysis) -> bool {
    let (valence, arousal) = (affect.valence, affect.arousal);
    affect.tone_confidence >= MIN_GLYPH_CONFIDENCE
        && ((valence < 0.1 && arousal < 0.7) || (arousal > 0.6 && valence < 0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affect::AffectParser;
    use crate::lexicon::Tone;
    use anyhow::Result;
    use async_trait::async_trait;

    fn composer() -> Composer {
        Composer::new(ComposerSettings::default()).with_rotator(Rotator::seeded(11))
    }

    fn seeded_memory(turns: &[(&str, &str)]) -> ConversationMemory {
        let parser = AffectParser::new();
        let mut memory = ConversationMemory::new();
        for (user, reply) in turns {
            memory.add_turn(Turn::new(
                *user,
                parser.analyze(user),
                None,
                *reply,
                ResponseClass::Reflective,
            ));
        }
        memory
    }

    async fn say(
        composer: &mut Composer,
        memory: &mut ConversationMemory,
        agent: &mut AgentState,
        text: &str,
    ) -> Composition {
        let affect = AffectParser::new().analyze(text);
        composer.compose(text, &affect, memory, agent).await
    }

    #[tokio::test]
    async fn vague_anger_gets_curiosity_without_a_glyph() {
        let mut memory = ConversationMemory::new();
        let mut agent = AgentState::new();
        let affect = AffectParser::new().analyze("this is bullshit");
        assert_eq!(affect.tone, Tone::Angry);
        assert!(affect.arousal >= 0.7);

        let out = composer()
            .compose("this is bullshit", &affect, &mut memory, &mut agent)
            .await;
        assert_eq!(out.class, ResponseClass::Curiosity);
        assert!(out.glyph.is_none());
        assert!(curiosity::curiosity_bank(Tone::Angry).contains(&out.reply.as_str()));
        assert_eq!(memory.len(), 1);
        assert_eq!(agent.turn_count, 1);
    }

    #[tokio::test]
    async fn exhaustion_reaches_a_heavy_glyph_template() {
        let text = "I'm so exhausted I can't even think straight today";
        let mut memory = ConversationMemory::new();
        let mut agent = AgentState::new();
        let affect = AffectParser::new().analyze(text);
        assert_eq!(affect.tone, Tone::Sad);
        assert!(affect.arousal < 0.5);

        let out = composer().compose(text, &affect, &mut memory, &mut agent).await;
        let glyph = out.glyph.expect("glyph chosen");
        assert!(["Loss", "Pain", "Grieving", "Overwhelm"].contains(&glyph.name));
        let lower = out.reply.to_lowercase();
        assert!(["heavy", "weight", "exhaust", "tired", "drain"]
            .iter()
            .any(|word| lower.contains(word)));
        let len = out.reply.chars().count();
        assert!((20..=250).contains(&len));
    }

    #[tokio::test]
    async fn complaint_gets_an_apology_and_a_choice() {
        let clarifier = "Can you tell me one specific detail about that?";
        let mut memory = seeded_memory(&[("it's hard", clarifier), ("yeah", clarifier)]);
        let mut agent = AgentState::new();
        let mut composer = composer();

        let out = say(
            &mut composer,
            &mut memory,
            &mut agent,
            "you already asked me that. not helpful",
        )
        .await;
        assert_eq!(out.class, ResponseClass::Repair);
        assert!(out.reply.starts_with("I'm sorry"));
        assert!(out.reply.contains("grounding"));
        assert!(out.reply.contains("practical step"));
        assert!(!out.reply.contains(clarifier));

        let again = say(&mut composer, &mut memory, &mut agent, "you already said that").await;
        assert_ne!(again.reply, out.reply);
    }

    #[tokio::test]
    async fn answered_clarifier_is_not_asked_again() {
        let clarifier = "What would it look like if you could rest?";
        let mut memory = seeded_memory(&[("I can't switch off at night", clarifier)]);
        let mut agent = AgentState::new();

        let out = say(
            &mut composer(),
            &mut memory,
            &mut agent,
            "I just want the tension in my body to melt and to feel some relief",
        )
        .await;
        assert!(!out.reply.contains(clarifier));
        if out.class == ResponseClass::Acknowledgement {
            assert!(out.reply.contains("it sounds like you just want the tension in your body"));
            assert!(out.glyph.is_none());
        }
    }

    #[tokio::test]
    async fn answering_an_opener_still_gets_a_glyph_reply() {
        let mut memory = seeded_memory(&[("hello", "I'm listening. What's on your mind today?")]);
        let mut agent = AgentState::new();

        let out = say(
            &mut composer(),
            &mut memory,
            &mut agent,
            "I'm so exhausted I can't even think straight today",
        )
        .await;
        assert_eq!(out.class, ResponseClass::GlyphGrounded);
        let glyph = out.glyph.expect("glyph chosen");
        assert!(["Loss", "Pain", "Grieving", "Overwhelm"].contains(&glyph.name));
        assert!(!out.reply.starts_with("Thanks for sharing that"));
    }

    #[tokio::test]
    async fn disclosure_is_woven_into_earlier_themes() {
        let mut memory = seeded_memory(&[
            ("Work has been brutal, deadlines everywhere", "That sounds like a lot. What's been hardest?"),
            ("When it gets bad I just shut down", "That makes sense. What does shutting down feel like?"),
            ("My chest gets tight every evening", "That sounds uncomfortable. When does it start?"),
            ("I don't really know", "That's okay. What's on your mind right now?"),
        ]);
        let mut agent = AgentState::new();

        let out = say(
            &mut composer(),
            &mut memory,
            &mut agent,
            "Also, I'm going through a divorce and co-parenting is brutal.",
        )
        .await;
        assert_eq!(out.class, ResponseClass::Synthesis);
        assert_eq!(out.stage, Some(synthesis::Stage::AcknowledgeNewContext));
        assert!(out.reply.contains("divorce"));
        assert!(out.reply.contains("work"));
        assert!(out.reply.contains("shutting down"));
        assert!(!out.reply.to_lowercase().contains("tell me more"));
    }

    #[tokio::test]
    async fn rejection_of_a_glyph_reflection_is_repaired() {
        let mut memory = ConversationMemory::new();
        let mut agent = AgentState::new();
        let mut composer = composer();
        let first = say(
            &mut composer,
            &mut memory,
            &mut agent,
            "I'm so exhausted I can't even think straight today",
        )
        .await;
        assert!(first.glyph.is_some());

        let out = say(&mut composer, &mut memory, &mut agent, "No, that's not it at all").await;
        assert_eq!(out.class, ResponseClass::Repair);
        assert!(out.glyph.is_none());
    }

    #[tokio::test]
    async fn consecutive_replies_differ_unless_the_user_repeats() {
        let mut memory = ConversationMemory::new();
        let mut agent = AgentState::new();
        let mut composer = composer();
        let mut previous: Option<String> = None;
        for text in ["hello", "ok", "fine", "sure", "hmm", "right", "whatever", "ok then"] {
            let out = say(&mut composer, &mut memory, &mut agent, text).await;
            if let Some(previous) = &previous {
                assert_ne!(&out.reply, previous, "repeated after {text:?}");
            }
            assert!(!out.reply.is_empty());
            assert!(out.reply.chars().count() <= 400);
            previous = Some(out.reply);
        }
        assert_eq!(memory.len(), 8);
    }

    struct FixedResponder(&'static str);

    #[async_trait]
    impl Responder for FixedResponder {
        async fn respond(&self, _request: &ResponderRequest) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct SlowResponder;

    #[async_trait]
    impl Responder for SlowResponder {
        async fn respond(&self, _request: &ResponderRequest) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    fn strict_settings(mode: ProcessingMode) -> ComposerSettings {
        ComposerSettings {
            // Every template mentions "sounds", so every candidate is replaced.
            poetic_markers: vec!["sound".to_string()],
            processing_mode: mode,
            responder_timeout: Duration::from_millis(50),
            ..ComposerSettings::default()
        }
    }

    #[tokio::test]
    async fn sanitizer_uses_the_responder_only_in_hybrid_mode() {
        let text = "I'm so exhausted I can't even think straight today";
        let affect = AffectParser::new().analyze(text);
        let responder: Arc<dyn Responder> = Arc::new(FixedResponder("That's a lot to carry. What's weighing on you most?"));

        let mut hybrid = Composer::new(strict_settings(ProcessingMode::Hybrid))
            .with_rotator(Rotator::seeded(1))
            .with_responder(Some(responder.clone()));
        let out = hybrid
            .compose(text, &affect, &mut ConversationMemory::new(), &mut AgentState::new())
            .await;
        assert_eq!(out.reply, "That's a lot to carry. What's weighing on you most?");
        assert!(out.glyph.is_none());

        let mut local = Composer::new(strict_settings(ProcessingMode::Local))
            .with_rotator(Rotator::seeded(1))
            .with_responder(Some(responder));
        let out = local
            .compose(text, &affect, &mut ConversationMemory::new(), &mut AgentState::new())
            .await;
        assert_eq!(out.reply, GROUNDED_FALLBACK);
        assert_eq!(out.class, ResponseClass::Fallback);
    }

    #[tokio::test]
    async fn slow_responder_falls_back_to_the_generic_reply() {
        let text = "I'm so exhausted I can't even think straight today";
        let affect = AffectParser::new().analyze(text);
        let mut composer = Composer::new(strict_settings(ProcessingMode::Hybrid))
            .with_rotator(Rotator::seeded(1))
            .with_responder(Some(Arc::new(SlowResponder)));
        let out = composer
            .compose(text, &affect, &mut ConversationMemory::new(), &mut AgentState::new())
            .await;
        assert_eq!(out.reply, GROUNDED_FALLBACK);
    }

    #[tokio::test]
    async fn commitments_are_recorded_and_recalled_on_the_tenth_turn() {
        let mut memory = ConversationMemory::new();
        let mut agent = AgentState::new();
        agent.add_commitments(vec!["I'll stay right here with you".to_string()]);
        let mut composer = composer();
        let mut tenth = None;
        for i in 0..10 {
            let out = say(&mut composer, &mut memory, &mut agent, &format!("note {i}")).await;
            tenth = Some(out);
        }
        let tenth = tenth.expect("ten turns");
        assert_eq!(tenth.turn, 10);
        assert!(tenth.reply.contains("Earlier I said: I'll stay right here with you"));
        assert_eq!(agent.turn_count, 10);
    }

    #[tokio::test]
    async fn tier3_imagery_only_when_enabled() {
        let text = "I'm so exhausted I can't even think straight today";
        let affect = AffectParser::new().analyze(text);
        let settings = ComposerSettings {
            enable_tier3_poetic: true,
            ..ComposerSettings::default()
        };
        let mut composer = Composer::new(settings).with_rotator(Rotator::seeded(2));
        let out = composer
            .compose(text, &affect, &mut ConversationMemory::new(), &mut AgentState::new())
            .await;
        let glyph = out.glyph.expect("glyph chosen");
        assert_eq!(out.class, ResponseClass::GlyphGrounded);
        assert!(out.reply.ends_with(glyph.imagery));
    }
}
