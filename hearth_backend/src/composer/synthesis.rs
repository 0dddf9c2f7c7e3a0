//! Replies that pull the conversation together once there is enough of it:
//! acknowledging a new disclosure, naming a recurring pattern, and tying the
//! current message back to what came before.

use serde::{Deserialize, Serialize};

use crate::memory::ConversationMemory;
use crate::patterns;

/// Exchanges (including the current one) before synthesis is considered.
pub const MIN_EXCHANGES: usize = 3;
const DISCLOSURE_MIN_EXCHANGE: usize = 4;
const INTEGRATION_MAX_EXCHANGE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    AcknowledgeNewContext,
    RecognizePattern,
    DeepenExploration,
    Integration,
}

const DISCLOSURE_PHRASES: &[(&str, &str)] = &[
    ("divorce", "the divorce"),
    ("separated", "the separation"),
    ("separation", "the separation"),
    ("co-parent", "co-parenting"),
    ("coparent", "co-parenting"),
    ("custody", "the custody situation"),
    ("trauma", "what you went through"),
    ("loss", "your loss"),
    ("diagnosed", "the diagnosis"),
    ("diagnosis", "the diagnosis"),
    ("passed away", "your loss"),
    ("miscarriage", "the miscarriage"),
    ("laid off", "losing your job"),
    ("got fired", "losing your job"),
    ("abuse", "what happened to you"),
    ("affair", "the affair"),
];

fn disclosure_phrase(keyword: &str) -> &'static str {
    DISCLOSURE_PHRASES
        .iter()
        .find(|(k, _)| *k == keyword)
        .map_or("what you just shared", |(_, phrase)| phrase)
}

/// Which stage applies to this exchange, if any. `exchange` counts the
/// current message.
pub fn classify_stage(utterance: &str, memory: &ConversationMemory, exchange: usize) -> Option<Stage> {
    if exchange < MIN_EXCHANGES {
        return None;
    }
    if exchange >= DISCLOSURE_MIN_EXCHANGE && patterns::classify_disclosure(utterance).is_some() {
        return Some(Stage::AcknowledgeNewContext);
    }
    if memory.causal_chain().is_complete() && !memory.pattern_recognized() {
        return Some(Stage::RecognizePattern);
    }
    if !has_context(memory) {
        return None;
    }
    if exchange > INTEGRATION_MAX_EXCHANGE {
        Some(Stage::DeepenExploration)
    } else {
        Some(Stage::Integration)
    }
}

fn has_context(memory: &ConversationMemory) -> bool {
    let state = memory.integrated_state();
    !state.domains.is_empty() || !state.thought_patterns.is_empty() || !memory.get_top_themes(1).is_empty()
}

/// Builds the reply for `stage`. Marks the pattern as recognised when it
/// names one.
pub fn compose_stage(
    stage: Stage,
    utterance: &str,
    memory: &mut ConversationMemory,
    exchange: usize,
) -> String {
    match stage {
        Stage::AcknowledgeNewContext => acknowledge_new_context(utterance, memory),
        Stage::RecognizePattern => {
            let reply = recognize_pattern(memory);
            memory.mark_pattern_recognized();
            reply
        }
        Stage::DeepenExploration => deepen(memory, exchange),
        Stage::Integration => integrate(memory, exchange),
    }
}

fn earlier_focus(memory: &ConversationMemory) -> String {
    if let Some(domain) = memory.integrated_state().domains.first() {
        return domain.label().to_string();
    }
    if let Some(top) = memory.get_top_themes(1).first() {
        return top.theme.label().to_string();
    }
    "everything else".to_string()
}

fn acknowledge_new_context(utterance: &str, memory: &ConversationMemory) -> String {
    let disclosure = patterns::classify_disclosure(utterance)
        .map(disclosure_phrase)
        .unwrap_or("what you just shared");
    let focus = match memory.integrated_state().domains.first() {
        Some(domain) => format!("everything with {}", domain.label()),
        None => "everything else".to_string(),
    };
    let mut reply = format!(
        "Thank you for telling me about {disclosure}. That's a lot to carry on top of {focus}."
    );
    if let Some(mechanism) = memory.causal_chain().mechanisms.first() {
        reply.push_str(&format!(
            " It makes sense that {} has been how you get through it.",
            mechanism.phrase()
        ));
    }
    reply.push_str(" How is this new piece sitting with you right now?");
    reply
}

fn recognize_pattern(memory: &ConversationMemory) -> String {
    let chain = memory.causal_chain();
    let trigger = chain.triggers.first().map_or("things", String::as_str);
    let mechanism = chain
        .mechanisms
        .first()
        .map_or("pulling inward", |m| m.phrase());
    let manifestation = chain
        .manifestations
        .first()
        .map_or("tension", String::as_str);
    format!(
        "I'm noticing a pattern: when {trigger} pile up, you tend to start {mechanism}, and your body feels it as {manifestation}. Does that fit what you're experiencing?"
    )
}

fn deepen(memory: &ConversationMemory, exchange: usize) -> String {
    let focus = earlier_focus(memory);
    let mechanism = memory.causal_chain().mechanisms.first().map(|m| m.phrase());
    match (exchange % 2, mechanism) {
        (0, Some(mechanism)) => format!(
            "We've come back to {focus} a few times now, and {mechanism} keeps showing up. What do you think sits underneath it?"
        ),
        (0, None) => format!(
            "We've come back to {focus} a few times now. What do you think sits underneath it?"
        ),
        _ => format!(
            "It sounds like {focus} has been with you through this whole conversation. What would it mean for that to ease, even a little?"
        ),
    }
}

fn integrate(memory: &ConversationMemory, exchange: usize) -> String {
    let focus = earlier_focus(memory);
    if exchange % 2 == 1 {
        format!("Earlier you mentioned {focus}. How does that connect with what you're feeling now?")
    } else {
        format!("I'm holding onto what you said about {focus}. Does this feel like part of the same thing?")
    }
}
