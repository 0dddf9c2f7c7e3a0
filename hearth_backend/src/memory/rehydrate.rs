//! Rebuilding context for a returning user from persisted theme anchors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::themes::capitalize;
use crate::patterns::Theme;
use crate::persistence::{PersistenceGateway, ThemeAnchor};

pub const DEFAULT_ANCHOR_LIMIT: usize = 20;
pub const FIRST_CONVERSATION_NARRATIVE: &str = "This is our first conversation.";
const RECENCY_DECAY_DAYS: f32 = 14.0;
const RECENCY_WEIGHT: f32 = 0.6;
const FREQUENCY_WEIGHT: f32 = 0.4;
const FREQUENCY_SATURATION: f32 = 5.0;
const NARRATIVE_THEMES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    NewSession,
    Returning,
}

/// Read-only context handed to the parser and composer at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RehydratedContext {
    pub status: SessionStatus,
    pub narrative: String,
    pub anchors: Vec<ThemeAnchor>,
    pub anchor_count: usize,
    pub memory_salience: f32,
}

impl RehydratedContext {
    pub fn new_session() -> Self {
        Self {
            status: SessionStatus::NewSession,
            narrative: FIRST_CONVERSATION_NARRATIVE.to_string(),
            anchors: Vec::new(),
            anchor_count: 0,
            memory_salience: 0.0,
        }
    }

    /// Ranks anchors by recency and frequency and summarises them.
    pub fn from_anchors(mut anchors: Vec<ThemeAnchor>, now: DateTime<Utc>, limit: usize) -> Self {
        if anchors.is_empty() || limit == 0 {
            return Self::new_session();
        }
        anchors.sort_by(|a, b| {
            anchor_weight(b, now)
                .total_cmp(&anchor_weight(a, now))
                .then_with(|| a.theme.cmp(&b.theme))
        });
        anchors.truncate(limit);

        let memory_salience = (anchors.iter().map(|a| anchor_weight(a, now)).sum::<f32>()
            / anchors.len() as f32)
            .clamp(0.0, 1.0);

        Self {
            status: SessionStatus::Returning,
            narrative: narrative_for(&anchors),
            anchor_count: anchors.len(),
            anchors,
            memory_salience,
        }
    }
}

/// `0.6 · exp(-days/14) + 0.4 · min(1, frequency/5)`.
pub fn anchor_weight(anchor: &ThemeAnchor, now: DateTime<Utc>) -> f32 {
    let days = (now - anchor.last_seen).num_seconds().max(0) as f32 / 86_400.0;
    let recency = (-days / RECENCY_DECAY_DAYS).exp();
    let frequency = (anchor.frequency as f32 / FREQUENCY_SATURATION).min(1.0);
    RECENCY_WEIGHT * recency + FREQUENCY_WEIGHT * frequency
}

fn theme_label(raw: &str) -> String {
    Theme::parse(raw)
        .map(|theme| theme.label().to_string())
        .unwrap_or_else(|| raw.replace('_', " "))
}

fn narrative_for(anchors: &[ThemeAnchor]) -> String {
    let labels: Vec<String> = anchors
        .iter()
        .take(NARRATIVE_THEMES)
        .map(|anchor| theme_label(&anchor.theme))
        .collect();
    let joined = match labels.as_slice() {
        [] => return FIRST_CONVERSATION_NARRATIVE.to_string(),
        [one] => one.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    };
    format!("{} came up when we talked before.", capitalize(&joined))
}

/// Fetches the user's most relevant anchors and builds the context. Any
/// persistence failure reads as a first conversation.
pub async fn rehydrate(
    gateway: &PersistenceGateway,
    user_id: &str,
    limit: usize,
) -> RehydratedContext {
    if !gateway.is_available() {
        return RehydratedContext::new_session();
    }
    let anchors = gateway.get_recent_anchors(user_id, limit).await;
    let context = RehydratedContext::from_anchors(anchors, Utc::now(), limit);
    tracing::debug!(
        "Rehydrated {} anchor(s) for user {} (salience {:.2})",
        context.anchor_count,
        user_id,
        context.memory_salience
    );
    context
}
