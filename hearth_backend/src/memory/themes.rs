//! Recurring-theme counters and the reflections they unlock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::patterns::{self, Theme};

pub const DEFAULT_REFLECTION_THRESHOLD: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeCount {
    pub theme: Theme,
    pub count: u32,
    pub last_seen_turn: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionStrength {
    Soft,
    Strong,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeReflection {
    pub theme: Theme,
    pub strength: ReflectionStrength,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeHit {
    pub theme: Theme,
    pub count: u32,
    pub reflection: Option<ThemeReflection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemeTracker {
    threshold: u32,
    counts: BTreeMap<Theme, ThemeCount>,
}

impl Default for ThemeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_REFLECTION_THRESHOLD)
    }
}

impl ThemeTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            counts: BTreeMap::new(),
        }
    }

    /// Detects the first matching theme in `text`, bumps its counter and
    /// returns the reflection earned by the new count, if any.
    pub fn observe(&mut self, text: &str, turn: u32) -> Option<ThemeHit> {
        let theme = patterns::detect_theme(text)?;
        let entry = self.counts.entry(theme).or_insert(ThemeCount {
            theme,
            count: 0,
            last_seen_turn: turn,
        });
        entry.count += 1;
        entry.last_seen_turn = turn;
        let count = entry.count;
        tracing::debug!("Theme {} seen {} time(s)", theme, count);
        Some(ThemeHit {
            theme,
            count,
            reflection: self.reflection_for(theme, count),
        })
    }

    fn reflection_for(&self, theme: Theme, count: u32) -> Option<ThemeReflection> {
        let label = theme.label();
        let (strength, text) = if count == self.threshold {
            (
                ReflectionStrength::Soft,
                format!("I've noticed {label} has come up a couple of times."),
            )
        } else if count == self.threshold * 2 {
            (
                ReflectionStrength::Strong,
                format!(
                    "{} keeps coming back in what you share. It seems to matter a lot right now.",
                    capitalize(label)
                ),
            )
        } else if count > self.threshold * 2 {
            (
                ReflectionStrength::Pattern,
                format!(
                    "There seems to be a pattern here: {label} shows up again and again. Would it help to look at it together?"
                ),
            )
        } else {
            return None;
        };
        Some(ThemeReflection {
            theme,
            strength,
            text,
        })
    }

    pub fn count(&self, theme: Theme) -> u32 {
        self.counts.get(&theme).map_or(0, |c| c.count)
    }

    /// Most frequent first; equal counts favour the more recently seen.
    pub fn top(&self, limit: usize) -> Vec<ThemeCount> {
        let mut all: Vec<ThemeCount> = self.counts.values().copied().collect();
        all.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.last_seen_turn.cmp(&a.last_seen_turn))
        });
        all.truncate(limit);
        all
    }
}

pub(crate) fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
