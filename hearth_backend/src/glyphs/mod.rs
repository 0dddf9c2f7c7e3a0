//! The glyph library: named emotional archetypes with a semantic vector.
//!
//! Glyphs are immutable `'static` data shared by every session.

pub mod selector;
pub mod templates;

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::lexicon::Tone;

/// Index of each component in [`Glyph::semantic_vector`].
pub const WARMTH: usize = 0;
pub const ENERGY: usize = 1;
pub const DEPTH: usize = 2;
pub const HOPE: usize = 3;
pub const AROUSAL: usize = 4;
pub const VALENCE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToneCategory {
    Sadness,
    Exhaustion,
    Anxiety,
    Anger,
    Grateful,
    Joy,
    Confused,
    Calm,
}

impl ToneCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ToneCategory::Sadness => "sadness",
            ToneCategory::Exhaustion => "exhaustion",
            ToneCategory::Anxiety => "anxiety",
            ToneCategory::Anger => "anger",
            ToneCategory::Grateful => "grateful",
            ToneCategory::Joy => "joy",
            ToneCategory::Confused => "confused",
            ToneCategory::Calm => "calm",
        }
    }

    /// Template category for a tone. Sadness splits on arousal: low-energy
    /// sadness reads as exhaustion.
    pub fn for_tone(tone: Tone, arousal: f32) -> Self {
        match tone {
            Tone::Sad if arousal >= 0.5 => ToneCategory::Sadness,
            Tone::Sad => ToneCategory::Exhaustion,
            Tone::Anxious => ToneCategory::Anxiety,
            Tone::Angry | Tone::Sardonic => ToneCategory::Anger,
            Tone::Grateful => ToneCategory::Grateful,
            Tone::Warm => ToneCategory::Joy,
            Tone::Confused => ToneCategory::Confused,
            Tone::Neutral => ToneCategory::Calm,
        }
    }
}

impl std::fmt::Display for ToneCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Glyph {
    pub name: &'static str,
    pub symbol: &'static str,
    pub description: &'static str,
    /// (warmth, energy, depth, hope, arousal, valence), each in [0, 1].
    pub semantic_vector: [f32; 6],
    pub tone_category: ToneCategory,
    pub aliases: &'static [&'static str],
    /// One line of imagery used by the optional poetic stage.
    pub imagery: &'static str,
}

impl Glyph {
    pub fn arousal(&self) -> f32 {
        self.semantic_vector[AROUSAL]
    }

    pub fn valence(&self) -> f32 {
        self.semantic_vector[VALENCE]
    }

    pub fn answers_to(&self, name: &str) -> bool {
        let name = name.trim();
        self.name.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(name))
    }
}

static GLYPHS: [Glyph; 17] = [
    Glyph {
        name: "Held Space",
        symbol: "◯",
        description: "A quiet container where nothing needs to be fixed yet.",
        semantic_vector: [0.7, 0.2, 0.6, 0.6, 0.2, 0.6],
        tone_category: ToneCategory::Calm,
        aliases: &["Recognized Stillness", "Stillness"],
        imagery: "Like a room with the lights low, there is space here.",
    },
    Glyph {
        name: "Quiet Ground",
        symbol: "▭",
        description: "Steady footing after a long day; ordinary and enough.",
        semantic_vector: [0.5, 0.3, 0.4, 0.6, 0.3, 0.6],
        tone_category: ToneCategory::Calm,
        aliases: &["Ground"],
        imagery: "Feet on the floor, one breath at a time.",
    },
    Glyph {
        name: "Loss",
        symbol: "◐",
        description: "The ache of something that is no longer there.",
        semantic_vector: [0.4, 0.2, 0.8, 0.3, 0.4, 0.2],
        tone_category: ToneCategory::Sadness,
        aliases: &["Absence"],
        imagery: "Half the circle is in shadow, and that is allowed.",
    },
    Glyph {
        name: "Grieving",
        symbol: "◑",
        description: "Slow, heavy mourning that asks for patience.",
        semantic_vector: [0.5, 0.2, 0.9, 0.3, 0.3, 0.1],
        tone_category: ToneCategory::Sadness,
        aliases: &["Grief", "Mourning"],
        imagery: "Grief moves like tide, not like a clock.",
    },
    Glyph {
        name: "Pain",
        symbol: "✶",
        description: "Sharp hurt that is hard to sit still with.",
        semantic_vector: [0.3, 0.5, 0.8, 0.2, 0.7, 0.1],
        tone_category: ToneCategory::Sadness,
        aliases: &["Hurt"],
        imagery: "Even sharp edges soften a little when they are named.",
    },
    Glyph {
        name: "Longing",
        symbol: "☾",
        description: "Missing someone or something, with a thread of hope.",
        semantic_vector: [0.6, 0.3, 0.7, 0.5, 0.4, 0.3],
        tone_category: ToneCategory::Sadness,
        aliases: &["Yearning"],
        imagery: "The moon is still there on the nights it is hard to see.",
    },
    Glyph {
        name: "Weariness",
        symbol: "⌇",
        description: "Bone-deep tiredness from carrying too much for too long.",
        semantic_vector: [0.4, 0.1, 0.5, 0.3, 0.2, 0.3],
        tone_category: ToneCategory::Exhaustion,
        aliases: &["Fatigue", "Depletion"],
        imagery: "Even a long road has places to sit down.",
    },
    Glyph {
        name: "Overwhelm",
        symbol: "≋",
        description: "Too many waves at once, with no gap between them.",
        semantic_vector: [0.3, 0.8, 0.6, 0.2, 0.9, 0.15],
        tone_category: ToneCategory::Anxiety,
        aliases: &["Flooding"],
        imagery: "Waves come in sets; there is always a lull after.",
    },
    Glyph {
        name: "Spiral",
        symbol: "⟲",
        description: "Thoughts looping back on themselves, faster each turn.",
        semantic_vector: [0.3, 0.7, 0.5, 0.3, 0.7, 0.25],
        tone_category: ToneCategory::Anxiety,
        aliases: &["Rumination"],
        imagery: "A loop can be slowed by noticing one turn of it.",
    },
    Glyph {
        name: "Restless Edge",
        symbol: "⌁",
        description: "A low hum of unease that will not settle.",
        semantic_vector: [0.3, 0.6, 0.4, 0.4, 0.55, 0.35],
        tone_category: ToneCategory::Anxiety,
        aliases: &["Unease"],
        imagery: "The hum is loud, and you are still here under it.",
    },
    Glyph {
        name: "Ember",
        symbol: "✹",
        description: "Hot anger with something important underneath it.",
        semantic_vector: [0.3, 0.8, 0.5, 0.3, 0.8, 0.15],
        tone_category: ToneCategory::Anger,
        aliases: &["Fire", "Heat"],
        imagery: "Heat like this usually means something mattered.",
    },
    Glyph {
        name: "Boundary",
        symbol: "▮",
        description: "The firm line that says this is not okay.",
        semantic_vector: [0.4, 0.7, 0.6, 0.5, 0.65, 0.3],
        tone_category: ToneCategory::Anger,
        aliases: &["Line"],
        imagery: "A line drawn clearly can be a kindness to yourself.",
    },
    Glyph {
        name: "Shared Light",
        symbol: "✦",
        description: "Warmth that grows when it is shared with someone.",
        semantic_vector: [0.9, 0.6, 0.5, 0.9, 0.6, 0.9],
        tone_category: ToneCategory::Joy,
        aliases: &["Warmth"],
        imagery: "Small lights still count as light.",
    },
    Glyph {
        name: "Spark",
        symbol: "✧",
        description: "A quick bright lift of excitement or delight.",
        semantic_vector: [0.8, 0.8, 0.3, 0.8, 0.8, 0.85],
        tone_category: ToneCategory::Joy,
        aliases: &["Delight"],
        imagery: "A spark is small, and it is how fires start.",
    },
    Glyph {
        name: "Open Hands",
        symbol: "❍",
        description: "Gratitude received and given back freely.",
        semantic_vector: [0.9, 0.4, 0.6, 0.8, 0.4, 0.9],
        tone_category: ToneCategory::Grateful,
        aliases: &["Gratitude"],
        imagery: "What you give with open hands tends to come back.",
    },
    Glyph {
        name: "Fog",
        symbol: "☁",
        description: "Not being able to see the next step clearly yet.",
        semantic_vector: [0.4, 0.3, 0.4, 0.4, 0.45, 0.4],
        tone_category: ToneCategory::Confused,
        aliases: &["Haze"],
        imagery: "Fog lifts from the edges first.",
    },
    Glyph {
        name: "Crossroads",
        symbol: "✕",
        description: "Standing between paths that each pull a different way.",
        semantic_vector: [0.4, 0.5, 0.6, 0.5, 0.55, 0.45],
        tone_category: ToneCategory::Confused,
        aliases: &["Fork"],
        imagery: "You do not have to pick a road to rest at the crossing.",
    },
];

/// Process-wide, read-only view over the glyph table.
#[derive(Debug)]
pub struct GlyphLibrary {
    glyphs: &'static [Glyph],
}

impl GlyphLibrary {
    pub fn global() -> &'static GlyphLibrary {
        static LIBRARY: OnceLock<GlyphLibrary> = OnceLock::new();
        LIBRARY.get_or_init(|| GlyphLibrary { glyphs: &GLYPHS })
    }

    pub fn all(&self) -> &'static [Glyph] {
        self.glyphs
    }

    /// Looks a glyph up by name or alias, ignoring case.
    pub fn find(&self, name: &str) -> Option<&'static Glyph> {
        self.glyphs.iter().find(|glyph| glyph.answers_to(name))
    }

    /// Glyphs in a category, in table order.
    pub fn in_category(&self, category: ToneCategory) -> Vec<&'static Glyph> {
        self.glyphs
            .iter()
            .filter(|glyph| glyph.tone_category == category)
            .collect()
    }
}
