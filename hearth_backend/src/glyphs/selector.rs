//! Maps an affect reading onto a glyph.
//!
//! A static `(tone, arousal band, valence band)` table is consulted first; if
//! it has no entry the closest glyph by (arousal, valence) wins.

use super::{Glyph, GlyphLibrary, AROUSAL, VALENCE};
use crate::lexicon::Tone;

/// Below this similarity no glyph is returned.
pub const MIN_SIMILARITY: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Low,
    Mid,
    High,
}

impl Band {
    pub fn arousal(arousal: f32) -> Self {
        if arousal < 0.33 {
            Band::Low
        } else if arousal <= 0.67 {
            Band::Mid
        } else {
            Band::High
        }
    }

    /// Valence bands apply to the raw signed valence, so every negative
    /// reading falls into `Low`.
    pub fn valence(valence: f32) -> Self {
        if valence < 0.3 {
            Band::Low
        } else if valence <= 0.7 {
            Band::Mid
        } else {
            Band::High
        }
    }
}

use Band::{High, Low, Mid};

/// (tone, arousal band, valence band) -> glyph name.
const STATIC_MAP: &[(Tone, Band, Band, &str)] = &[
    (Tone::Sad, Low, Low, "Grieving"),
    (Tone::Sad, Mid, Low, "Loss"),
    (Tone::Sad, High, Low, "Pain"),
    (Tone::Sad, Low, Mid, "Longing"),
    (Tone::Sad, Mid, Mid, "Longing"),
    (Tone::Anxious, Low, Low, "Restless Edge"),
    (Tone::Anxious, Mid, Low, "Spiral"),
    (Tone::Anxious, High, Low, "Overwhelm"),
    (Tone::Angry, Mid, Low, "Boundary"),
    (Tone::Angry, High, Low, "Ember"),
    (Tone::Sardonic, Low, Low, "Boundary"),
    (Tone::Sardonic, Mid, Low, "Boundary"),
    (Tone::Warm, Low, High, "Shared Light"),
    (Tone::Warm, Mid, Mid, "Shared Light"),
    (Tone::Warm, Mid, High, "Shared Light"),
    (Tone::Warm, High, Mid, "Spark"),
    (Tone::Warm, High, High, "Spark"),
    (Tone::Grateful, Low, High, "Open Hands"),
    (Tone::Grateful, Mid, High, "Open Hands"),
    (Tone::Confused, Low, Low, "Fog"),
    (Tone::Confused, Mid, Low, "Fog"),
    (Tone::Confused, Mid, Mid, "Crossroads"),
    (Tone::Neutral, Low, Low, "Held Space"),
    (Tone::Neutral, Low, Mid, "Held Space"),
    (Tone::Neutral, Mid, Low, "Quiet Ground"),
];

#[derive(Debug, Clone, Copy)]
pub struct GlyphSelector {
    library: &'static GlyphLibrary,
}

impl Default for GlyphSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl GlyphSelector {
    pub fn new() -> Self {
        Self {
            library: GlyphLibrary::global(),
        }
    }

    pub fn library(&self) -> &'static GlyphLibrary {
        self.library
    }

    pub fn select(&self, tone: Tone, arousal: f32, valence: f32) -> Option<&'static Glyph> {
        let arousal_band = Band::arousal(arousal);
        let valence_band = Band::valence(valence);
        let mapped = STATIC_MAP
            .iter()
            .find(|(t, a, v, _)| *t == tone && *a == arousal_band && *v == valence_band)
            .and_then(|(_, _, _, name)| self.library.find(name));
        if let Some(glyph) = mapped {
            return Some(glyph);
        }

        let valence01 = ((valence + 1.0) / 2.0).clamp(0.0, 1.0);
        let (glyph, similarity) = best_by(self.library.all(), |glyph| {
            let da = glyph.semantic_vector[AROUSAL] - arousal;
            let dv = glyph.semantic_vector[VALENCE] - valence01;
            similarity_from_distance((da * da + dv * dv).sqrt())
        })?;
        tracing::debug!(
            "No static glyph for {} ({:?}, {:?}); nearest is {} at {:.2}",
            tone,
            arousal_band,
            valence_band,
            glyph.name,
            similarity
        );
        (similarity >= MIN_SIMILARITY).then_some(glyph)
    }

    /// Glyphs close to `glyph` over the full semantic vector, most similar
    /// first. The glyph itself is never included.
    pub fn find_similar(
        &self,
        glyph: &Glyph,
        threshold: f32,
        limit: usize,
    ) -> Vec<(&'static Glyph, f32)> {
        let mut similar: Vec<(&'static Glyph, f32)> = self
            .library
            .all()
            .iter()
            .filter(|other| other.name != glyph.name)
            .map(|other| (other, vector_similarity(&glyph.semantic_vector, &other.semantic_vector)))
            .filter(|(_, similarity)| *similarity >= threshold)
            .collect();
        similar.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.name.cmp(b.0.name)));
        similar.truncate(limit);
        similar
    }
}

fn similarity_from_distance(distance: f32) -> f32 {
    1.0 - distance / 6f32.sqrt()
}

fn vector_similarity(a: &[f32; 6], b: &[f32; 6]) -> f32 {
    let distance = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt();
    similarity_from_distance(distance)
}

/// Highest-scoring glyph; equal scores go to the lexicographically first name.
fn best_by(
    glyphs: &'static [Glyph],
    score: impl Fn(&Glyph) -> f32,
) -> Option<(&'static Glyph, f32)> {
    glyphs
        .iter()
        .map(|glyph| (glyph, score(glyph)))
        .fold(None, |best, (glyph, s)| match best {
            Some((current, cs))
                if cs > s || (cs == s && current.name <= glyph.name) =>
            {
                Some((current, cs))
            }
            _ => Some((glyph, s)),
        })
}
