//! Catches over-poetic or glyph-quoting replies and enforces the output
//! contract (no metadata tags, non-empty, bounded length).

use crate::glyphs::Glyph;
use crate::lexicon::DEFAULT_POETIC_MARKERS;

pub const GROUNDED_FALLBACK: &str = "I hear you. Can you say a bit more about how that feels?";

const METADATA_PREFIXES: &[&str] = &["Resonant Glyph:", "Local decoding:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SanitizeReason {
    PoeticMarker(String),
    TooLong(usize),
    GlyphDescription,
}

#[derive(Debug, Clone)]
pub struct Sanitizer {
    markers: Vec<String>,
    max_words: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_POETIC_MARKERS.iter().map(|m| m.to_string()).collect(),
            40,
        )
    }
}

impl Sanitizer {
    pub fn new(markers: Vec<String>, max_words: usize) -> Self {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            max_words,
        }
    }

    /// Why `candidate` must be replaced, if it must.
    pub fn check(&self, candidate: &str, glyph: Option<&Glyph>) -> Option<SanitizeReason> {
        let lower = candidate.to_lowercase();
        if let Some(marker) = self.markers.iter().find(|m| lower.contains(m.as_str())) {
            return Some(SanitizeReason::PoeticMarker(marker.clone()));
        }
        let words = candidate.split_whitespace().count();
        if words > self.max_words {
            return Some(SanitizeReason::TooLong(words));
        }
        if let Some(glyph) = glyph {
            let description = glyph.description.trim().to_lowercase();
            let trimmed = lower.trim();
            if !description.is_empty()
                && (trimmed == description || trimmed.contains(&description))
            {
                return Some(SanitizeReason::GlyphDescription);
            }
        }
        None
    }
}

/// Removes `[PROSODY:...]` tags and `Resonant Glyph:` / `Local decoding:`
/// lines, then collapses whitespace.
pub fn strip_metadata(text: &str) -> String {
    let mut without_tags = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[PROSODY:") {
        without_tags.push_str(&rest[..start]);
        match rest[start..].find(']') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = "";
                break;
            }
        }
    }
    without_tags.push_str(rest);

    let mut kept = Vec::new();
    for line in without_tags.lines() {
        let cut = METADATA_PREFIXES
            .iter()
            .filter_map(|prefix| line.find(prefix))
            .min();
        let line = match cut {
            Some(index) => &line[..index],
            None => line,
        };
        kept.push(line);
    }
    kept.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `text` to at most `max_chars` characters, at the last sentence end
/// that fits, else at the last word boundary.
pub fn enforce_length(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let byte_limit = text
        .char_indices()
        .nth(max_chars)
        .map_or(text.len(), |(index, _)| index);
    let window = &text[..byte_limit];
    if let Some(end) = window.rfind(['.', '!', '?']) {
        if end > 0 {
            return window[..=end].trim().to_string();
        }
    }
    match window.rfind(char::is_whitespace) {
        Some(space) if space > 0 => window[..space].trim_end().to_string(),
        _ => window.to_string(),
    }
}

/// The output contract applied to every reply.
pub fn finalize(text: &str, max_chars: usize) -> String {
    let stripped = strip_metadata(text);
    let bounded = enforce_length(&stripped, max_chars);
    if bounded.trim().is_empty() {
        GROUNDED_FALLBACK.to_string()
    } else {
        bounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyphs::GlyphLibrary;

    #[test]
    fn poetic_markers_and_length_trigger_replacement() {
        let sanitizer = Sanitizer::default();
        assert_eq!(
            sanitizer.check("You are steeped in a luminous ache.", None),
            Some(SanitizeReason::PoeticMarker("steeped".into()))
        );
        let long = "word ".repeat(41);
        assert_eq!(sanitizer.check(&long, None), Some(SanitizeReason::TooLong(41)));
        assert_eq!(sanitizer.check("That sounds hard. What happened?", None), None);
    }

    #[test]
    fn markers_come_from_configuration() {
        let sanitizer = Sanitizer::new(vec!["Tapestry".into(), "  ".into()], 40);
        assert!(sanitizer.check("a tapestry of feeling", None).is_some());
        assert!(sanitizer.check("steeped", None).is_none());
    }

    #[test]
    fn quoting_the_glyph_description_is_rejected() {
        let loss = GlyphLibrary::global().find("Loss").unwrap();
        let sanitizer = Sanitizer::default();
        assert_eq!(
            sanitizer.check(loss.description, Some(loss)),
            Some(SanitizeReason::GlyphDescription)
        );
        let wrapped = format!("I sense this: {}", loss.description);
        assert_eq!(
            sanitizer.check(&wrapped, Some(loss)),
            Some(SanitizeReason::GlyphDescription)
        );
    }

    #[test]
    fn metadata_is_stripped() {
        let raw = "[PROSODY: slow] That sounds heavy.\nResonant Glyph: Loss ◐\nWhat's weighing on you? Local decoding: sad";
        assert_eq!(strip_metadata(raw), "That sounds heavy. What's weighing on you?");
        assert_eq!(strip_metadata("[PROSODY: unterminated"), "");
    }

    #[test]
    fn length_is_enforced_at_boundaries() {
        let text = "First sentence here. Second sentence is quite a bit longer than the first.";
        assert_eq!(enforce_length(text, 30), "First sentence here.");
        assert_eq!(enforce_length("alpha beta gamma delta", 13), "alpha beta");
        assert_eq!(enforce_length("short", 400), "short");
    }

    #[test]
    fn finalize_never_returns_empty() {
        assert_eq!(finalize("Resonant Glyph: Loss", 400), GROUNDED_FALLBACK);
        assert!(finalize(&"x ".repeat(500), 400).chars().count() <= 400);
    }
}
