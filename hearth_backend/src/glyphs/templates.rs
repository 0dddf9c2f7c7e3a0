//! Short, grounded reply templates keyed by tone category and glyph.
//!
//! Every template names a feeling plainly and ends by inviting the user to
//! keep going. None of them quote a glyph description.

use super::{GlyphLibrary, ToneCategory};

pub struct TemplateSet {
    pub category: ToneCategory,
    pub glyph: &'static str,
    pub lines: &'static [&'static str],
}

/// Listed in category order; within a category the first set is the fallback.
pub static TEMPLATES: &[TemplateSet] = &[
    TemplateSet {
        category: ToneCategory::Sadness,
        glyph: "Grieving",
        lines: &[
            "That sounds like real grief, the slow kind that doesn't hurry. What are you missing most right now?",
            "Grief like this takes its own time. What has today been like while carrying it?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Sadness,
        glyph: "Loss",
        lines: &[
            "It sounds like something important is missing, and that hurts. What feels most absent today?",
            "There's a real ache in what you're describing. What do you wish were different right now?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Sadness,
        glyph: "Pain",
        lines: &[
            "That sounds genuinely painful, the sharp kind that's hard to sit still with. What's hurting most?",
            "It's clear how much this hurts. What would make the next hour a little easier?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Sadness,
        glyph: "Longing",
        lines: &[
            "It sounds like you're missing something, or someone, quite a lot. What do you find yourself reaching for?",
            "There's a kind of longing in that. What would it feel like to have some of it back?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Exhaustion,
        glyph: "Weariness",
        lines: &[
            "That sounds draining, like you've been running on empty for a while. What's been taking the most out of you?",
            "You sound worn down and tired in a deep way. What would real rest look like for you right now?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Exhaustion,
        glyph: "Loss",
        lines: &[
            "That sounds heavy, like the exhaustion has been building for a while. What's been weighing on you most?",
            "Being that tired makes everything feel heavier. What has been draining you lately?",
            "It sounds like you're carrying a lot of weight right now. Where do you feel the tiredness most?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Exhaustion,
        glyph: "Grieving",
        lines: &[
            "That sounds heavy and tiring to carry, the kind of sadness that drains you. What's been hardest today?",
            "Sadness can be exhausting on its own. What has been weighing on you the most?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Anxiety,
        glyph: "Overwhelm",
        lines: &[
            "That sounds like a lot coming at you at once. What feels most urgent in this moment?",
            "It sounds overwhelming, with no gap to breathe. What's the loudest thing on your mind?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Anxiety,
        glyph: "Spiral",
        lines: &[
            "It sounds like your thoughts keep looping back on the same worry. What's the thought that keeps returning?",
            "That worry sounds like it's been circling. What usually sets it off?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Anxiety,
        glyph: "Restless Edge",
        lines: &[
            "There's an unsettled feeling in what you're saying. Where do you notice it in your body?",
            "It sounds like you can't quite settle. What's been keeping you on edge?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Anger,
        glyph: "Ember",
        lines: &[
            "That sounds really infuriating. What happened that crossed the line for you?",
            "You sound really angry, and it makes sense to feel that. What set it off?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Anger,
        glyph: "Boundary",
        lines: &[
            "It sounds like something wasn't okay with you, and you're right to notice that. What felt unfair?",
            "That sounds frustrating, like a line got crossed. What do you wish had happened instead?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Joy,
        glyph: "Shared Light",
        lines: &[
            "It sounds like the good feeling you hoped for isn't quite there right now. What's getting in the way of it?",
            "That sounds like a dimmer day than you wanted. What would bring a little warmth back?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Joy,
        glyph: "Spark",
        lines: &[
            "It sounds like the excitement has gone a bit flat. What took the energy out of it?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Grateful,
        glyph: "Open Hands",
        lines: &[
            "I'm glad something helped, even on a hard day. What made the difference?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Confused,
        glyph: "Fog",
        lines: &[
            "It sounds hard to see clearly right now, and that's unsettling. What part feels most unclear?",
            "Not knowing which way to go is its own kind of stress. What's the piece you keep getting stuck on?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Confused,
        glyph: "Crossroads",
        lines: &[
            "It sounds like you're pulled in more than one direction. What are the options you're weighing?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Calm,
        glyph: "Held Space",
        lines: &[
            "It sounds like things are a bit low right now. What's on your mind?",
            "I'm here with you. What feels most present for you today?",
        ],
    },
    TemplateSet {
        category: ToneCategory::Calm,
        glyph: "Quiet Ground",
        lines: &["That sounds like a fairly ordinary stretch. How are you feeling about it?"],
    },
];

/// Plain reflections used when the template branch does not apply.
pub fn reflective_bank(category: ToneCategory) -> &'static [&'static str] {
    match category {
        ToneCategory::Sadness => &[
            "That sounds hard. I'm here with you. What's been sitting with you the most?",
            "I'm sorry it's been like this. What would feel supportive right now?",
        ],
        ToneCategory::Exhaustion => &[
            "It sounds like you're running low. What has your energy been like today?",
            "That sounds tiring. What would help you recover a little?",
        ],
        ToneCategory::Anxiety => &[
            "That sounds stressful. What part of it worries you most?",
            "I hear a lot of pressure in that. What would help you feel a bit steadier?",
        ],
        ToneCategory::Anger => &[
            "That sounds frustrating. What happened?",
            "It makes sense to be annoyed by that. What's bothering you most about it?",
        ],
        ToneCategory::Grateful => &[
            "Thank you for telling me that. What's been helping?",
            "I'm really glad to hear it. What made it feel good?",
        ],
        ToneCategory::Joy => &[
            "That's good to hear. What's been going well?",
            "I love hearing that. What made it feel that way?",
        ],
        ToneCategory::Confused => &[
            "It sounds like a lot is unclear right now. What are you trying to figure out?",
            "That sounds confusing. Which part would help most to talk through?",
        ],
        ToneCategory::Calm => &[
            "I'm listening. What's on your mind today?",
            "Thanks for checking in. How are you feeling right now?",
        ],
    }
}

/// Template lines for `(category, glyph)`, falling back to the category's
/// first template set. Returns the glyph the lines belong to.
pub fn templates_for(
    category: ToneCategory,
    glyph: Option<&str>,
) -> Option<(&'static str, &'static [&'static str])> {
    let exact = glyph.and_then(|name| {
        TEMPLATES
            .iter()
            .find(|set| set.category == category && set.glyph.eq_ignore_ascii_case(name))
    });
    exact
        .or_else(|| TEMPLATES.iter().find(|set| set.category == category))
        .map(|set| (set.glyph, set.lines))
}

/// Lowercases glyph names that follow "the" mid-sentence so they read as
/// ordinary words ("and the Loss" becomes "and the loss"). A glyph name at
/// the start of a sentence keeps its capital.
pub fn normalize_glyph_capitalization(text: &str) -> String {
    let mut out = text.to_string();
    for glyph in GlyphLibrary::global().all() {
        let lower = glyph.name.to_lowercase();
        for article in ["the", "The"] {
            let from = format!("{article} {}", glyph.name);
            if out.contains(&from) {
                out = out.replace(&from, &format!("{article} {lower}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::DEFAULT_POETIC_MARKERS;

    #[test]
    fn templates_are_short_and_invite_a_reply() {
        let library = GlyphLibrary::global();
        for set in TEMPLATES {
            let glyph = library.find(set.glyph).unwrap();
            for line in set.lines {
                assert!(line.chars().count() <= 200, "{line}");
                assert!(line.ends_with('?'), "{line}");
                assert!(!line.contains(glyph.description));
                let lower = line.to_lowercase();
                assert!(
                    !DEFAULT_POETIC_MARKERS.iter().any(|m| lower.contains(m)),
                    "{line}"
                );
                assert!(line.split_whitespace().count() <= 40);
            }
        }
    }

    #[test]
    fn exhaustion_loss_templates_name_the_weight() {
        let (glyph, lines) = templates_for(ToneCategory::Exhaustion, Some("Loss")).unwrap();
        assert_eq!(glyph, "Loss");
        for line in lines {
            let lower = line.to_lowercase();
            assert!(
                ["heavy", "weight", "exhaust", "tired", "drain"]
                    .iter()
                    .any(|w| lower.contains(w)),
                "{line}"
            );
            assert!((20..=250).contains(&line.len()));
        }
    }

    #[test]
    fn unknown_glyph_falls_back_to_first_in_category() {
        let (glyph, _) = templates_for(ToneCategory::Anxiety, Some("Ember")).unwrap();
        assert_eq!(glyph, "Overwhelm");
        let (glyph, _) = templates_for(ToneCategory::Calm, None).unwrap();
        assert_eq!(glyph, "Held Space");
    }

    #[test]
    fn glyph_names_after_articles_are_lowercased() {
        assert_eq!(
            normalize_glyph_capitalization("You named the Loss and the Held Space. Loss is real."),
            "You named the loss and the held space. Loss is real."
        );
        assert_eq!(
            normalize_glyph_capitalization("The Spiral again?"),
            "The spiral again?"
        );
    }

    #[test]
    fn reflective_banks_are_never_empty() {
        for set in TEMPLATES {
            assert!(!reflective_bank(set.category).is_empty());
        }
    }
}
