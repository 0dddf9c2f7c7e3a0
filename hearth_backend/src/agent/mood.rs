use serde::{Deserialize, Serialize};

use crate::lexicon::Tone;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    #[default]
    Listening,
    Resonating,
    Concerned,
    Protective,
    Moved,
    Reflecting,
}

impl Mood {
    pub fn as_db_str(self) -> &'static str {
        match self {
            Mood::Listening => "listening",
            Mood::Resonating => "resonating",
            Mood::Concerned => "concerned",
            Mood::Protective => "protective",
            Mood::Moved => "moved",
            Mood::Reflecting => "reflecting",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "resonating" => Mood::Resonating,
            "concerned" => Mood::Concerned,
            "protective" => Mood::Protective,
            "moved" => Mood::Moved,
            "reflecting" => Mood::Reflecting,
            _ => Mood::Listening,
        }
    }

    /// Next mood given the user's tone. Anxiety that persists while already
    /// concerned turns protective; neutral input after a worried stretch
    /// moves into reflection rather than straight back to listening.
    pub fn transition(self, tone: Tone) -> Mood {
        match (self, tone) {
            (_, Tone::Warm) => Mood::Resonating,
            (_, Tone::Grateful) => Mood::Moved,
            (_, Tone::Angry) => Mood::Protective,
            (_, Tone::Sardonic) => Mood::Reflecting,
            (_, Tone::Sad) => Mood::Concerned,
            (Mood::Concerned | Mood::Protective, Tone::Anxious) => Mood::Protective,
            (_, Tone::Anxious) => Mood::Concerned,
            (Mood::Reflecting, Tone::Confused) => Mood::Listening,
            (_, Tone::Confused) => Mood::Reflecting,
            (Mood::Concerned | Mood::Protective, Tone::Neutral) => Mood::Reflecting,
            (_, Tone::Neutral) => Mood::Listening,
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_table() {
        assert_eq!(Mood::Listening.transition(Tone::Sad), Mood::Concerned);
        assert_eq!(Mood::Listening.transition(Tone::Anxious), Mood::Concerned);
        assert_eq!(Mood::Concerned.transition(Tone::Anxious), Mood::Protective);
        assert_eq!(Mood::Concerned.transition(Tone::Neutral), Mood::Reflecting);
        assert_eq!(Mood::Reflecting.transition(Tone::Confused), Mood::Listening);
        assert_eq!(Mood::Moved.transition(Tone::Warm), Mood::Resonating);
        assert_eq!(Mood::Listening.transition(Tone::Grateful), Mood::Moved);
    }

    #[test]
    fn db_strings_round_trip() {
        for mood in [
            Mood::Listening,
            Mood::Resonating,
            Mood::Concerned,
            Mood::Protective,
            Mood::Moved,
            Mood::Reflecting,
        ] {
            assert_eq!(Mood::from_db(mood.as_db_str()), mood);
        }
        assert_eq!(Mood::from_db("unknown"), Mood::Listening);
    }
}
