//! Conversation memory: the turn log plus an evolving picture of what the
//! user is dealing with.

pub mod rehydrate;
pub mod themes;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::affect::{AffectAnalysis, AffectParser};
use crate::composer::ResponseClass;
use crate::lexicon::{self, Tone};
use crate::patterns::Theme;
use crate::persistence::StoredMessage;

pub use themes::{ThemeCount, ThemeHit, ThemeReflection, ThemeTracker};

pub const CONFIDENCE_STEP: f32 = 0.15;
pub const CONFIDENCE_CAP: f32 = 0.95;
const INTENSITY_WINDOW: usize = 3;
const MAX_PRIMARY_AFFECTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based position in the conversation, assigned by [`ConversationMemory::add_turn`].
    pub n: u32,
    pub utterance: String,
    pub timestamp: DateTime<Utc>,
    pub affect: AffectAnalysis,
    pub glyph_chosen: Option<String>,
    pub response: String,
    #[serde(default)]
    pub commitments_added: Vec<String>,
    pub response_class: ResponseClass,
}

impl Turn {
    pub fn new(
        utterance: impl Into<String>,
        affect: AffectAnalysis,
        glyph_chosen: Option<String>,
        response: impl Into<String>,
        response_class: ResponseClass,
    ) -> Self {
        Self {
            n: 0,
            utterance: utterance.into(),
            timestamp: Utc::now(),
            affect,
            glyph_chosen,
            response: response.into(),
            commitments_added: Vec::new(),
            response_class,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intensity {
    #[default]
    Low,
    Medium,
    High,
}

impl Intensity {
    fn from_arousal(arousal: f32) -> Self {
        if arousal < 0.4 {
            Intensity::Low
        } else if arousal < 0.7 {
            Intensity::Medium
        } else {
            Intensity::High
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Work,
    Family,
    Relationship,
    Health,
    Finances,
}

impl Domain {
    const KEYWORDS: &'static [(Domain, &'static [&'static str])] = &[
        (
            Domain::Work,
            &[
                "work", "job", "boss", "deadline", "deadlines", "meeting", "meetings", "project",
                "office", "coworker", "coworkers", "manager", "career", "shift",
            ],
        ),
        (
            Domain::Family,
            &[
                "family", "mom", "dad", "mother", "father", "parents", "kids", "son", "daughter",
                "co-parent", "co-parenting", "coparenting", "custody", "sister", "brother",
            ],
        ),
        (
            Domain::Relationship,
            &[
                "partner", "husband", "wife", "boyfriend", "girlfriend", "marriage", "divorce",
                "relationship", "dating", "breakup", "separated",
            ],
        ),
        (
            Domain::Health,
            &[
                "sleep", "doctor", "sick", "chest", "headache", "health", "diagnosis",
                "diagnosed", "illness",
            ],
        ),
        (
            Domain::Finances,
            &["money", "bills", "rent", "debt", "budget", "paycheck", "finances", "loan"],
        ),
    ];

    pub fn label(self) -> &'static str {
        match self {
            Domain::Work => "work",
            Domain::Family => "family",
            Domain::Relationship => "your relationship",
            Domain::Health => "your health",
            Domain::Finances => "money",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtPattern {
    Shutdown,
    Rumination,
    SelfCriticism,
    Catastrophizing,
    Avoidance,
}

impl ThoughtPattern {
    const TRIGGERS: &'static [(ThoughtPattern, &'static [&'static str])] = &[
        (
            ThoughtPattern::Shutdown,
            &[
                "shut down", "shutting down", "shuts down", "freeze", "freezing", "frozen",
                "go numb", "checked out", "check out", "withdraw",
            ],
        ),
        (
            ThoughtPattern::Rumination,
            &[
                "can't stop thinking", "overthinking", "keep thinking", "over and over",
                "replaying", "can't switch off",
            ],
        ),
        (
            ThoughtPattern::SelfCriticism,
            &[
                "my fault", "i'm useless", "i'm a failure", "not good enough", "hate myself",
                "i'm stupid",
            ],
        ),
        (
            ThoughtPattern::Catastrophizing,
            &[
                "worst case", "everything is ruined", "fall apart", "never going to",
                "it's all over",
            ],
        ),
        (
            ThoughtPattern::Avoidance,
            &["avoiding", "putting it off", "procrastinating", "can't face", "ignoring it"],
        ),
    ];

    /// How the pattern is named back to the user.
    pub fn phrase(self) -> &'static str {
        match self {
            ThoughtPattern::Shutdown => "shutting down",
            ThoughtPattern::Rumination => "your thoughts looping",
            ThoughtPattern::SelfCriticism => "being hard on yourself",
            ThoughtPattern::Catastrophizing => "expecting the worst",
            ThoughtPattern::Avoidance => "avoiding it",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCapacity {
    #[default]
    Unknown,
    Depleted,
    Limited,
    Available,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgencyState {
    #[default]
    Unknown,
    Stuck,
    Seeking,
    Acting,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IntegratedState {
    pub primary_affects: Vec<Tone>,
    pub secondary_affects: Vec<Tone>,
    pub intensity: Intensity,
    pub domains: Vec<Domain>,
    pub thought_patterns: Vec<ThoughtPattern>,
    pub action_capacity: ActionCapacity,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CausalChain {
    /// Immediate stressors, as phrased back to the user.
    pub triggers: Vec<String>,
    pub mechanisms: Vec<ThoughtPattern>,
    /// Physical responses, as phrased back to the user.
    pub manifestations: Vec<String>,
    pub agency_state: AgencyState,
}

impl CausalChain {
    /// Stressor, pattern and physical response are all known.
    pub fn is_complete(&self) -> bool {
        !self.triggers.is_empty() && !self.mechanisms.is_empty() && !self.manifestations.is_empty()
    }
}

const STRESSORS: &[(&str, &str)] = &[
    ("deadline", "deadlines"),
    ("deadlines", "deadlines"),
    ("boss", "your boss"),
    ("meeting", "meetings"),
    ("meetings", "meetings"),
    ("project", "the project"),
    ("work", "work"),
    ("job", "work"),
    ("divorce", "the divorce"),
    ("custody", "custody"),
    ("bills", "bills"),
    ("rent", "rent"),
    ("money", "money"),
    ("exam", "exams"),
    ("exams", "exams"),
    ("argument", "conflict at home"),
    ("fight", "conflict at home"),
    ("fighting", "conflict at home"),
];

const PHYSICAL_RESPONSES: &[(&str, &str)] = &[
    ("chest", "the tightness in your chest"),
    ("heart racing", "your racing heart"),
    ("racing heart", "your racing heart"),
    ("headache", "the headaches"),
    ("headaches", "the headaches"),
    ("stomach", "the knot in your stomach"),
    ("can't sleep", "the trouble sleeping"),
    ("insomnia", "the trouble sleeping"),
    ("jaw", "your clenched jaw"),
    ("shoulders", "the tension in your shoulders"),
    ("shaking", "the shaking"),
    ("tension", "the tension in your body"),
    ("tight", "the tightness in your body"),
];

const DEPLETED_MARKERS: &[&str] = &["exhausted", "drained", "no energy", "burnt out", "burned out", "can't even"];
const LIMITED_MARKERS: &[&str] = &["stuck", "overwhelmed", "can't", "too much"];
const SEEKING_MARKERS: &[&str] = &["i want", "i need", "how do i", "what should i", "help me"];
const ACTING_MARKERS: &[&str] = &["i'll try", "i tried", "i started", "i'm going to", "ready"];

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Domains mentioned in `text`, in declaration order.
pub fn domains_in(text: &str) -> Vec<Domain> {
    let folded = lexicon::fold(text);
    Domain::KEYWORDS
        .iter()
        .filter(|(_, words)| lexicon::contains_any_word(&folded, words))
        .map(|(domain, _)| *domain)
        .collect()
}

pub fn thought_patterns_in(text: &str) -> Vec<ThoughtPattern> {
    let folded = lexicon::fold(text);
    ThoughtPattern::TRIGGERS
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| folded.contains(p)))
        .map(|(pattern, _)| *pattern)
        .collect()
}

fn labels_in(folded: &str, table: &[(&str, &'static str)]) -> Vec<String> {
    let mut labels = Vec::new();
    for (keyword, label) in table {
        if lexicon::contains_word(folded, keyword) {
            push_unique(&mut labels, label.to_string());
        }
    }
    labels
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
    integrated_state: IntegratedState,
    causal_chain: CausalChain,
    themes: ThemeTracker,
    last_assistant_message: Option<String>,
    pattern_recognized: bool,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::with_reflection_threshold(themes::DEFAULT_REFLECTION_THRESHOLD)
    }

    pub fn with_reflection_threshold(threshold: u32) -> Self {
        Self {
            turns: Vec::new(),
            integrated_state: IntegratedState::default(),
            causal_chain: CausalChain::default(),
            themes: ThemeTracker::new(threshold),
            last_assistant_message: None,
            pattern_recognized: false,
        }
    }

    /// Appends a turn, numbering it, and folds it into the integrated state,
    /// causal chain and theme counters. Returns the theme hit, if any.
    pub fn add_turn(&mut self, mut turn: Turn) -> Option<ThemeHit> {
        turn.n = self.turns.len() as u32 + 1;
        self.update_integrated_state(&turn);
        self.update_causal_chain(&turn.utterance);
        let hit = self.themes.observe(&turn.utterance, turn.n);
        if !turn.response.is_empty() {
            self.last_assistant_message = Some(turn.response.clone());
        }
        self.turns.push(turn);
        hit
    }

    /// Counts the theme in `text` against the next turn number without
    /// appending a turn.
    pub fn detect_theme(&mut self, text: &str) -> Option<ThemeHit> {
        self.themes.observe(text, self.turns.len() as u32 + 1)
    }

    fn update_integrated_state(&mut self, turn: &Turn) {
        let state = &mut self.integrated_state;
        let affect = &turn.affect;

        if affect.tone != Tone::Neutral || state.primary_affects.is_empty() {
            state.primary_affects.retain(|tone| *tone != affect.tone);
            state.primary_affects.insert(0, affect.tone);
            state.primary_affects.truncate(MAX_PRIMARY_AFFECTS);
        }
        for tone in &affect.secondary_tones {
            if !state.primary_affects.contains(tone) {
                push_unique(&mut state.secondary_affects, *tone);
            }
        }
        state
            .secondary_affects
            .retain(|tone| !state.primary_affects.contains(tone));

        let recent: Vec<f32> = self
            .turns
            .iter()
            .rev()
            .take(INTENSITY_WINDOW - 1)
            .map(|t| t.affect.arousal)
            .chain(std::iter::once(affect.arousal))
            .collect();
        let mean = recent.iter().sum::<f32>() / recent.len() as f32;
        state.intensity = Intensity::from_arousal(mean);

        for domain in domains_in(&turn.utterance) {
            push_unique(&mut state.domains, domain);
        }
        for pattern in thought_patterns_in(&turn.utterance) {
            push_unique(&mut state.thought_patterns, pattern);
        }

        let folded = lexicon::fold(&turn.utterance);
        if lexicon::contains_any_word(&folded, DEPLETED_MARKERS) {
            state.action_capacity = ActionCapacity::Depleted;
        } else if lexicon::contains_any_word(&folded, LIMITED_MARKERS) {
            state.action_capacity = ActionCapacity::Limited;
        } else if lexicon::contains_any_word(&folded, ACTING_MARKERS)
            || lexicon::contains_any_word(&folded, SEEKING_MARKERS)
        {
            state.action_capacity = ActionCapacity::Available;
        }

        state.confidence = (state.confidence + CONFIDENCE_STEP).min(CONFIDENCE_CAP);
    }

    fn update_causal_chain(&mut self, utterance: &str) {
        let folded = lexicon::fold(utterance);
        let chain = &mut self.causal_chain;
        for trigger in labels_in(&folded, STRESSORS) {
            push_unique(&mut chain.triggers, trigger);
        }
        for pattern in thought_patterns_in(utterance) {
            push_unique(&mut chain.mechanisms, pattern);
        }
        for manifestation in labels_in(&folded, PHYSICAL_RESPONSES) {
            push_unique(&mut chain.manifestations, manifestation);
        }
        if lexicon::contains_any_word(&folded, ACTING_MARKERS) {
            chain.agency_state = AgencyState::Acting;
        } else if lexicon::contains_any_word(&folded, SEEKING_MARKERS) {
            chain.agency_state = AgencyState::Seeking;
        } else if lexicon::contains_any_word(&folded, LIMITED_MARKERS) {
            chain.agency_state = AgencyState::Stuck;
        }
    }

    /// Replays stored messages as restored turns so a resumed conversation
    /// keeps its integrated state. Only valid on an empty memory.
    pub fn restore(&mut self, messages: &[StoredMessage], parser: &AffectParser) {
        if !self.turns.is_empty() {
            tracing::warn!("Refusing to restore into a conversation that already has turns");
            return;
        }
        for message in messages {
            let mut turn = Turn::new(
                message.user.clone(),
                parser.analyze(&message.user),
                None,
                message.assistant.clone(),
                ResponseClass::Restored,
            );
            turn.timestamp = message.timestamp;
            self.add_turn(turn);
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// User and assistant messages so far (two per turn).
    pub fn message_count(&self) -> usize {
        self.turns.len() * 2
    }

    pub fn integrated_state(&self) -> &IntegratedState {
        &self.integrated_state
    }

    pub fn causal_chain(&self) -> &CausalChain {
        &self.causal_chain
    }

    pub fn last_assistant_message(&self) -> Option<&str> {
        self.last_assistant_message.as_deref()
    }

    pub fn last_turn(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The last `window` assistant replies, oldest first.
    pub fn recent_assistant_messages(&self, window: usize) -> Vec<String> {
        let start = self.turns.len().saturating_sub(window);
        self.turns[start..]
            .iter()
            .map(|turn| turn.response.clone())
            .collect()
    }

    pub fn get_top_themes(&self, limit: usize) -> Vec<ThemeCount> {
        self.themes.top(limit)
    }

    pub fn theme_count(&self, theme: Theme) -> u32 {
        self.themes.count(theme)
    }

    pub fn pattern_recognized(&self) -> bool {
        self.pattern_recognized
    }

    pub fn mark_pattern_recognized(&mut self) {
        self.pattern_recognized = true;
    }

    pub fn to_stored_messages(&self) -> Vec<StoredMessage> {
        self.turns
            .iter()
            .map(|turn| StoredMessage {
                user: turn.utterance.clone(),
                assistant: turn.response.clone(),
                timestamp: turn.timestamp,
                processing_time: None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(text: &str, reply: &str) -> Turn {
        Turn::new(
            text,
            AffectParser::new().analyze(text),
            None,
            reply,
            ResponseClass::Reflective,
        )
    }

    #[test]
    fn turns_are_numbered_and_append_only() {
        let mut memory = ConversationMemory::new();
        memory.add_turn(turn("work is crushing me", "That sounds like a lot."));
        let first = memory.turns()[0].clone();
        memory.add_turn(turn("I shut down every night", "What happens then?"));

        assert_eq!(memory.turns()[0], first);
        let numbers: Vec<u32> = memory.turns().iter().map(|t| t.n).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(memory.last_assistant_message(), Some("What happens then?"));
        assert_eq!(memory.message_count(), 4);
    }

    #[test]
    fn confidence_is_monotone_and_capped() {
        let mut memory = ConversationMemory::new();
        let mut previous = memory.integrated_state().confidence;
        for i in 0..10 {
            memory.add_turn(turn(&format!("message {i}"), "ok"));
            let now = memory.integrated_state().confidence;
            assert!(now >= previous);
            assert!(now <= CONFIDENCE_CAP);
            previous = now;
        }
        assert!((previous - CONFIDENCE_CAP).abs() < 1e-6);
    }

    #[test]
    fn causal_chain_collects_stressor_pattern_and_body() {
        let mut memory = ConversationMemory::new();
        memory.add_turn(turn("The deadline at work is brutal and my boss keeps pushing", "a"));
        assert!(!memory.causal_chain().is_complete());
        memory.add_turn(turn("I just shut down when it gets like this", "b"));
        memory.add_turn(turn("and my chest gets tight", "c"));

        let chain = memory.causal_chain();
        assert!(chain.is_complete());
        assert_eq!(chain.triggers[0], "deadlines");
        assert_eq!(chain.mechanisms, vec![ThoughtPattern::Shutdown]);
        assert_eq!(chain.manifestations[0], "the tightness in your chest");

        let state = memory.integrated_state();
        assert_eq!(state.domains[0], Domain::Work);
        assert!(state.domains.contains(&Domain::Health));
        assert_eq!(state.thought_patterns, vec![ThoughtPattern::Shutdown]);
    }

    #[test]
    fn integrated_state_tracks_recent_affect() {
        let mut memory = ConversationMemory::new();
        memory.add_turn(turn("I'm so exhausted", "a"));
        let state = memory.integrated_state();
        assert_eq!(state.primary_affects, vec![Tone::Sad]);
        assert_eq!(state.action_capacity, ActionCapacity::Depleted);

        memory.add_turn(turn("and honestly angry about it", "b"));
        let state = memory.integrated_state();
        assert_eq!(state.primary_affects, vec![Tone::Angry, Tone::Sad]);
        assert_eq!(state.intensity, Intensity::Medium);
    }

    #[test]
    fn restore_replays_stored_messages() {
        let messages = vec![
            StoredMessage {
                user: "work has been brutal".into(),
                assistant: "That sounds heavy.".into(),
                timestamp: Utc::now(),
                processing_time: Some(12.0),
            },
            StoredMessage {
                user: "my boss again".into(),
                assistant: "What happened?".into(),
                timestamp: Utc::now(),
                processing_time: None,
            },
        ];
        let mut memory = ConversationMemory::new();
        memory.restore(&messages, &AffectParser::new());
        assert_eq!(memory.len(), 2);
        assert!(memory
            .turns()
            .iter()
            .all(|t| t.response_class == ResponseClass::Restored));
        assert_eq!(memory.theme_count(Theme::WorkStress), 2);
        assert_eq!(memory.to_stored_messages()[1].assistant, "What happened?");
    }

    #[test]
    fn recent_assistant_messages_are_oldest_first() {
        let mut memory = ConversationMemory::new();
        for reply in ["one", "two", "three"] {
            memory.add_turn(turn("hi", reply));
        }
        assert_eq!(memory.recent_assistant_messages(2), vec!["two", "three"]);
    }
}
