//! The companion engine: one session per `(user, conversation)`, each turn
//! serialised on its session, persistence after the reply.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use flume::Sender;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::affect::{AffectAnalysis, AffectParser};
use crate::agent::AgentState;
use crate::composer::rotator::Rotator;
use crate::composer::{Composer, ResponseClass};
use crate::config::CompanionConfig;
use crate::glyphs::Glyph;
use crate::memory::rehydrate::{self, RehydratedContext, SessionStatus};
use crate::memory::{CausalChain, ConversationMemory, IntegratedState, ThemeCount, Turn};
use crate::persistence::{
    truncate_anchor, ConversationMeta, ConversationRecord, PersistenceGateway, ProcessingMode,
    StoredMessage, UserPreferences,
};
use crate::patterns;
use crate::responder::Responder;

pub const FALLBACK_REPLY: &str = "I'm here to listen. Can you tell me more?";
const MAX_TITLE_CHARS: usize = 48;
const TOP_THEMES_IN_STATE: usize = 5;

/// Engine events, bridged to websocket clients by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CompanionEvent {
    SessionOpened {
        user_id: String,
        conversation_id: String,
        status: SessionStatus,
        restored_turns: usize,
    },
    TurnComposed {
        user_id: String,
        conversation_id: String,
        turn: u32,
        response_class: ResponseClass,
        glyph: Option<String>,
        tone: String,
        processing_time_ms: f64,
    },
    ThemeReflected {
        user_id: String,
        conversation_id: String,
        theme: String,
        text: String,
    },
    PersistenceDegraded {
        operation: String,
    },
    Fallback {
        user_id: String,
        conversation_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphRef {
    pub name: String,
    pub symbol: String,
}

impl From<&Glyph> for GlyphRef {
    fn from(glyph: &Glyph) -> Self {
        Self {
            name: glyph.name.to_string(),
            symbol: glyph.symbol.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub reply: String,
    pub glyph: Option<GlyphRef>,
    pub affect: AffectAnalysis,
    pub processing_time_ms: f64,
    pub response_class: ResponseClass,
    /// Theme reflection earned on this turn, if any.
    pub reflection: Option<String>,
    pub turn: u32,
}

/// Read-only view of a live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_id: String,
    pub conversation_id: String,
    pub title: String,
    pub processing_mode: ProcessingMode,
    pub turn_count: usize,
    pub integrated_state: IntegratedState,
    pub causal_chain: CausalChain,
    pub agent: AgentState,
    pub top_themes: Vec<ThemeCount>,
    pub context: RehydratedContext,
}

struct Session {
    user_id: String,
    conversation_id: String,
    title: String,
    processing_mode: ProcessingMode,
    preferences: UserPreferences,
    context: RehydratedContext,
    memory: ConversationMemory,
    agent: AgentState,
    composer: Composer,
    processing_times: Vec<Option<f64>>,
}

impl Session {
    fn stored_messages(&self) -> Vec<StoredMessage> {
        let mut messages = self.memory.to_stored_messages();
        for (message, time) in messages.iter_mut().zip(&self.processing_times) {
            message.processing_time = *time;
        }
        messages
    }

    fn state(&self) -> ConversationState {
        ConversationState {
            user_id: self.user_id.clone(),
            conversation_id: self.conversation_id.clone(),
            title: self.title.clone(),
            processing_mode: self.processing_mode,
            turn_count: self.memory.len(),
            integrated_state: self.memory.integrated_state().clone(),
            causal_chain: self.memory.causal_chain().clone(),
            agent: self.agent.clone(),
            top_themes: self.memory.get_top_themes(TOP_THEMES_IN_STATE),
            context: self.context.clone(),
        }
    }
}

type SessionKey = (String, String);

pub struct CompanionEngine {
    config: CompanionConfig,
    gateway: PersistenceGateway,
    parser: AffectParser,
    responder: Option<Arc<dyn Responder>>,
    rotation_seed: Option<u64>,
    sessions: RwLock<HashMap<SessionKey, Arc<Mutex<Session>>>>,
    event_tx: Option<Sender<CompanionEvent>>,
}

impl CompanionEngine {
    pub fn new(config: CompanionConfig, gateway: PersistenceGateway) -> Self {
        Self {
            config,
            gateway,
            parser: AffectParser::new(),
            responder: None,
            rotation_seed: None,
            sessions: RwLock::new(HashMap::new()),
            event_tx: None,
        }
    }

    pub fn with_responder(mut self, responder: Option<Arc<dyn Responder>>) -> Self {
        self.responder = responder;
        self
    }

    pub fn with_events(mut self, event_tx: Sender<CompanionEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Makes reply rotation reproducible for every session.
    pub fn with_rotation_seed(mut self, seed: u64) -> Self {
        self.rotation_seed = Some(seed);
        self
    }

    pub fn config(&self) -> &CompanionConfig {
        &self.config
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    fn emit(&self, event: CompanionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }

    async fn session(&self, user_id: &str, conversation_id: &str) -> Arc<Mutex<Session>> {
        let key = (user_id.to_string(), conversation_id.to_string());
        if let Some(existing) = self.sessions.read().await.get(&key) {
            return existing.clone();
        }
        let opened = Arc::new(Mutex::new(self.open_session(user_id, conversation_id).await));
        self.sessions
            .write()
            .await
            .entry(key)
            .or_insert(opened)
            .clone()
    }

    async fn open_session(&self, user_id: &str, conversation_id: &str) -> Session {
        let context =
            rehydrate::rehydrate(&self.gateway, user_id, self.config.rehydrate_anchor_limit).await;
        let preferences = self
            .gateway
            .load_preferences(user_id)
            .await
            .unwrap_or(UserPreferences {
                persist_history: self.config.default_persist_history,
                persist_confirmed: false,
            });

        let mut memory =
            ConversationMemory::with_reflection_threshold(self.config.theme_reflection_threshold);
        let mut title = String::new();
        let mut processing_mode = self.config.default_processing_mode;
        let mut processing_times = Vec::new();
        if let Some(record) = self
            .gateway
            .load_conversation(user_id, conversation_id)
            .await
        {
            memory.restore(&record.messages, &self.parser);
            title = record.title;
            processing_mode = record.processing_mode;
            processing_times = record.messages.iter().map(|m| m.processing_time).collect();
        }

        let mut agent = AgentState::new();
        for turn in memory.turns() {
            agent.add_commitments(patterns::extract_commitments(&turn.response));
            agent.update(&turn.utterance, &turn.affect);
        }

        let mut settings = self.config.composer_settings();
        settings.processing_mode = processing_mode;
        let rotator = match self.rotation_seed {
            Some(seed) => Rotator::seeded(seed),
            None => Rotator::new(),
        };
        let composer = Composer::new(settings)
            .with_responder(self.responder.clone())
            .with_rotator(rotator);

        tracing::info!(
            "Opened session {}/{} ({:?}, {} restored turn(s))",
            user_id,
            conversation_id,
            context.status,
            memory.len()
        );
        self.emit(CompanionEvent::SessionOpened {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            status: context.status,
            restored_turns: memory.len(),
        });

        Session {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            title,
            processing_mode,
            preferences,
            context,
            memory,
            agent,
            composer,
            processing_times,
        }
    }

    /// Composes the reply to `text`, then persists the conversation. Never
    /// fails: a panic anywhere in composition yields the fixed fallback.
    pub async fn compose_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        text: &str,
    ) -> TurnResult {
        let session = self.session(user_id, conversation_id).await;
        let mut session = session.lock().await;
        let started = Instant::now();
        let turns_before = session.memory.len();

        let outcome = AssertUnwindSafe(self.run_turn(&mut session, text))
            .catch_unwind()
            .await;
        let mut result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Composition panicked for {}/{}; using fallback reply",
                    user_id,
                    conversation_id
                );
                self.emit(CompanionEvent::Fallback {
                    user_id: user_id.to_string(),
                    conversation_id: conversation_id.to_string(),
                });
                self.fallback_turn(&mut session, text, turns_before)
            }
        };
        result.processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        while session.processing_times.len() < session.memory.len() {
            session.processing_times.push(None);
        }
        if let Some(last) = session.processing_times.last_mut() {
            *last = Some(started.elapsed().as_secs_f64());
        }

        self.emit(CompanionEvent::TurnComposed {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            turn: result.turn,
            response_class: result.response_class,
            glyph: result.glyph.as_ref().map(|g| g.name.clone()),
            tone: result.affect.tone.to_string(),
            processing_time_ms: result.processing_time_ms,
        });

        self.persist(&mut session, text).await;
        result
    }

    async fn run_turn(&self, session: &mut Session, text: &str) -> TurnResult {
        let affect = self.parser.analyze_in_context(text, &session.context);
        let Session {
            composer,
            memory,
            agent,
            ..
        } = &mut *session;
        let composition = composer.compose(text, &affect, memory, agent).await;

        let reflection = composition
            .theme_hit
            .as_ref()
            .and_then(|hit| hit.reflection.as_ref())
            .map(|reflection| reflection.text.clone());
        if let (Some(hit), Some(text)) = (&composition.theme_hit, &reflection) {
            self.emit(CompanionEvent::ThemeReflected {
                user_id: session.user_id.clone(),
                conversation_id: session.conversation_id.clone(),
                theme: hit.theme.as_str().to_string(),
                text: text.clone(),
            });
        }

        tracing::debug!(
            "Turn {} for {}/{}: {} via {}",
            composition.turn,
            session.user_id,
            session.conversation_id,
            affect.tone,
            composition.class
        );

        TurnResult {
            reply: composition.reply,
            glyph: composition.glyph.map(GlyphRef::from),
            affect,
            processing_time_ms: 0.0,
            response_class: composition.class,
            reflection,
            turn: composition.turn,
        }
    }

    fn fallback_turn(&self, session: &mut Session, text: &str, turns_before: usize) -> TurnResult {
        let affect = self.parser.analyze(text);
        if session.memory.len() == turns_before {
            session.memory.add_turn(Turn::new(
                text,
                affect.clone(),
                None,
                FALLBACK_REPLY,
                ResponseClass::Fallback,
            ));
        }
        TurnResult {
            reply: FALLBACK_REPLY.to_string(),
            glyph: None,
            affect,
            processing_time_ms: 0.0,
            response_class: ResponseClass::Fallback,
            reflection: None,
            turn: session.memory.len() as u32,
        }
    }

    async fn persist(&self, session: &mut Session, text: &str) {
        if !self.gateway.is_available() || !session.preferences.persist_history {
            return;
        }
        if session.title.is_empty() {
            session.title = title_from(text);
        }

        let messages = session.stored_messages();
        let saved = self
            .gateway
            .save_conversation(
                &session.user_id,
                &session.conversation_id,
                &session.title,
                &messages,
                session.processing_mode,
            )
            .await;
        if !saved {
            self.emit(CompanionEvent::PersistenceDegraded {
                operation: "save_conversation".to_string(),
            });
        }

        let hit = session.memory.last_turn().and_then(|turn| {
            crate::patterns::detect_theme(&turn.utterance).map(|theme| (theme, turn.utterance.clone()))
        });
        if let Some((theme, utterance)) = hit {
            let confidence = session.memory.integrated_state().confidence;
            let recorded = self
                .gateway
                .record_theme_anchor(
                    &session.user_id,
                    theme.as_str(),
                    &truncate_anchor(&utterance),
                    confidence,
                )
                .await;
            if !recorded {
                self.emit(CompanionEvent::PersistenceDegraded {
                    operation: "record_theme_anchor".to_string(),
                });
            }
        }
    }

    /// Snapshot of an open (or reopenable) conversation.
    pub async fn conversation_state(&self, user_id: &str, conversation_id: &str) -> ConversationState {
        let session = self.session(user_id, conversation_id).await;
        let session = session.lock().await;
        session.state()
    }

    /// The stored copy of a conversation, as last saved.
    pub async fn stored_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Option<ConversationRecord> {
        self.gateway
            .load_conversation(user_id, conversation_id)
            .await
    }

    pub async fn list_conversations(&self, user_id: &str, limit: usize) -> Vec<ConversationMeta> {
        self.gateway.list_conversations(user_id, limit).await
    }

    /// Drops the live session and the stored copy.
    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> bool {
        let key = (user_id.to_string(), conversation_id.to_string());
        let was_open = self.sessions.write().await.remove(&key).is_some();
        let deleted = self
            .gateway
            .delete_conversation(user_id, conversation_id)
            .await;
        was_open || deleted
    }

    pub async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let key = (user_id.to_string(), conversation_id.to_string());
        let open = self.sessions.read().await.get(&key).cloned();
        if let Some(session) = &open {
            session.lock().await.title = title.to_string();
        }
        let renamed = self
            .gateway
            .rename_conversation(user_id, conversation_id, title)
            .await;
        open.is_some() || renamed
    }

    pub async fn preferences(&self, user_id: &str) -> UserPreferences {
        self.gateway
            .load_preferences(user_id)
            .await
            .unwrap_or(UserPreferences {
                persist_history: self.config.default_persist_history,
                persist_confirmed: false,
            })
    }

    /// Stores the preferences and applies them to the user's open sessions.
    pub async fn save_preferences(&self, user_id: &str, preferences: UserPreferences) -> bool {
        let open: Vec<Arc<Mutex<Session>>> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, session)| session.clone())
            .collect();
        for session in open {
            session.lock().await.preferences = preferences;
        }
        self.gateway.save_preferences(user_id, &preferences).await
    }

    pub async fn rehydrate(&self, user_id: &str) -> RehydratedContext {
        rehydrate::rehydrate(&self.gateway, user_id, self.config.rehydrate_anchor_limit).await
    }
}

fn title_from(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_TITLE_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    match cut.rfind(char::is_whitespace) {
        Some(space) if space > 0 => format!("{}…", cut[..space].trim_end()),
        _ => format!("{cut}…"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::curiosity;
    use crate::lexicon::Tone;
    use crate::persistence::SqliteStore;
    use crate::responder::ResponderRequest;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;

    fn sqlite_gateway() -> PersistenceGateway {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        PersistenceGateway::new(store, Duration::from_secs(2))
    }

    fn engine(gateway: PersistenceGateway) -> CompanionEngine {
        CompanionEngine::new(CompanionConfig::default(), gateway).with_rotation_seed(5)
    }

    #[tokio::test]
    async fn vague_anger_turn_is_composed_and_saved() {
        let gateway = sqlite_gateway();
        let engine = engine(gateway.clone());

        let result = engine.compose_turn("ana", "c1", "this is bullshit").await;
        assert_eq!(result.affect.tone, Tone::Angry);
        assert!(result.affect.arousal >= 0.7);
        assert!(result.glyph.is_none());
        assert_eq!(result.response_class, ResponseClass::Curiosity);
        assert!(curiosity::curiosity_bank(Tone::Angry).contains(&result.reply.as_str()));
        assert_eq!(result.turn, 1);

        let record = gateway.load_conversation("ana", "c1").await.unwrap();
        assert_eq!(record.title, "this is bullshit");
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].assistant, result.reply);
        assert!(record.messages[0].processing_time.is_some());
        assert!(result.processing_time_ms > 0.0);
    }

    #[tokio::test]
    async fn unknown_user_rehydrates_as_a_first_conversation() {
        let engine = engine(sqlite_gateway());
        let context = engine.rehydrate("never_seen_user").await;
        assert_eq!(context.status, SessionStatus::NewSession);
        assert_eq!(context.narrative, "This is our first conversation.");
        assert_eq!(context.anchor_count, 0);
        assert_eq!(context.memory_salience, 0.0);
    }

    #[tokio::test]
    async fn conversation_survives_an_engine_restart() {
        let gateway = sqlite_gateway();
        {
            let engine = engine(gateway.clone());
            engine.compose_turn("ana", "c1", "Work has been brutal lately").await;
            engine.compose_turn("ana", "c1", "My boss keeps moving deadlines").await;
        }
        let mut record = gateway.load_conversation("ana", "c1").await.unwrap();
        record.messages.push(StoredMessage {
            user: "I don't know what to do anymore".to_string(),
            assistant: "I'll stay right here with you. What feels most important to focus on right now?"
                .to_string(),
            timestamp: chrono::Utc::now(),
            processing_time: None,
        });
        assert!(
            gateway
                .save_conversation(
                    "ana",
                    "c1",
                    &record.title,
                    &record.messages,
                    record.processing_mode
                )
                .await
        );

        let engine = engine(gateway);
        let state = engine.conversation_state("ana", "c1").await;
        assert_eq!(state.turn_count, 3);
        assert_eq!(state.agent.turn_count, 3);
        assert!(state
            .agent
            .established_commitments
            .iter()
            .any(|c| c.starts_with("I'll stay right here with you")));
        assert!(state.agent.last_valence.is_some());
        assert_eq!(state.context.status, SessionStatus::Returning);
        assert!(state.context.narrative.contains("The pressure at work"));

        let result = engine.compose_turn("ana", "c1", "and today was worse").await;
        assert_eq!(result.turn, 4);
    }

    #[tokio::test]
    async fn repeated_theme_earns_a_reflection_and_an_anchor() {
        let gateway = sqlite_gateway();
        let (tx, rx) = flume::unbounded();
        let engine = engine(gateway.clone()).with_events(tx);

        let first = engine.compose_turn("bo", "c1", "My job is draining me").await;
        assert!(first.reflection.is_none());
        let second = engine.compose_turn("bo", "c1", "another meeting ran late").await;
        assert_eq!(
            second.reflection.as_deref(),
            Some("I've noticed the pressure at work has come up a couple of times.")
        );

        let anchors = gateway.get_recent_anchors("bo", 10).await;
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].theme, "work_stress");
        assert_eq!(anchors[0].frequency, 2);

        let events: Vec<CompanionEvent> = rx.drain().collect();
        assert!(matches!(events[0], CompanionEvent::SessionOpened { .. }));
        assert!(events
            .iter()
            .any(|event| matches!(event, CompanionEvent::ThemeReflected { theme, .. } if theme == "work_stress")));
    }

    #[tokio::test]
    async fn opting_out_of_history_skips_persistence() {
        let gateway = sqlite_gateway();
        let engine = engine(gateway.clone());
        assert!(
            engine
                .save_preferences(
                    "cy",
                    UserPreferences {
                        persist_history: false,
                        persist_confirmed: true,
                    },
                )
                .await
        );

        engine.compose_turn("cy", "c1", "work is a lot").await;
        assert!(gateway.load_conversation("cy", "c1").await.is_none());
        assert!(gateway.get_recent_anchors("cy", 10).await.is_empty());
        assert!(!engine.preferences("cy").await.persist_history);
    }

    #[tokio::test]
    async fn unavailable_persistence_keeps_the_session_in_memory() {
        let engine = engine(PersistenceGateway::unavailable());
        engine.compose_turn("dee", "c1", "hello").await;
        let second = engine.compose_turn("dee", "c1", "still here").await;
        assert_eq!(second.turn, 2);
        assert!(engine.list_conversations("dee", 10).await.is_empty());
    }

    struct PanickingResponder;

    #[async_trait]
    impl Responder for PanickingResponder {
        async fn respond(&self, _request: &ResponderRequest) -> Result<String> {
            panic!("responder exploded");
        }
    }

    #[tokio::test]
    async fn panics_become_the_fallback_reply() {
        let config = CompanionConfig {
            default_processing_mode: ProcessingMode::Hybrid,
            poetic_markers: vec!["sound".to_string()],
            ..CompanionConfig::default()
        };
        let gateway = sqlite_gateway();
        let engine = CompanionEngine::new(config, gateway.clone())
            .with_responder(Some(Arc::new(PanickingResponder)))
            .with_rotation_seed(1);

        let result = engine
            .compose_turn("eli", "c1", "I'm so exhausted I can't even think straight today")
            .await;
        assert_eq!(result.reply, FALLBACK_REPLY);
        assert_eq!(result.response_class, ResponseClass::Fallback);
        assert!(result.glyph.is_none());
        assert_eq!(result.turn, 1);

        let record = gateway.load_conversation("eli", "c1").await.unwrap();
        assert_eq!(record.messages[0].assistant, FALLBACK_REPLY);
        assert_eq!(record.processing_mode, ProcessingMode::Hybrid);
    }

    #[tokio::test]
    async fn rename_and_delete_reach_both_session_and_store() {
        let gateway = sqlite_gateway();
        let engine = engine(gateway.clone());
        engine.compose_turn("fay", "c1", "hello there").await;

        assert!(engine.rename_conversation("fay", "c1", "Evening check-in").await);
        assert!(!engine.rename_conversation("fay", "c1", "   ").await);
        assert_eq!(engine.conversation_state("fay", "c1").await.title, "Evening check-in");
        assert_eq!(
            gateway.load_conversation("fay", "c1").await.unwrap().title,
            "Evening check-in"
        );

        assert!(engine.delete_conversation("fay", "c1").await);
        assert!(gateway.load_conversation("fay", "c1").await.is_none());
        assert_eq!(engine.conversation_state("fay", "c1").await.turn_count, 0);
    }

    #[test]
    fn titles_are_cut_at_a_word() {
        assert_eq!(title_from("  short one "), "short one");
        let long = "I have been thinking about everything that happened at work this week";
        let title = title_from(long);
        assert!(title.ends_with('…'));
        assert!(title.chars().count() <= MAX_TITLE_CHARS + 1);
    }
}
