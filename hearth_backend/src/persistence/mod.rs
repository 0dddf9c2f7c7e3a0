//! Persistence gateway.
//!
//! Stores implement [`ConversationStore`] and report failures as `anyhow`
//! errors. The [`PersistenceGateway`] in front of them never fails: every
//! call is time-bounded, failures are logged, and callers get `false`,
//! `None` or an empty list back.

pub mod sqlite;
pub mod supabase;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use sqlite::SqliteStore;
pub use supabase::SupabaseStore;

pub const DEFAULT_PERSISTENCE_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    #[default]
    #[serde(alias = "ai_preferred")]
    Local,
    Hybrid,
}

impl ProcessingMode {
    pub fn as_db_str(self) -> &'static str {
        match self {
            ProcessingMode::Local => "local",
            ProcessingMode::Hybrid => "hybrid",
        }
    }

    /// Reads a stored mode. The retired `ai_preferred` value and anything
    /// unrecognised read as `local`.
    pub fn from_stored(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hybrid" => ProcessingMode::Hybrid,
            _ => ProcessingMode::Local,
        }
    }
}

impl std::fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// One user/assistant exchange as stored in `conversations.messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub user: String,
    pub assistant: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub user_id: String,
    pub conversation_id: String,
    pub title: String,
    pub messages: Vec<StoredMessage>,
    pub processing_mode: ProcessingMode,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub conversation_id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub processing_mode: ProcessingMode,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default = "default_true")]
    pub persist_history: bool,
    #[serde(default)]
    pub persist_confirmed: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            persist_history: true,
            persist_confirmed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    #[default]
    Active,
    Resolved,
}

impl AnchorStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            AnchorStatus::Active => "active",
            AnchorStatus::Resolved => "resolved",
        }
    }

    pub fn from_db(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "resolved" => AnchorStatus::Resolved,
            _ => AnchorStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeAnchor {
    pub theme: String,
    pub anchor_text: String,
    pub frequency: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: f32,
    pub status: AnchorStatus,
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Longest anchor excerpt kept per theme.
pub const MAX_ANCHOR_CHARS: usize = 280;

pub fn truncate_anchor(text: &str) -> String {
    text.trim().chars().take(MAX_ANCHOR_CHARS).collect()
}

/// A backing store for conversations, preferences and theme anchors.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Inserts or replaces the row for `(user_id, conversation_id)`.
    async fn save_conversation(&self, record: &ConversationRecord) -> Result<()>;

    async fn load_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>>;

    /// Most recently updated first.
    async fn list_conversations(&self, user_id: &str, limit: usize)
        -> Result<Vec<ConversationMeta>>;

    /// Returns whether a row was removed.
    async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<bool>;

    /// Returns whether a row was renamed.
    async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<bool>;

    async fn load_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>>;

    async fn save_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()>;

    /// Upserts the anchor for `(user_id, theme)`, bumping its frequency.
    async fn record_theme_anchor(
        &self,
        user_id: &str,
        theme: &str,
        anchor_text: &str,
        confidence: f32,
    ) -> Result<()>;

    /// Most recently seen first.
    async fn get_recent_anchors(&self, user_id: &str, limit: usize) -> Result<Vec<ThemeAnchor>>;
}

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Option<Arc<dyn ConversationStore>>,
    timeout: Duration,
}

impl std::fmt::Debug for PersistenceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceGateway")
            .field("backend", &self.backend_name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn ConversationStore>, timeout: Duration) -> Self {
        Self {
            store: Some(store),
            timeout,
        }
    }

    /// A gateway with no backend. Every read misses and every write returns `false`.
    pub fn unavailable() -> Self {
        Self {
            store: None,
            timeout: DEFAULT_PERSISTENCE_TIMEOUT,
        }
    }

    pub fn is_available(&self) -> bool {
        self.store.is_some()
    }

    pub fn backend_name(&self) -> &'static str {
        self.store
            .as_ref()
            .map_or("unavailable", |store| store.backend_name())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F, Fut>(&self, operation: &str, call: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn ConversationStore>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let store = self.store.clone()?;
        match tokio::time::timeout(self.timeout, call(store)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                tracing::warn!("Persistence {} failed: {:#}", operation, e);
                None
            }
            Err(_) => {
                tracing::warn!(
                    "Persistence {} timed out after {:?}",
                    operation,
                    self.timeout
                );
                None
            }
        }
    }

    pub async fn save_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
        messages: &[StoredMessage],
        mode: ProcessingMode,
    ) -> bool {
        let record = ConversationRecord {
            user_id: user_id.to_string(),
            conversation_id: conversation_id.to_string(),
            title: title.to_string(),
            messages: messages.to_vec(),
            processing_mode: mode,
            updated_at: Utc::now(),
            message_count: messages.len(),
        };
        self.bounded("save_conversation", |store| async move {
            store.save_conversation(&record).await
        })
        .await
        .is_some()
    }

    pub async fn load_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Option<ConversationRecord> {
        self.bounded("load_conversation", |store| async move {
            store.load_conversation(user_id, conversation_id).await
        })
        .await
        .flatten()
    }

    pub async fn list_conversations(&self, user_id: &str, limit: usize) -> Vec<ConversationMeta> {
        self.bounded("list_conversations", |store| async move {
            store.list_conversations(user_id, limit).await
        })
        .await
        .unwrap_or_default()
    }

    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> bool {
        self.bounded("delete_conversation", |store| async move {
            store.delete_conversation(user_id, conversation_id).await
        })
        .await
        .unwrap_or(false)
    }

    pub async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> bool {
        self.bounded("rename_conversation", |store| async move {
            store
                .rename_conversation(user_id, conversation_id, title)
                .await
        })
        .await
        .unwrap_or(false)
    }

    pub async fn load_preferences(&self, user_id: &str) -> Option<UserPreferences> {
        self.bounded("load_preferences", |store| async move {
            store.load_preferences(user_id).await
        })
        .await
        .flatten()
    }

    pub async fn save_preferences(&self, user_id: &str, prefs: &UserPreferences) -> bool {
        self.bounded("save_preferences", |store| async move {
            store.save_preferences(user_id, prefs).await
        })
        .await
        .is_some()
    }

    pub async fn record_theme_anchor(
        &self,
        user_id: &str,
        theme: &str,
        anchor_text: &str,
        confidence: f32,
    ) -> bool {
        let anchor_text = truncate_anchor(anchor_text);
        let confidence = confidence.clamp(0.0, 1.0);
        self.bounded("record_theme_anchor", |store| async move {
            store
                .record_theme_anchor(user_id, theme, &anchor_text, confidence)
                .await
        })
        .await
        .is_some()
    }

    pub async fn get_recent_anchors(&self, user_id: &str, limit: usize) -> Vec<ThemeAnchor> {
        self.bounded("get_recent_anchors", |store| async move {
            store.get_recent_anchors(user_id, limit).await
        })
        .await
        .unwrap_or_default()
    }
}
