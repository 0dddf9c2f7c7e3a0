use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::{
    AnchorStatus, ConversationMeta, ConversationRecord, ConversationStore, ProcessingMode,
    StoredMessage, ThemeAnchor, UserPreferences,
};

/// Local single-file store. Column names match the hosted tables.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Helper to lock the connection
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    /// Create or open the database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at '{}'", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                user_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                title TEXT NOT NULL,
                messages TEXT NOT NULL,
                processing_mode TEXT NOT NULL DEFAULT 'local',
                updated_at TEXT NOT NULL,
                message_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, conversation_id)
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_updated
                ON conversations(user_id, updated_at DESC);

            CREATE TABLE IF NOT EXISTS user_preferences (
                user_id TEXT PRIMARY KEY,
                persist_history INTEGER NOT NULL DEFAULT 1,
                persist_confirmed INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS theme_anchors (
                user_id TEXT NOT NULL,
                theme TEXT NOT NULL,
                anchor TEXT NOT NULL,
                frequency INTEGER NOT NULL DEFAULT 1,
                first_detected_at TEXT NOT NULL,
                last_detected_at TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0.5,
                status TEXT NOT NULL DEFAULT 'active',
                context TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (user_id, theme)
            );
            "#,
        )
        .context("Failed to create persistence schema")?;
        Ok(())
    }
}

fn parse_rfc3339(value: String, column: usize) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

struct ConversationRow {
    conversation_id: String,
    title: String,
    messages: String,
    processing_mode: String,
    updated_at: DateTime<Utc>,
    message_count: i64,
}

fn decode_messages(raw: &str, conversation_id: &str) -> Option<Vec<StoredMessage>> {
    match serde_json::from_str::<Vec<StoredMessage>>(raw) {
        Ok(messages) => Some(messages),
        Err(e) => {
            tracing::warn!(
                "Skipping conversation '{}' with malformed messages: {}",
                conversation_id,
                e
            );
            None
        }
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn save_conversation(&self, record: &ConversationRecord) -> Result<()> {
        let messages = serde_json::to_string(&record.messages)?;
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO conversations
             (user_id, conversation_id, title, messages, processing_mode, updated_at, message_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.user_id,
                record.conversation_id,
                record.title,
                messages,
                record.processing_mode.as_db_str(),
                record.updated_at.to_rfc3339(),
                record.messages.len() as i64,
            ],
        )?;
        Ok(())
    }

    async fn load_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let conn = self.lock_conn()?;
        let row = conn
            .query_row(
                "SELECT conversation_id, title, messages, processing_mode, updated_at, message_count
                 FROM conversations WHERE user_id = ?1 AND conversation_id = ?2",
                params![user_id, conversation_id],
                |row| {
                    Ok(ConversationRow {
                        conversation_id: row.get(0)?,
                        title: row.get(1)?,
                        messages: row.get(2)?,
                        processing_mode: row.get(3)?,
                        updated_at: parse_rfc3339(row.get::<_, String>(4)?, 4)?,
                        message_count: row.get(5)?,
                    })
                },
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };
        let Some(messages) = decode_messages(&row.messages, &row.conversation_id) else {
            return Ok(None);
        };
        Ok(Some(ConversationRecord {
            user_id: user_id.to_string(),
            conversation_id: row.conversation_id,
            title: row.title,
            message_count: messages.len(),
            messages,
            processing_mode: ProcessingMode::from_stored(&row.processing_mode),
            updated_at: row.updated_at,
        }))
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMeta>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT conversation_id, title, messages, processing_mode, updated_at, message_count
             FROM conversations WHERE user_id = ?1
             ORDER BY updated_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok(ConversationRow {
                    conversation_id: row.get(0)?,
                    title: row.get(1)?,
                    messages: row.get(2)?,
                    processing_mode: row.get(3)?,
                    updated_at: parse_rfc3339(row.get::<_, String>(4)?, 4)?,
                    message_count: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter(|row| decode_messages(&row.messages, &row.conversation_id).is_some())
            .map(|row| ConversationMeta {
                conversation_id: row.conversation_id,
                title: row.title,
                updated_at: row.updated_at,
                message_count: row.message_count.max(0) as usize,
                processing_mode: ProcessingMode::from_stored(&row.processing_mode),
            })
            .collect())
    }

    async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let removed = conn.execute(
            "DELETE FROM conversations WHERE user_id = ?1 AND conversation_id = ?2",
            params![user_id, conversation_id],
        )?;
        Ok(removed > 0)
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<bool> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            "UPDATE conversations SET title = ?3, updated_at = ?4
             WHERE user_id = ?1 AND conversation_id = ?2",
            params![user_id, conversation_id, title, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    async fn load_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let conn = self.lock_conn()?;
        let prefs = conn
            .query_row(
                "SELECT persist_history, persist_confirmed FROM user_preferences WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(UserPreferences {
                        persist_history: row.get::<_, i64>(0)? != 0,
                        persist_confirmed: row.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(prefs)
    }

    async fn save_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO user_preferences
             (user_id, persist_history, persist_confirmed, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user_id,
                prefs.persist_history as i64,
                prefs.persist_confirmed as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn record_theme_anchor(
        &self,
        user_id: &str,
        theme: &str,
        anchor_text: &str,
        confidence: f32,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO theme_anchors
             (user_id, theme, anchor, frequency, first_detected_at, last_detected_at, confidence, status, context)
             VALUES (?1, ?2, ?3, 1, ?4, ?4, ?5, 'active', '{}')
             ON CONFLICT(user_id, theme) DO UPDATE SET
                anchor = excluded.anchor,
                frequency = theme_anchors.frequency + 1,
                last_detected_at = excluded.last_detected_at,
                confidence = MAX(theme_anchors.confidence, excluded.confidence),
                status = 'active'",
            params![user_id, theme, anchor_text, now, confidence as f64],
        )?;
        Ok(())
    }

    async fn get_recent_anchors(&self, user_id: &str, limit: usize) -> Result<Vec<ThemeAnchor>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT theme, anchor, frequency, first_detected_at, last_detected_at, confidence, status, context
             FROM theme_anchors WHERE user_id = ?1
             ORDER BY last_detected_at DESC, frequency DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    parse_rfc3339(row.get::<_, String>(3)?, 3)?,
                    parse_rfc3339(row.get::<_, String>(4)?, 4)?,
                    row.get::<_, f64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut anchors = Vec::with_capacity(rows.len());
        for (theme, anchor, frequency, first_seen, last_seen, confidence, status, context) in rows {
            let context = match serde_json::from_str(&context) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("Skipping '{}' anchor with malformed context: {}", theme, e);
                    continue;
                }
            };
            anchors.push(ThemeAnchor {
                theme,
                anchor_text: anchor,
                frequency: frequency.max(0) as u32,
                first_seen,
                last_seen,
                confidence: confidence as f32,
                status: AnchorStatus::from_db(&status),
                context,
            });
        }
        Ok(anchors)
    }
}
