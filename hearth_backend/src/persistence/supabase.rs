//! Hosted store speaking PostgREST (the REST layer in front of Supabase).
//!
//! Rows are decoded one at a time so a single malformed record is skipped
//! instead of failing the whole read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use super::{
    AnchorStatus, ConversationMeta, ConversationRecord, ConversationStore, ProcessingMode,
    StoredMessage, ThemeAnchor, UserPreferences,
};
use crate::http_client::build_http_client;

#[derive(Clone)]
pub struct SupabaseStore {
    rest_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl SupabaseStore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() || api_key.trim().is_empty() {
            anyhow::bail!("Supabase URL and key are both required");
        }
        Ok(Self {
            rest_url: format!("{}/rest/v1", base_url),
            api_key: api_key.trim().to_string(),
            client: build_http_client(Some(timeout))?,
        })
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.rest_url, table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send Supabase {} request", what))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Supabase {} returned error {}: {}", what, status, body);
        }
        Ok(response)
    }

    async fn fetch_rows(&self, request: reqwest::RequestBuilder, what: &str) -> Result<Vec<Value>> {
        let response = self.send(request, what).await?;
        response
            .json::<Vec<Value>>()
            .await
            .with_context(|| format!("Failed to parse Supabase {} response", what))
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

pub(crate) fn conversation_row(record: &ConversationRecord) -> Value {
    json!({
        "user_id": record.user_id,
        "conversation_id": record.conversation_id,
        "title": record.title,
        "messages": record.messages,
        "processing_mode": record.processing_mode.as_db_str(),
        "updated_at": record.updated_at.to_rfc3339(),
        "message_count": record.messages.len(),
    })
}

fn field_str<'a>(row: &'a Value, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

fn field_time(row: &Value, key: &str) -> Option<DateTime<Utc>> {
    field_str(row, key).and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
}

/// Older rows hold `messages` as a JSON-encoded string rather than an array.
fn decode_messages(value: &Value) -> Option<Vec<StoredMessage>> {
    match value {
        Value::String(raw) => serde_json::from_str(raw).ok(),
        other => serde_json::from_value(other.clone()).ok(),
    }
}

pub(crate) fn parse_conversation_row(row: &Value) -> Option<ConversationRecord> {
    let conversation_id = field_str(row, "conversation_id")?;
    let messages = match row.get("messages").map(decode_messages) {
        Some(Some(messages)) => messages,
        _ => {
            tracing::warn!(
                "Skipping conversation '{}' with malformed messages",
                conversation_id
            );
            return None;
        }
    };
    Some(ConversationRecord {
        user_id: field_str(row, "user_id").unwrap_or_default().to_string(),
        conversation_id: conversation_id.to_string(),
        title: field_str(row, "title").unwrap_or("Untitled").to_string(),
        message_count: messages.len(),
        messages,
        processing_mode: ProcessingMode::from_stored(
            field_str(row, "processing_mode").unwrap_or("local"),
        ),
        updated_at: field_time(row, "updated_at").unwrap_or_else(Utc::now),
    })
}

pub(crate) fn parse_meta_row(row: &Value) -> Option<ConversationMeta> {
    let conversation_id = field_str(row, "conversation_id")?;
    let Some(updated_at) = field_time(row, "updated_at") else {
        tracing::warn!(
            "Skipping conversation '{}' with malformed updated_at",
            conversation_id
        );
        return None;
    };
    Some(ConversationMeta {
        conversation_id: conversation_id.to_string(),
        title: field_str(row, "title").unwrap_or("Untitled").to_string(),
        updated_at,
        message_count: row
            .get("message_count")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize,
        processing_mode: ProcessingMode::from_stored(
            field_str(row, "processing_mode").unwrap_or("local"),
        ),
    })
}

pub(crate) fn parse_anchor_row(row: &Value) -> Option<ThemeAnchor> {
    let theme = field_str(row, "theme")?;
    let (Some(first_seen), Some(last_seen)) = (
        field_time(row, "first_detected_at"),
        field_time(row, "last_detected_at"),
    ) else {
        tracing::warn!("Skipping '{}' anchor with malformed timestamps", theme);
        return None;
    };
    let context = match row.get("context") {
        Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
        Some(value) => value.clone(),
        None => Value::Null,
    };
    Some(ThemeAnchor {
        theme: theme.to_string(),
        anchor_text: field_str(row, "anchor").unwrap_or_default().to_string(),
        frequency: row.get("frequency").and_then(Value::as_u64).unwrap_or(1) as u32,
        first_seen,
        last_seen,
        confidence: row
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5) as f32,
        status: AnchorStatus::from_db(field_str(row, "status").unwrap_or("active")),
        context,
    })
}

#[async_trait]
impl ConversationStore for SupabaseStore {
    fn backend_name(&self) -> &'static str {
        "supabase"
    }

    async fn save_conversation(&self, record: &ConversationRecord) -> Result<()> {
        let request = self
            .request(reqwest::Method::POST, "conversations")
            .query(&[("on_conflict", "user_id,conversation_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&conversation_row(record));
        self.send(request, "save_conversation").await?;
        Ok(())
    }

    async fn load_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Option<ConversationRecord>> {
        let request = self.request(reqwest::Method::GET, "conversations").query(&[
            ("user_id", eq(user_id)),
            ("conversation_id", eq(conversation_id)),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ]);
        let rows = self.fetch_rows(request, "load_conversation").await?;
        Ok(rows.first().and_then(parse_conversation_row))
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMeta>> {
        let request = self.request(reqwest::Method::GET, "conversations").query(&[
            ("user_id", eq(user_id)),
            (
                "select",
                "conversation_id,title,processing_mode,updated_at,message_count".to_string(),
            ),
            ("order", "updated_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let rows = self.fetch_rows(request, "list_conversations").await?;
        Ok(rows.iter().filter_map(parse_meta_row).collect())
    }

    async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        let request = self
            .request(reqwest::Method::DELETE, "conversations")
            .query(&[
                ("user_id", eq(user_id)),
                ("conversation_id", eq(conversation_id)),
            ])
            .header("Prefer", "return=representation");
        let rows = self.fetch_rows(request, "delete_conversation").await?;
        Ok(!rows.is_empty())
    }

    async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<bool> {
        let request = self
            .request(reqwest::Method::PATCH, "conversations")
            .query(&[
                ("user_id", eq(user_id)),
                ("conversation_id", eq(conversation_id)),
            ])
            .header("Prefer", "return=representation")
            .json(&json!({ "title": title, "updated_at": Utc::now().to_rfc3339() }));
        let rows = self.fetch_rows(request, "rename_conversation").await?;
        Ok(!rows.is_empty())
    }

    async fn load_preferences(&self, user_id: &str) -> Result<Option<UserPreferences>> {
        let request = self
            .request(reqwest::Method::GET, "user_preferences")
            .query(&[("user_id", eq(user_id)), ("limit", "1".to_string())]);
        let rows = self.fetch_rows(request, "load_preferences").await?;
        Ok(rows.first().and_then(|row| {
            serde_json::from_value::<UserPreferences>(row.clone())
                .map_err(|e| tracing::warn!("Skipping malformed preferences row: {}", e))
                .ok()
        }))
    }

    async fn save_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<()> {
        let request = self
            .request(reqwest::Method::POST, "user_preferences")
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&json!({
                "user_id": user_id,
                "persist_history": prefs.persist_history,
                "persist_confirmed": prefs.persist_confirmed,
                "updated_at": Utc::now().to_rfc3339(),
            }));
        self.send(request, "save_preferences").await?;
        Ok(())
    }

    async fn record_theme_anchor(
        &self,
        user_id: &str,
        theme: &str,
        anchor_text: &str,
        confidence: f32,
    ) -> Result<()> {
        let existing = self
            .fetch_rows(
                self.request(reqwest::Method::GET, "theme_anchors").query(&[
                    ("user_id", eq(user_id)),
                    ("theme", eq(theme)),
                    ("limit", "1".to_string()),
                ]),
                "record_theme_anchor lookup",
            )
            .await?;
        let previous = existing.first().and_then(parse_anchor_row);
        let now = Utc::now().to_rfc3339();
        let row = match previous {
            Some(anchor) => json!({
                "user_id": user_id,
                "theme": theme,
                "anchor": anchor_text,
                "frequency": anchor.frequency + 1,
                "first_detected_at": anchor.first_seen.to_rfc3339(),
                "last_detected_at": now,
                "confidence": anchor.confidence.max(confidence),
                "status": AnchorStatus::Active.as_db_str(),
                "context": anchor.context,
            }),
            None => json!({
                "user_id": user_id,
                "theme": theme,
                "anchor": anchor_text,
                "frequency": 1,
                "first_detected_at": now,
                "last_detected_at": now,
                "confidence": confidence,
                "status": AnchorStatus::Active.as_db_str(),
                "context": {},
            }),
        };
        let request = self
            .request(reqwest::Method::POST, "theme_anchors")
            .query(&[("on_conflict", "user_id,theme")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&row);
        self.send(request, "record_theme_anchor").await?;
        Ok(())
    }

    async fn get_recent_anchors(&self, user_id: &str, limit: usize) -> Result<Vec<ThemeAnchor>> {
        let request = self.request(reqwest::Method::GET, "theme_anchors").query(&[
            ("user_id", eq(user_id)),
            ("order", "last_detected_at.desc".to_string()),
            ("limit", limit.to_string()),
        ]);
        let rows = self.fetch_rows(request, "get_recent_anchors").await?;
        Ok(rows.iter().filter_map(parse_anchor_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requires_url_and_key() {
        assert!(SupabaseStore::new("", "key", Duration::from_secs(1)).is_err());
        assert!(SupabaseStore::new("https://x.supabase.co", " ", Duration::from_secs(1)).is_err());
        let store = SupabaseStore::new("https://x.supabase.co/", "key", Duration::from_secs(1))
            .unwrap();
        assert_eq!(store.rest_url, "https://x.supabase.co/rest/v1");
    }

    #[test]
    fn conversation_rows_round_trip_through_json() {
        let record = ConversationRecord {
            user_id: "ana".into(),
            conversation_id: "c1".into(),
            title: "Evening".into(),
            messages: vec![StoredMessage {
                user: "long day".into(),
                assistant: "That sounds tiring.".into(),
                timestamp: "2025-03-01T10:00:00Z".parse().unwrap(),
                processing_time: Some(3.0),
            }],
            processing_mode: ProcessingMode::Hybrid,
            updated_at: "2025-03-01T10:00:05Z".parse().unwrap(),
            message_count: 1,
        };
        let row = conversation_row(&record);
        assert_eq!(row["message_count"], 1);
        assert_eq!(parse_conversation_row(&row), Some(record));
    }

    #[test]
    fn legacy_and_string_encoded_rows_are_accepted() {
        let row = json!({
            "user_id": "ana",
            "conversation_id": "old",
            "title": "Old",
            "messages": "[{\"user\":\"hi\",\"assistant\":\"hello\",\"timestamp\":\"2024-01-01T00:00:00+00:00\"}]",
            "processing_mode": "ai_preferred",
            "updated_at": "2024-01-01T00:00:00.123456+00:00",
        });
        let record = parse_conversation_row(&row).unwrap();
        assert_eq!(record.processing_mode, ProcessingMode::Local);
        assert_eq!(record.messages.len(), 1);
        assert_eq!(record.messages[0].processing_time, None);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let bad_messages = json!({ "conversation_id": "x", "messages": "oops" });
        assert!(parse_conversation_row(&bad_messages).is_none());
        let bad_time = json!({ "conversation_id": "x", "updated_at": "yesterday" });
        assert!(parse_meta_row(&bad_time).is_none());
        let bad_anchor = json!({ "theme": "anxiety", "first_detected_at": 5 });
        assert!(parse_anchor_row(&bad_anchor).is_none());
    }

    #[test]
    fn anchor_rows_parse_context_and_status() {
        let row = json!({
            "theme": "work_stress",
            "anchor": "deadline again",
            "frequency": 3,
            "first_detected_at": "2025-01-01T00:00:00Z",
            "last_detected_at": "2025-01-05T00:00:00Z",
            "confidence": 0.8,
            "status": "resolved",
            "context": "{\"turn\": 4}",
        });
        let anchor = parse_anchor_row(&row).unwrap();
        assert_eq!(anchor.frequency, 3);
        assert_eq!(anchor.status, AnchorStatus::Resolved);
        assert_eq!(anchor.context["turn"], 4);
    }
}
