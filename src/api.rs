use anyhow::{Context, Result};
use flume::Sender;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header as ws_header;
use tokio_tungstenite::tungstenite::http::HeaderValue as WsHeaderValue;
use tokio_tungstenite::tungstenite::Message;

use hearth_backend::memory::rehydrate::RehydratedContext;
use hearth_backend::persistence::{ConversationMeta, UserPreferences};
use hearth_backend::session::{ConversationState, TurnResult};

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8797";

/// Backend events the terminal surfaces between replies.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendEvent {
    ThemeReflected {
        conversation_id: String,
        text: String,
    },
    PersistenceDegraded(String),
    Fallback {
        conversation_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct ApiEventEnvelope {
    event_type: String,
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    conversation_id: String,
}

#[derive(Debug, Deserialize)]
struct RenameResponse {
    renamed: bool,
}

#[derive(Debug, Deserialize)]
struct SavePreferencesResponse {
    saved: bool,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    ws_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn from_env() -> Self {
        let base = std::env::var("HEARTH_BACKEND_URL")
            .unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        let token = std::env::var("HEARTH_BACKEND_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Self::new(base, token)
    }

    pub fn new(base_url: String, token: Option<String>) -> Self {
        let normalized_base = normalize_base_url(&base_url);
        let ws_url = normalize_ws_url(&normalized_base);

        Self {
            http: reqwest::Client::new(),
            base_url: normalized_base,
            ws_url,
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<TurnResult> {
        #[derive(Serialize)]
        struct SendTurnRequest<'a> {
            content: &'a str,
        }

        let path = format!("/v1/users/{}/conversations/{}/turns", user_id, conversation_id);
        self.request(reqwest::Method::POST, &path)
            .json(&SendTurnRequest { content })
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("POST {} failed", path))?
            .json::<TurnResult>()
            .await
            .context("Failed to decode turn result")
    }

    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMeta>> {
        let path = format!("/v1/users/{}/conversations", user_id);
        let response = self
            .request(reqwest::Method::GET, &path)
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("GET {} failed", path))?;

        let body = response
            .text()
            .await
            .context("Failed to read conversation list payload")?;
        serde_json::from_str::<Vec<ConversationMeta>>(&body).context(format!(
            "Failed to decode conversation list. Payload preview: {}",
            body.chars().take(500).collect::<String>()
        ))
    }

    pub async fn create_conversation(&self, user_id: &str) -> Result<String> {
        let path = format!("/v1/users/{}/conversations", user_id);
        let response = self
            .request(reqwest::Method::POST, &path)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("POST {} failed", path))?
            .json::<CreateConversationResponse>()
            .await
            .context("Failed to decode created conversation")?;
        Ok(response.conversation_id)
    }

    pub async fn rename_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        title: &str,
    ) -> Result<bool> {
        #[derive(Serialize)]
        struct RenameRequest<'a> {
            title: &'a str,
        }

        let path = format!("/v1/users/{}/conversations/{}/title", user_id, conversation_id);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(&RenameRequest { title })
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("PUT {} failed", path))?
            .json::<RenameResponse>()
            .await
            .context("Failed to decode rename response")?;
        Ok(response.renamed)
    }

    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<()> {
        let path = format!("/v1/users/{}/conversations/{}", user_id, conversation_id);
        let response = self.request(reqwest::Method::DELETE, &path).send().await?;
        // Nothing stored yet is not an error for the caller.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .with_context(|| format!("DELETE {} failed", path))?;
        Ok(())
    }

    pub async fn conversation_state(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationState> {
        let path = format!("/v1/users/{}/conversations/{}/state", user_id, conversation_id);
        self.request(reqwest::Method::GET, &path)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("GET {} failed", path))?
            .json::<ConversationState>()
            .await
            .context("Failed to decode conversation state")
    }

    pub async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences> {
        let path = format!("/v1/users/{}/preferences", user_id);
        self.request(reqwest::Method::GET, &path)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("GET {} failed", path))?
            .json::<UserPreferences>()
            .await
            .context("Failed to decode preferences")
    }

    pub async fn save_preferences(&self, user_id: &str, prefs: &UserPreferences) -> Result<bool> {
        let path = format!("/v1/users/{}/preferences", user_id);
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(prefs)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("PUT {} failed", path))?
            .json::<SavePreferencesResponse>()
            .await
            .context("Failed to decode preferences response")?;
        Ok(response.saved)
    }

    pub async fn rehydrate(&self, user_id: &str) -> Result<RehydratedContext> {
        let path = format!("/v1/users/{}/rehydrate", user_id);
        self.request(reqwest::Method::GET, &path)
            .send()
            .await?
            .error_for_status()
            .with_context(|| format!("GET {} failed", path))?
            .json::<RehydratedContext>()
            .await
            .context("Failed to decode rehydrated context")
    }

    pub async fn stream_events_forever(self, tx: Sender<FrontendEvent>) {
        loop {
            match self.stream_events_once(&tx).await {
                Ok(()) => {
                    tracing::info!("Event stream disconnected; reconnecting in 2s");
                }
                Err(error) => {
                    tracing::warn!("Event stream failed: {}; reconnecting in 2s", error);
                }
            }
            sleep(Duration::from_secs(2)).await;
        }
    }

    async fn stream_events_once(&self, tx: &Sender<FrontendEvent>) -> Result<()> {
        let ws_endpoint = format!("{}/v1/ws/events", self.ws_url);
        let mut request = ws_endpoint
            .into_client_request()
            .context("Invalid websocket endpoint URL")?;

        if let Some(token) = self.token.as_deref() {
            let value = WsHeaderValue::from_str(&format!("Bearer {}", token))
                .context("Invalid bearer token for websocket auth")?;
            request
                .headers_mut()
                .insert(ws_header::AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .context("Failed to connect websocket event stream")?;
        let (_write, mut read) = stream.split();

        while let Some(message) = read.next().await {
            match message.context("Websocket read error")? {
                Message::Text(text) => {
                    if let Some(event) = parse_event_envelope(&text)? {
                        let _ = tx.send(event);
                    }
                }
                Message::Close(_) => {
                    return Ok(());
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder
    }
}

fn parse_event_envelope(text: &str) -> Result<Option<FrontendEvent>> {
    let envelope: ApiEventEnvelope =
        serde_json::from_str(text).context("Failed to decode API event envelope")?;
    Ok(map_event(envelope))
}

fn payload_str(payload: &Value, key: &str) -> String {
    payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn map_event(envelope: ApiEventEnvelope) -> Option<FrontendEvent> {
    let payload = &envelope.payload;
    match envelope.event_type.as_str() {
        "theme_reflected" => Some(FrontendEvent::ThemeReflected {
            conversation_id: payload_str(payload, "conversation_id"),
            text: payload_str(payload, "text"),
        }),
        "persistence_degraded" => Some(FrontendEvent::PersistenceDegraded(payload_str(
            payload,
            "operation",
        ))),
        "fallback" => Some(FrontendEvent::Fallback {
            conversation_id: payload_str(payload, "conversation_id"),
        }),
        _ => None,
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        DEFAULT_BACKEND_URL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn normalize_ws_url(base_http_url: &str) -> String {
    if let Some(rest) = base_http_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_http_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        format!("ws://{}", base_http_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_base_url() {
        assert_eq!(normalize_base_url("http://x:1/"), "http://x:1");
        assert_eq!(normalize_base_url(""), "http://127.0.0.1:8797");
    }

    #[test]
    fn maps_http_to_ws_url() {
        assert_eq!(
            normalize_ws_url("http://127.0.0.1:8797"),
            "ws://127.0.0.1:8797"
        );
        assert_eq!(normalize_ws_url("https://example.com"), "wss://example.com");
    }

    #[test]
    fn theme_reflections_are_surfaced() {
        let event = parse_event_envelope(
            &serde_json::json!({
                "event_type": "theme_reflected",
                "emitted_at": "2026-10-16T09:00:00Z",
                "payload": {
                    "user_id": "ana",
                    "conversation_id": "c1",
                    "theme": "work_stress",
                    "text": "I've noticed the pressure at work has come up a couple of times."
                }
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(
            event,
            Some(FrontendEvent::ThemeReflected {
                conversation_id: "c1".to_string(),
                text: "I've noticed the pressure at work has come up a couple of times."
                    .to_string(),
            })
        );
    }

    #[test]
    fn routine_events_are_ignored() {
        let envelope = ApiEventEnvelope {
            event_type: "turn_composed".to_string(),
            payload: serde_json::json!({"turn": 1}),
        };
        assert!(map_event(envelope).is_none());
        assert!(parse_event_envelope("not json").is_err());
    }

    #[test]
    fn turn_result_decodes_from_backend_json() {
        let payload = serde_json::json!({
            "reply": "Oh yeah? What's got you heated?",
            "glyph": null,
            "affect": {
                "tone": "angry",
                "tone_confidence": 0.8,
                "valence": -0.7,
                "arousal": 0.8,
                "secondary_tones": [],
                "explanation": "expletive"
            },
            "processing_time_ms": 3,
            "response_class": "curiosity",
            "reflection": null,
            "turn": 1
        });
        let parsed: TurnResult = serde_json::from_value(payload).unwrap();
        assert_eq!(parsed.turn, 1);
        assert!(parsed.glyph.is_none());
    }
}
