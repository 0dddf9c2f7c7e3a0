use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::lexicon::Tone;

/// What the grounded responder sees: the message, its tone, and a few recent
/// exchanges for continuity.
#[derive(Debug, Clone)]
pub struct ResponderRequest {
    pub utterance: String,
    pub tone: Tone,
    pub recent: Vec<(String, String)>,
}

/// Produces a short, plain reply when the local template was rejected.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, request: &ResponderRequest) -> Result<String>;
}

const SYSTEM_PROMPT: &str = "You are a warm, grounded listener. Reply in one or two short sentences \
(under 40 words). Reflect what the person said in plain, everyday language, then ask one open question. \
No metaphors, no poetry, no advice lists, no diagnoses.";

#[derive(Clone)]
pub struct LlmResponder {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

impl LlmResponder {
    pub fn new(api_url: String, api_key: String, model: String, timeout: Duration) -> Result<Self> {
        let client = crate::http_client::build_http_client(Some(timeout))?;
        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            client,
        })
    }

    fn messages_for(request: &ResponderRequest) -> Vec<Message> {
        let mut messages = vec![Message {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        }];
        for (user, assistant) in &request.recent {
            messages.push(Message {
                role: "user".to_string(),
                content: user.clone(),
            });
            messages.push(Message {
                role: "assistant".to_string(),
                content: assistant.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: format!("[tone: {}] {}", request.tone, request.utterance),
        });
        messages
    }

    /// Generate a completion using the OpenAI API format
    async fn generate(&self, messages: Vec<Message>) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_url);

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.6),
            max_tokens: Some(120),
        };

        let mut req = self.client.post(&url).json(&request);

        // Local models usually run without a key
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let response = req.send().await.context("Failed to send responder request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read body".to_string());
            anyhow::bail!("Responder API returned error {}: {}", status, body);
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse responder response")?;

        completion
            .choices
            .first()
            .map(|c| strip_reasoning(&c.message.content))
            .filter(|content| !content.is_empty())
            .ok_or_else(|| anyhow::anyhow!("No response from responder model"))
    }
}

/// Drops any `<think>...</think>` preamble some local models emit.
fn strip_reasoning(content: &str) -> String {
    let cleaned = match content.rfind("</think>") {
        Some(end) => &content[end + "</think>".len()..],
        None => content,
    };
    cleaned.trim().to_string()
}

#[async_trait]
impl Responder for LlmResponder {
    async fn respond(&self, request: &ResponderRequest) -> Result<String> {
        self.generate(Self::messages_for(request)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_preamble_is_removed() {
        assert_eq!(strip_reasoning("<think>hmm</think>\n That sounds hard."), "That sounds hard.");
        assert_eq!(strip_reasoning("  plain  "), "plain");
    }

    #[test]
    fn history_is_interleaved_before_the_new_message() {
        let request = ResponderRequest {
            utterance: "still tired".into(),
            tone: Tone::Sad,
            recent: vec![("hi".into(), "Hello. How are you?".into())],
        };
        let messages = LlmResponder::messages_for(&request);
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(messages[3].content, "[tone: sad] still tired");
    }
}
