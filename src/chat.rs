//! Chat completion and conversation history

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{ChatConfig, VoiceConfig};
use crate::voice::http_client;
use crate::{Error, Result};

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Fixed instructions
    System,
    /// The person talking to the eyes
    User,
    /// The model's replies
    Assistant,
}

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// Create a message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Bounded history that always starts with the system turn
///
/// Once `cap` is exceeded the oldest non-system turns are evicted.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
    cap: usize,
}

impl ConversationHistory {
    /// Create a history holding only the system turn
    ///
    /// A cap below 2 is raised to 2 so one turn fits beside the system turn.
    #[must_use]
    pub fn new(system_prompt: &str, cap: usize) -> Self {
        Self {
            messages: vec![ChatMessage::new(Role::System, system_prompt)],
            cap: cap.max(2),
        }
    }

    /// Append a turn, evicting the oldest non-system turns past the cap
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage::new(role, content));
        let excess = self.messages.len().saturating_sub(self.cap);
        if excess > 0 {
            self.messages.drain(1..=excess);
        }
    }

    /// Turns to send for a new user message, capped, without recording it
    #[must_use]
    pub fn request_with(&self, user: &str) -> Vec<ChatMessage> {
        let mut pending = self.clone();
        pending.push(Role::User, user);
        pending.messages
    }

    /// Record a completed user/assistant exchange
    pub fn record_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.push(Role::User, user);
        self.push(Role::Assistant, assistant);
    }

    /// Drop everything but the system turn
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// All turns, system first
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of turns including the system turn
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether only the system turn is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    /// Maximum number of turns kept
    #[must_use]
    pub const fn cap(&self) -> usize {
        self.cap
    }
}

/// Produces a reply to a conversation
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Complete the conversation with one assistant reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Chat`/`Error::Http` if the service fails
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
}

impl OpenAiChat {
    /// Create a chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(voice: &VoiceConfig, chat: &ChatConfig) -> Result<Self> {
        let api_key = voice.require_api_key("chat")?;

        Ok(Self {
            client: http_client(voice.request_timeout)?,
            base_url: voice.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: chat.model.clone(),
            max_tokens: chat.max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
        };

        tracing::debug!(model = %self.model, turns = messages.len(), "requesting chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Chat(format!("chat API error {status}: {body}")));
        }

        let body: CompletionResponse = response.json().await?;
        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Chat("empty completion".to_string()))?;

        tracing::info!(reply = %reply, "chat reply");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_system_turn_under_cap() {
        let mut history = ConversationHistory::new("be brief", 4);
        for i in 0..10 {
            history.push(Role::User, format!("u{i}"));
            history.push(Role::Assistant, format!("a{i}"));
            assert!(history.len() <= 4);
            assert_eq!(history.messages()[0].role, Role::System);
        }
        let last: Vec<_> = history.messages()[1..]
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(last, vec!["a8", "u9", "a9"]);
    }

    #[test]
    fn test_request_leaves_full_history_untouched() {
        let mut history = ConversationHistory::new("sys", 3);
        history.record_exchange("u0", "a0");
        let before = history.messages().to_vec();

        let request = history.request_with("u1");
        let contents: Vec<_> = request.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["sys", "a0", "u1"]);
        assert_eq!(history.messages(), before.as_slice());

        history.record_exchange("u1", "a1");
        assert_eq!(history.len(), 3);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.messages()[2].content, "a1");
    }

    #[test]
    fn test_reset_and_minimum_cap() {
        let mut history = ConversationHistory::new("sys", 0);
        assert_eq!(history.cap(), 2);
        history.push(Role::User, "a");
        history.push(Role::User, "b");
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[1].content, "b");
        history.reset();
        assert!(history.is_empty());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::new(Role::Assistant, "ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
