//! Chat completion types.

use serde::{Deserialize, Serialize};

use crate::errors::ModelScopeError;

/// Chat completion request body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model ID.
    pub model: String,

    /// Conversation context, sent verbatim.
    pub messages: Vec<Message>,

    /// Whether the response is an event stream.
    pub stream: bool,

    /// Sampling temperature (0.0-2.0).
    pub temperature: f32,
}

impl ChatRequest {
    /// Creates a new request.
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        stream: bool,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            stream,
            temperature,
        }
    }

    /// Validates the request.
    pub fn validate(&self) -> Result<(), ModelScopeError> {
        if self.model.is_empty() {
            return Err(ModelScopeError::validation_param("Model is required", "model"));
        }

        if self.messages.is_empty() {
            return Err(ModelScopeError::validation_param(
                "At least one message is required",
                "messages",
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ModelScopeError::validation_param(
                format!(
                    "Temperature must be between 0.0 and 2.0, got {}",
                    self.temperature
                ),
                "temperature",
            ));
        }

        Ok(())
    }
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: Role,

    /// Message content.
    pub content: String,
}

impl Message {
    /// Creates a message with an explicit role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// User message.
    User,
    /// Assistant message.
    Assistant,
}

/// Non-streaming chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Completion ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Model that produced the completion.
    #[serde(default)]
    pub model: Option<String>,
    /// Completion choices.
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Returns the content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

/// A completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// The generated message.
    #[serde(default)]
    pub message: Option<AssistantMessage>,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message returned by the assistant.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    /// Role as reported by the service.
    #[serde(default)]
    pub role: Option<String>,
    /// Text content.
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens.
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens.
    #[serde(default)]
    pub total_tokens: u32,
}

/// One decoded event of a streaming completion.
///
/// Every field is optional on the wire; role-only and usage-only events are
/// valid chunks that carry no content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    /// Completion ID.
    #[serde(default)]
    pub id: Option<String>,
    /// Incremental choices.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    /// Token usage, usually only on the last chunk.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatChunk {
    /// Returns the content delta of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

/// A streaming choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    /// Choice index.
    #[serde(default)]
    pub index: u32,
    /// The incremental delta.
    #[serde(default)]
    pub delta: Delta,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    /// Role, usually only on the first chunk.
    #[serde(default)]
    pub role: Option<String>,
    /// Content fragment.
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest::new(
            "ZhipuAI/GLM-4.7-Flash",
            vec![Message::system("You are terse."), Message::user("Hello")],
            true,
            0.5,
        );

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "ZhipuAI/GLM-4.7-Flash",
                "messages": [
                    {"role": "system", "content": "You are terse."},
                    {"role": "user", "content": "Hello"}
                ],
                "stream": true,
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn test_request_validation() {
        assert!(ChatRequest::new("m", vec![Message::user("hi")], false, 0.7)
            .validate()
            .is_ok());
        assert!(ChatRequest::new("m", vec![], false, 0.7).validate().is_err());
        assert!(ChatRequest::new("", vec![Message::user("hi")], false, 0.7)
            .validate()
            .is_err());
        assert!(ChatRequest::new("m", vec![Message::user("hi")], false, 2.5)
            .validate()
            .is_err());
    }

    #[test]
    fn test_chunk_content_extraction() {
        let chunk: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap();
        assert_eq!(chunk.content(), Some("Hi"));

        let role_only: ChatChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap();
        assert_eq!(role_only.content(), None);

        let usage_only: ChatChunk =
            serde_json::from_str(r#"{"choices":[],"usage":{"total_tokens":12}}"#).unwrap();
        assert_eq!(usage_only.content(), None);
        assert_eq!(usage_only.usage.map(|u| u.total_tokens), Some(12));
    }

    #[test]
    fn test_response_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"c1","choices":[{"index":0,"message":{"role":"assistant","content":"Hello there"},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(response.content(), Some("Hello there"));

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.content(), None);
    }
}
