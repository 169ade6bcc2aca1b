use serde::{Deserialize, Serialize};

use crate::agents::ScaffoldingType;

/// Message in a chat completion conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Completion response; only the fields the engine reads.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChoiceMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

impl ChatResponse {
    /// Trimmed text of the first choice, if it has any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// Everything the backend gets for one agent reply.
///
/// `map_description` must already be label-only (see
/// [`ConceptMap::describe`](crate::concept_map::ConceptMap::describe)).
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub session_id: String,
    pub round: usize,
    pub system: String,
    pub scaffolding_type: ScaffoldingType,
    /// Template the reply may build on.
    pub seed_template: Option<String>,
    pub map_description: String,
    /// Prior turns of the round, learner turns as `user`.
    pub turns: Vec<ChatMessage>,
}

impl GenerationRequest {
    /// Flatten into chat messages: one system message followed by the turns.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut system = format!(
            "{}\n\nScaffolding type: {}\n\nThe learner's current concept map:\n{}",
            self.system,
            self.scaffolding_type,
            self.map_description.trim_end()
        );
        if let Some(seed) = &self.seed_template {
            system.push_str("\n\nA question you may adapt: ");
            system.push_str(seed);
        }

        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        messages.push(ChatMessage::system(system));
        messages.extend(self.turns.iter().cloned());
        messages
    }
}

/// A successful backend reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
}

/// What the orchestrator consumes for a forwarded turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Success { text: String, model: String },
    Fallback { reason: String },
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, MessageRole::System);
        assert_eq!(ChatMessage::user("u").role, MessageRole::User);
        assert_eq!(ChatMessage::assistant("a").role, MessageRole::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn test_response_content() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "model": "gpt-4o",
            "choices": [{"message": {"role": "assistant", "content": "  How do they relate?  "}}]
        }))
        .unwrap();
        assert_eq!(response.content(), Some("How do they relate?"));

        let empty: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "   "}}]
        }))
        .unwrap();
        assert_eq!(empty.content(), None);

        let none: ChatResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(none.content(), None);
    }

    #[test]
    fn test_request_messages() {
        let request = GenerationRequest {
            session_id: "s".into(),
            round: 1,
            system: "Be helpful.".into(),
            scaffolding_type: ScaffoldingType::Procedural,
            seed_template: Some("What next?".into()),
            map_description: "Concepts:\n- Pricing\n".into(),
            turns: vec![
                ChatMessage::assistant("Start with one concept."),
                ChatMessage::user("I added Pricing because it matters"),
            ],
        };
        let messages = request.to_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.contains("Scaffolding type: procedural"));
        assert!(messages[0].content.contains("- Pricing"));
        assert!(messages[0].content.ends_with("What next?"));
        assert_eq!(messages[2].role, MessageRole::User);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(GenerationOutcome::Fallback {
            reason: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "fallback");
        assert_eq!(json["reason"], "timeout");
    }
}
