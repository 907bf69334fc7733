//! The canonical (OpenAI-shaped) request/response/chunk types that every
//! provider-specific body is translated to and from. This is the gateway's
//! lingua franca in both directions — see `provider` for the per-shape
//! conversions.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat-completion request in the gateway's canonical wire format.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalRequest {
    /// A concrete model id, a `"provider/model"` string, or `"auto"`.
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub tools: Option<Vec<CanonicalTool>>,
    #[serde(default)]
    pub tool_choice: Option<CanonicalToolChoice>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub response_format: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalMessage {
    pub role: CanonicalRole,
    #[serde(default)]
    pub content: Option<CanonicalContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<CanonicalToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Message content, either plain text or a list of typed parts. The untagged
/// representation lets simple single-string messages round-trip without the
/// array wrapper every provider would otherwise force on callers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CanonicalContent {
    Text(String),
    Parts(Vec<CanonicalContentPart>),
}

impl CanonicalContent {
    /// Concatenates every text part, ignoring images/tool results. Used
    /// whenever a provider shape needs a flat string (e.g. Anthropic's
    /// `system` field).
    pub fn as_text(&self) -> String {
        match self {
            CanonicalContent::Text(text) => text.clone(),
            CanonicalContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    CanonicalContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrlPart },
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageUrlPart {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalTool {
    pub r#type: String,
    pub function: CanonicalFunction,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalFunction {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CanonicalToolChoice {
    Mode(String),
    Specific { function: CanonicalFunctionChoice },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalFunctionChoice {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalToolCall {
    pub id: String,
    pub r#type: String,
    pub function: CanonicalFunctionCall,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CanonicalFunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A single non-streaming response.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CanonicalChoice>,
    pub usage: CanonicalUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalChoice {
    pub index: u32,
    pub message: CanonicalMessage,
    pub finish_reason: Option<String>,
}

/// Token accounting, extended beyond the teacher's plain `UnifiedUsage` with
/// the reasoning/cached breakdown the cost calculator and finalization
/// worker both depend on.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CanonicalUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub reasoning_tokens: u32,
    #[serde(default)]
    pub cached_tokens: u32,
}

/// A single streamed chunk.
#[derive(Debug, Clone, Serialize)]
pub struct CanonicalChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CanonicalChoiceDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<CanonicalUsage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalChoiceDelta {
    pub index: u32,
    pub delta: CanonicalMessageDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CanonicalMessageDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<CanonicalRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Renamed from a provider's `reasoning` field; never co-present with a
    /// provider's own `reasoning_content` key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<CanonicalStreamingToolCall>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CanonicalStreamingToolCall {
    Start {
        index: usize,
        id: String,
        function: CanonicalFunctionStart,
    },
    Delta {
        index: usize,
        function: CanonicalFunctionDelta,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalFunctionStart {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanonicalFunctionDelta {
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_as_text_ignores_non_text_parts() {
        let content = CanonicalContent::Parts(vec![
            CanonicalContentPart::Text { text: "a".into() },
            CanonicalContentPart::ImageUrl {
                image_url: ImageUrlPart { url: "https://x/y.png".into() },
            },
            CanonicalContentPart::Text { text: "b".into() },
        ]);

        assert_eq!(content.as_text(), "ab");
    }

    #[test]
    fn simple_text_message_round_trips_without_array_wrapper() {
        let json = r#"{"role":"user","content":"hi"}"#;
        let message: CanonicalMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message.content, Some(CanonicalContent::Text(ref t)) if t == "hi"));
    }
}
