//! Per-upstream-shape request translation and response/stream parsing.
//!
//! Three wire shapes cover every provider in the registry: OpenAI-compatible
//! (shared by ~15 vendors), Anthropic's Messages API, and Google AI Studio.
//! Each is a thin `ProviderKind` variant rather than a struct per vendor,
//! since the only per-vendor difference among the OpenAI-shaped group is the
//! base URL already captured on the `ProviderDescriptor`.

mod anthropic;
mod google;
mod openai;

use serde_json::Value;

use crate::canonical::{CanonicalMessageDelta, CanonicalRequest, CanonicalResponse, CanonicalUsage};
use crate::error::LlmError;
use crate::registry::ProviderMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAiShape,
    Anthropic,
    Google,
}

impl ProviderKind {
    pub fn for_provider_id(id: &str) -> Self {
        match id {
            "anthropic" => ProviderKind::Anthropic,
            "google" => ProviderKind::Google,
            _ => ProviderKind::OpenAiShape,
        }
    }

    /// Builds the provider-specific request body.
    pub fn prepare_body(self, request: &CanonicalRequest, mapping: &ProviderMapping, stream: bool) -> Value {
        match self {
            ProviderKind::OpenAiShape => openai::prepare_body(request, mapping, stream),
            ProviderKind::Anthropic => anthropic::prepare_body(request, mapping, stream),
            ProviderKind::Google => google::prepare_body(request, mapping),
        }
    }

    /// Parses a non-streaming upstream response into the canonical shape.
    /// `now` seeds the synthetic tool-call ids Google's shape needs.
    pub fn parse_response(self, body: &Value, served_model: &str, now: i64) -> Result<CanonicalResponse, LlmError> {
        match self {
            ProviderKind::OpenAiShape => openai::parse_response(body, served_model),
            ProviderKind::Anthropic => anthropic::parse_response(body, served_model),
            ProviderKind::Google => google::parse_response(body, served_model, now),
        }
    }

    /// Extracts the visible-content delta for one streaming event, if any.
    pub fn extract_content(self, event: &Value) -> Option<String> {
        match self {
            ProviderKind::OpenAiShape => openai::extract_content(event),
            ProviderKind::Anthropic => anthropic::extract_content(event),
            ProviderKind::Google => google::extract_content(event),
        }
    }

    /// Extracts remote image parts emitted inline by a provider (Google only today).
    pub fn extract_images(self, event: &Value) -> Vec<(String, String)> {
        match self {
            ProviderKind::Google => google::extract_images(event),
            _ => Vec::new(),
        }
    }

    pub fn extract_usage(self, event: &Value) -> Option<CanonicalUsage> {
        match self {
            ProviderKind::OpenAiShape => openai::extract_usage(event),
            ProviderKind::Anthropic => anthropic::extract_usage(event),
            ProviderKind::Google => google::extract_usage(event),
        }
    }

    pub fn extract_finish_reason(self, event: &Value) -> Option<String> {
        match self {
            ProviderKind::OpenAiShape => openai::extract_finish_reason(event),
            ProviderKind::Anthropic => anthropic::extract_finish_reason(event),
            ProviderKind::Google => google::extract_finish_reason(event),
        }
    }

    /// A bare `reasoning` delta field, before it's renamed to
    /// `reasoning_content` by [`normalize_reasoning`]. Only the OpenAI shape
    /// has vendors (e.g. DeepSeek's reasoner models) that emit this.
    pub fn extract_raw_reasoning(self, event: &Value) -> Option<String> {
        match self {
            ProviderKind::OpenAiShape => openai::extract_raw_reasoning(event),
            ProviderKind::Anthropic | ProviderKind::Google => None,
        }
    }

    /// Raw tool-call fragments for one streaming event, keyed by block/array
    /// index so the accumulator in `stream_transformer` can assemble full
    /// arguments incrementally (see scenario S4).
    pub fn extract_tool_call_fragments(self, event: &Value, now: i64) -> Vec<ToolCallFragment> {
        match self {
            ProviderKind::OpenAiShape => openai::extract_tool_call_fragments(event),
            ProviderKind::Anthropic => anthropic::extract_tool_call_fragments(event),
            ProviderKind::Google => google::extract_tool_call_fragments(event, now),
        }
    }
}

/// A raw, provider-shape-specific fragment of a tool call observed in one
/// streaming event, before accumulation.
#[derive(Debug, Clone)]
pub enum ToolCallFragment {
    Start { index: usize, id: String, name: String },
    ArgumentsDelta { index: usize, partial_json: String },
    /// A fully-formed call emitted in one event (Google's function calls
    /// arrive whole rather than incrementally).
    Complete { index: usize, id: String, name: String, arguments: String },
}

/// Renames a provider's bare `reasoning` delta field to `reasoning_content`,
/// the one normalization every shape shares (invariant in §8: the two never
/// co-occur on a canonical delta).
pub(crate) fn normalize_reasoning(delta: &mut CanonicalMessageDelta, raw_reasoning: Option<String>) {
    if delta.reasoning_content.is_none() {
        delta.reasoning_content = raw_reasoning;
    }
}
