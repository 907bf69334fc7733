//! Converts one upstream streaming event into zero or more canonical chunks,
//! folding per-request state (tool-call-in-progress arguments, latest usage,
//! finish reason) into an explicit accumulator rather than captured closures.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::canonical::{
    CanonicalChoiceDelta, CanonicalChunk, CanonicalFunctionDelta, CanonicalFunctionStart, CanonicalMessageDelta,
    CanonicalRole, CanonicalStreamingToolCall, CanonicalUsage,
};
use crate::provider::{ProviderKind, ToolCallFragment};

/// Per-request state threaded across every event of one stream.
#[derive(Debug, Default)]
pub struct Accumulator {
    pub full_content: String,
    pub usage: Option<CanonicalUsage>,
    pub finish_reason: Option<String>,
    tool_calls_by_index: BTreeMap<usize, (String, String)>,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembled `(id, name, arguments)` tuples once the stream has ended.
    pub fn finished_tool_calls(&self) -> Vec<(String, String, String)> {
        self.tool_calls_by_index
            .values()
            .map(|(id, name_and_args)| {
                let (name, args) = name_and_args.split_once('\u{0}').unwrap_or((name_and_args.as_str(), ""));
                (id.clone(), name.to_owned(), args.to_owned())
            })
            .collect()
    }
}

/// Transforms one raw event into the canonical chunks it produces (usually
/// zero or one; Anthropic occasionally needs none for bookkeeping-only
/// events like `ping`).
pub fn transform_event(
    kind: ProviderKind,
    event: &Value,
    accumulator: &mut Accumulator,
    id: &str,
    created: u64,
    served_model: &str,
) -> Vec<CanonicalChunk> {
    let mut delta = CanonicalMessageDelta::default();
    let mut produced = false;

    if let Some(content) = kind.extract_content(event) {
        accumulator.full_content.push_str(&content);
        delta.content = Some(content);
        produced = true;
    }

    if let Some(raw_reasoning) = kind.extract_raw_reasoning(event) {
        crate::provider::normalize_reasoning(&mut delta, Some(raw_reasoning));
        produced = true;
    }

    for fragment in kind.extract_tool_call_fragments(event, created as i64) {
        produced = true;
        apply_tool_call_fragment(accumulator, &mut delta, fragment);
    }

    if let Some(usage) = kind.extract_usage(event) {
        accumulator.usage = Some(usage);
        produced = true;
    }

    if let Some(finish_reason) = kind.extract_finish_reason(event) {
        accumulator.finish_reason = Some(finish_reason);
        produced = true;
    }

    if !produced {
        return Vec::new();
    }

    delta.role = Some(CanonicalRole::Assistant);

    vec![CanonicalChunk {
        id: id.to_owned(),
        object: "chat.completion.chunk",
        created,
        model: served_model.to_owned(),
        choices: vec![CanonicalChoiceDelta {
            index: 0,
            delta,
            finish_reason: accumulator.finish_reason.clone(),
        }],
        usage: accumulator.usage.clone(),
    }]
}

fn apply_tool_call_fragment(accumulator: &mut Accumulator, delta: &mut CanonicalMessageDelta, fragment: ToolCallFragment) {
    match fragment {
        ToolCallFragment::Start { index, id, name } => {
            accumulator.tool_calls_by_index.insert(index, (id.clone(), format!("{name}\u{0}")));

            let streaming = vec![CanonicalStreamingToolCall::Start {
                index,
                id,
                function: CanonicalFunctionStart { name, arguments: String::new() },
            }];

            merge_tool_calls(delta, streaming);
        }
        ToolCallFragment::ArgumentsDelta { index, partial_json } => {
            if let Some((_, buf)) = accumulator.tool_calls_by_index.get_mut(&index) {
                buf.push_str(&partial_json);
            }

            let streaming = vec![CanonicalStreamingToolCall::Delta {
                index,
                function: CanonicalFunctionDelta { arguments: partial_json },
            }];

            merge_tool_calls(delta, streaming);
        }
        ToolCallFragment::Complete { index, id, name, arguments } => {
            accumulator
                .tool_calls_by_index
                .insert(index, (id.clone(), format!("{name}\u{0}{arguments}")));

            let streaming = vec![
                CanonicalStreamingToolCall::Start {
                    index,
                    id,
                    function: CanonicalFunctionStart { name, arguments: String::new() },
                },
                CanonicalStreamingToolCall::Delta { index, function: CanonicalFunctionDelta { arguments } },
            ];

            merge_tool_calls(delta, streaming);
        }
    }
}

fn merge_tool_calls(delta: &mut CanonicalMessageDelta, mut new_calls: Vec<CanonicalStreamingToolCall>) {
    match &mut delta.tool_calls {
        Some(existing) => existing.append(&mut new_calls),
        None => delta.tool_calls = Some(new_calls),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assembles_anthropic_tool_call_across_events() {
        let mut accumulator = Accumulator::new();

        let start = json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": { "type": "tool_use", "id": "x", "name": "f" }
        });
        transform_event(ProviderKind::Anthropic, &start, &mut accumulator, "id", 0, "m");

        let delta1 = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "input_json_delta", "partial_json": "{\"a\":" }
        });
        transform_event(ProviderKind::Anthropic, &delta1, &mut accumulator, "id", 0, "m");

        let delta2 = json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "input_json_delta", "partial_json": "1}" }
        });
        transform_event(ProviderKind::Anthropic, &delta2, &mut accumulator, "id", 0, "m");

        let calls = accumulator.finished_tool_calls();
        assert_eq!(calls, vec![("x".to_owned(), "f".to_owned(), "{\"a\":1}".to_owned())]);
    }

    #[test]
    fn renames_google_content_into_content_delta() {
        let mut accumulator = Accumulator::new();
        let event = json!({
            "candidates": [{ "content": { "parts": [{ "text": "hi" }] } }]
        });

        let chunks = transform_event(ProviderKind::Google, &event, &mut accumulator, "id", 0, "m");
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("hi"));
    }
}
