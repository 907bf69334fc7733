use serde_json::{Value, json};

use crate::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalMessage, CanonicalRequest, CanonicalResponse, CanonicalRole,
    CanonicalUsage,
};
use crate::error::LlmError;
use crate::registry::ProviderMapping;

use super::ToolCallFragment;

pub(super) fn prepare_body(request: &CanonicalRequest, mapping: &ProviderMapping, stream: bool) -> Value {
    let mut system = None;
    let mut messages = Vec::new();

    for message in &request.messages {
        if message.role == CanonicalRole::System {
            system = message.content.as_ref().map(CanonicalContent::as_text);
            continue;
        }

        if message.role == CanonicalRole::Tool {
            messages.push(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                    "content": message.content.as_ref().map(CanonicalContent::as_text).unwrap_or_default(),
                }],
            }));
            continue;
        }

        messages.push(json!({
            "role": if message.role == CanonicalRole::Assistant { "assistant" } else { "user" },
            "content": message.content.as_ref().map(CanonicalContent::as_text).unwrap_or_default(),
        }));
    }

    let mut body = json!({
        "model": mapping.upstream_model_name,
        "messages": messages,
        "stream": stream,
        "max_tokens": request.max_tokens.unwrap_or(4096),
    });

    let obj = body.as_object_mut().expect("object literal");

    if let Some(system) = system {
        obj.insert("system".to_owned(), json!(system));
    }

    if mapping.supports_parameter("temperature")
        && let Some(temperature) = request.temperature
    {
        obj.insert("temperature".to_owned(), json!(temperature));
    }

    if mapping.supports_parameter("tools")
        && let Some(tools) = &request.tools
    {
        obj.insert("tools".to_owned(), json!(tools));
    }

    body
}

pub(super) fn parse_response(body: &Value, served_model: &str) -> Result<CanonicalResponse, LlmError> {
    let content_blocks = body["content"].as_array().cloned().unwrap_or_default();

    let text = content_blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    let tool_calls: Vec<_> = content_blocks
        .iter()
        .filter(|b| b["type"] == "tool_use")
        .map(|b| {
            crate::canonical::CanonicalToolCall {
                id: b["id"].as_str().unwrap_or("toolu_0").to_owned(),
                r#type: "function".to_owned(),
                function: crate::canonical::CanonicalFunctionCall {
                    name: b["name"].as_str().unwrap_or_default().to_owned(),
                    arguments: b["input"].to_string(),
                },
            }
        })
        .collect();

    let finish_reason = map_stop_reason(body["stop_reason"].as_str());

    Ok(CanonicalResponse {
        id: body["id"].as_str().unwrap_or_default().to_owned(),
        object: "chat.completion",
        created: 0,
        model: served_model.to_owned(),
        choices: vec![CanonicalChoice {
            index: 0,
            message: CanonicalMessage {
                role: CanonicalRole::Assistant,
                content: if text.is_empty() { None } else { Some(CanonicalContent::Text(text)) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: None,
            },
            finish_reason,
        }],
        usage: extract_usage(body).unwrap_or_default(),
    })
}

fn map_stop_reason(stop_reason: Option<&str>) -> Option<String> {
    match stop_reason? {
        "end_turn" | "stop_sequence" => Some("stop".to_owned()),
        "max_tokens" => Some("length".to_owned()),
        "tool_use" => Some("tool_calls".to_owned()),
        "refusal" => Some("content_filter".to_owned()),
        other => Some(other.to_owned()),
    }
}

pub(super) fn extract_content(event: &Value) -> Option<String> {
    match event["type"].as_str()? {
        "content_block_delta" => event["delta"]["text"].as_str().map(str::to_owned),
        _ => None,
    }
}

pub(super) fn extract_finish_reason(event: &Value) -> Option<String> {
    match event["type"].as_str()? {
        "message_delta" => map_stop_reason(event["delta"]["stop_reason"].as_str()),
        _ => None,
    }
}

/// Prompt tokens per the invariant in §8: `input + cache_creation + cache_read`.
pub(super) fn extract_usage(event: &Value) -> Option<CanonicalUsage> {
    let usage = if event["type"] == "message_delta" { &event["usage"] } else { event.get("usage")? };

    if usage.is_null() {
        return None;
    }

    let input = usage["input_tokens"].as_u64().unwrap_or_default() as u32;
    let cache_creation = usage["cache_creation_input_tokens"].as_u64().unwrap_or_default() as u32;
    let cache_read = usage["cache_read_input_tokens"].as_u64().unwrap_or_default() as u32;
    let output = usage["output_tokens"].as_u64().unwrap_or_default() as u32;
    let reasoning = usage["reasoning_output_tokens"].as_u64().unwrap_or_default() as u32;

    let prompt_tokens = input + cache_creation + cache_read;

    Some(CanonicalUsage {
        prompt_tokens,
        completion_tokens: output,
        total_tokens: prompt_tokens + output,
        reasoning_tokens: reasoning,
        cached_tokens: cache_read,
    })
}

pub(super) fn extract_tool_call_fragments(event: &Value) -> Vec<ToolCallFragment> {
    match event["type"].as_str() {
        Some("content_block_start") if event["content_block"]["type"] == "tool_use" => {
            let Some(index) = event["index"].as_u64() else { return Vec::new() };
            vec![ToolCallFragment::Start {
                index: index as usize,
                id: event["content_block"]["id"].as_str().unwrap_or_default().to_owned(),
                name: event["content_block"]["name"].as_str().unwrap_or_default().to_owned(),
            }]
        }
        Some("content_block_delta") if event["delta"]["type"] == "input_json_delta" => {
            let Some(index) = event["index"].as_u64() else { return Vec::new() };
            let Some(partial_json) = event["delta"]["partial_json"].as_str() else { return Vec::new() };
            vec![ToolCallFragment::ArgumentsDelta { index: index as usize, partial_json: partial_json.to_owned() }]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_tool_use_stop_reason_to_tool_calls() {
        assert_eq!(map_stop_reason(Some("tool_use")), Some("tool_calls".to_owned()));
    }

    #[test]
    fn usage_includes_cache_tokens_in_prompt_total() {
        let event = json!({
            "usage": {
                "input_tokens": 10,
                "cache_creation_input_tokens": 2,
                "cache_read_input_tokens": 3,
                "output_tokens": 5,
            }
        });

        let usage = extract_usage(&event).unwrap();
        assert_eq!(usage.prompt_tokens, 15);
        assert_eq!(usage.cached_tokens, 3);
    }
}
