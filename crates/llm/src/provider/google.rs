use serde_json::{Value, json};

use crate::canonical::{
    CanonicalChoice, CanonicalContent, CanonicalMessage, CanonicalRequest, CanonicalResponse, CanonicalRole,
    CanonicalToolCall, CanonicalUsage,
};
use crate::error::LlmError;
use crate::registry::ProviderMapping;

use super::ToolCallFragment;

pub(super) fn prepare_body(request: &CanonicalRequest, mapping: &ProviderMapping) -> Value {
    let mut contents = Vec::new();
    let mut system_instruction = None;

    for message in &request.messages {
        let text = message.content.as_ref().map(CanonicalContent::as_text).unwrap_or_default();

        match message.role {
            CanonicalRole::System => system_instruction = Some(text),
            CanonicalRole::Assistant => contents.push(json!({ "role": "model", "parts": [{ "text": text }] })),
            _ => contents.push(json!({ "role": "user", "parts": [{ "text": text }] })),
        }
    }

    let mut body = json!({ "contents": contents });
    let obj = body.as_object_mut().expect("object literal");

    if let Some(system) = system_instruction {
        obj.insert("systemInstruction".to_owned(), json!({ "parts": [{ "text": system }] }));
    }

    let mut generation_config = serde_json::Map::new();

    if mapping.supports_parameter("max_tokens")
        && let Some(max_tokens) = request.max_tokens
    {
        generation_config.insert("maxOutputTokens".to_owned(), json!(max_tokens));
    }

    if mapping.supports_parameter("temperature")
        && let Some(temperature) = request.temperature
    {
        generation_config.insert("temperature".to_owned(), json!(temperature));
    }

    if !generation_config.is_empty() {
        obj.insert("generationConfig".to_owned(), Value::Object(generation_config));
    }

    body
}

pub(super) fn parse_response(body: &Value, served_model: &str, now: i64) -> Result<CanonicalResponse, LlmError> {
    let candidate = body["candidates"].get(0).ok_or_else(|| LlmError::InternalError(Some("empty candidates".into())))?;

    let parts = candidate["content"]["parts"].as_array().cloned().unwrap_or_default();

    let text = parts
        .iter()
        .filter(|p| p["thought"].as_bool() != Some(true))
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    let tool_calls: Vec<CanonicalToolCall> = parts
        .iter()
        .enumerate()
        .filter(|(_, p)| p.get("functionCall").is_some())
        .map(|(i, p)| CanonicalToolCall {
            id: format!("{}_{}_{}", p["functionCall"]["name"].as_str().unwrap_or("call"), now, i),
            r#type: "function".to_owned(),
            function: crate::canonical::CanonicalFunctionCall {
                name: p["functionCall"]["name"].as_str().unwrap_or_default().to_owned(),
                arguments: p["functionCall"]["args"].to_string(),
            },
        })
        .collect();

    Ok(CanonicalResponse {
        id: String::new(),
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
            finish_reason: candidate["finishReason"].as_str().map(str::to_owned),
        }],
        usage: extract_usage(body).unwrap_or_default(),
    })
}

pub(super) fn extract_content(event: &Value) -> Option<String> {
    let parts = event["candidates"][0]["content"]["parts"].as_array()?;

    let text = parts
        .iter()
        .filter(|p| p["thought"].as_bool() != Some(true))
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() { None } else { Some(text) }
}

pub(super) fn extract_images(event: &Value) -> Vec<(String, String)> {
    let Some(parts) = event["candidates"][0]["content"]["parts"].as_array() else { return Vec::new() };

    parts
        .iter()
        .filter_map(|p| {
            let inline = p.get("inlineData")?;
            let mime = inline["mimeType"].as_str()?.to_owned();
            let data = inline["data"].as_str()?.to_owned();
            Some((mime, data))
        })
        .collect()
}

pub(super) fn extract_finish_reason(event: &Value) -> Option<String> {
    event["candidates"][0]["finishReason"].as_str().map(str::to_owned)
}

/// Google's `usageMetadata.totalTokenCount` excludes reasoning tokens, so the
/// total is recomputed from the three parts rather than trusted directly.
pub(super) fn extract_usage(event: &Value) -> Option<CanonicalUsage> {
    let usage = event.get("usageMetadata")?;

    if usage.is_null() {
        return None;
    }

    let prompt_tokens = usage["promptTokenCount"].as_u64().unwrap_or_default() as u32;
    let completion_tokens = usage["candidatesTokenCount"].as_u64().unwrap_or_default() as u32;
    let reasoning_tokens = usage["thoughtsTokenCount"].as_u64().unwrap_or_default() as u32;

    Some(CanonicalUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens: prompt_tokens + completion_tokens + reasoning_tokens,
        reasoning_tokens,
        cached_tokens: 0,
    })
}

pub(super) fn extract_tool_call_fragments(event: &Value, now: i64) -> Vec<ToolCallFragment> {
    let Some(parts) = event["candidates"][0]["content"]["parts"].as_array() else { return Vec::new() };

    parts
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let call = p.get("functionCall")?;
            Some(ToolCallFragment::Complete {
                index: i,
                id: format!("{}_{}_{}", call["name"].as_str().unwrap_or("call"), now, i),
                name: call["name"].as_str().unwrap_or_default().to_owned(),
                arguments: call["args"].to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_tokens_includes_reasoning() {
        let event = json!({
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "thoughtsTokenCount": 3 }
        });

        let usage = extract_usage(&event).unwrap();
        assert_eq!(usage.total_tokens, 18);
    }

    #[test]
    fn ignores_thought_parts_in_content_extraction() {
        let event = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "hidden reasoning", "thought": true },
                { "text": "visible" },
            ] } }]
        });

        assert_eq!(extract_content(&event).as_deref(), Some("visible"));
    }
}
