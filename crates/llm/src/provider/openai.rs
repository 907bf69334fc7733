use serde_json::{Value, json};

use crate::canonical::{CanonicalResponse, CanonicalUsage};
use crate::error::LlmError;
use crate::registry::ProviderMapping;

use super::ToolCallFragment;

pub(super) fn prepare_body(request: &crate::canonical::CanonicalRequest, mapping: &ProviderMapping, stream: bool) -> Value {
    let mut body = json!({
        "model": mapping.upstream_model_name,
        "messages": request.messages,
        "stream": stream,
    });

    let obj = body.as_object_mut().expect("object literal");

    if stream {
        obj.insert("stream_options".to_owned(), json!({ "include_usage": true }));
    }

    if mapping.supports_parameter("max_tokens")
        && let Some(max_tokens) = request.max_tokens
    {
        obj.insert("max_tokens".to_owned(), json!(max_tokens));
    }

    if mapping.supports_parameter("temperature")
        && let Some(temperature) = request.temperature
    {
        obj.insert("temperature".to_owned(), json!(temperature));
    }

    if mapping.supports_parameter("top_p")
        && let Some(top_p) = request.top_p
    {
        obj.insert("top_p".to_owned(), json!(top_p));
    }

    if mapping.supports_parameter("frequency_penalty")
        && let Some(v) = request.frequency_penalty
    {
        obj.insert("frequency_penalty".to_owned(), json!(v));
    }

    if mapping.supports_parameter("presence_penalty")
        && let Some(v) = request.presence_penalty
    {
        obj.insert("presence_penalty".to_owned(), json!(v));
    }

    if mapping.supports_parameter("tools")
        && let Some(tools) = &request.tools
    {
        obj.insert("tools".to_owned(), json!(tools));
    }

    if mapping.supports_parameter("tool_choice")
        && let Some(tool_choice) = &request.tool_choice
    {
        obj.insert("tool_choice".to_owned(), json!(tool_choice));
    }

    if mapping.supports_reasoning
        && let Some(effort) = request.reasoning_effort
    {
        obj.insert("reasoning_effort".to_owned(), json!(effort));
    }

    if mapping.supports_parameter("response_format")
        && let Some(format) = &request.response_format
    {
        obj.insert("response_format".to_owned(), format.clone());
    }

    body
}

pub(super) fn parse_response(body: &Value, served_model: &str) -> Result<CanonicalResponse, LlmError> {
    let choice = body["choices"].get(0).ok_or_else(|| LlmError::InternalError(Some("empty choices".into())))?;

    let message: crate::canonical::CanonicalMessage =
        serde_json::from_value(choice["message"].clone()).map_err(|e| LlmError::InternalError(Some(e.to_string())))?;

    let usage = extract_usage(body).unwrap_or_default();

    Ok(CanonicalResponse {
        id: body["id"].as_str().unwrap_or_default().to_owned(),
        object: "chat.completion",
        created: body["created"].as_u64().unwrap_or_default(),
        model: served_model.to_owned(),
        choices: vec![crate::canonical::CanonicalChoice {
            index: 0,
            message,
            finish_reason: choice["finish_reason"].as_str().map(str::to_owned),
        }],
        usage,
    })
}

pub(super) fn extract_content(event: &Value) -> Option<String> {
    event["choices"][0]["delta"]["content"].as_str().map(str::to_owned)
}

pub(super) fn extract_finish_reason(event: &Value) -> Option<String> {
    event["choices"][0]["finish_reason"].as_str().map(str::to_owned)
}

/// DeepSeek's reasoner models (and a few other OpenAI-shaped vendors) put
/// thinking content on a bare `reasoning` field instead of `reasoning_content`.
pub(super) fn extract_raw_reasoning(event: &Value) -> Option<String> {
    let delta = &event["choices"][0]["delta"];

    if delta.get("reasoning_content").is_some() {
        return None;
    }

    delta["reasoning"].as_str().map(str::to_owned)
}

pub(super) fn extract_usage(event: &Value) -> Option<CanonicalUsage> {
    let usage = event.get("usage")?;
    if usage.is_null() {
        return None;
    }

    Some(CanonicalUsage {
        prompt_tokens: usage["prompt_tokens"].as_u64().unwrap_or_default() as u32,
        completion_tokens: usage["completion_tokens"].as_u64().unwrap_or_default() as u32,
        total_tokens: usage["total_tokens"].as_u64().unwrap_or_default() as u32,
        reasoning_tokens: usage["reasoning_tokens"].as_u64().unwrap_or_default() as u32,
        cached_tokens: usage["prompt_tokens_details"]["cached_tokens"].as_u64().unwrap_or_default() as u32,
    })
}

pub(super) fn extract_tool_call_fragments(event: &Value) -> Vec<ToolCallFragment> {
    let Some(tool_calls) = event["choices"][0]["delta"]["tool_calls"].as_array() else {
        return Vec::new();
    };

    tool_calls
        .iter()
        .filter_map(|call| {
            let index = call["index"].as_u64()? as usize;

            if let Some(name) = call["function"]["name"].as_str() {
                Some(ToolCallFragment::Start {
                    index,
                    id: call["id"].as_str().unwrap_or_default().to_owned(),
                    name: name.to_owned(),
                })
            } else {
                call["function"]["arguments"].as_str().map(|args| ToolCallFragment::ArgumentsDelta {
                    index,
                    partial_json: args.to_owned(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{CanonicalContent, CanonicalMessage, CanonicalRequest, CanonicalRole};

    fn mapping() -> ProviderMapping {
        ProviderMapping {
            provider_id: "openai".to_owned(),
            upstream_model_name: "gpt-4o".to_owned(),
            input_price_per_token: 0.000002,
            output_price_per_token: 0.00001,
            cached_input_price_per_token: None,
            request_price: 0.0,
            discount: 1.0,
            context_size: 128_000,
            max_output_tokens: 4096,
            supports_streaming: true,
            supports_vision: true,
            supports_tools: true,
            supports_reasoning: false,
            supported_parameters: vec!["max_tokens", "temperature"],
        }
    }

    fn request() -> CanonicalRequest {
        CanonicalRequest {
            model: "gpt-4o".to_owned(),
            messages: vec![CanonicalMessage {
                role: CanonicalRole::User,
                content: Some(CanonicalContent::Text("Hi".to_owned())),
                tool_calls: None,
                tool_call_id: None,
            }],
            max_tokens: Some(64),
            temperature: Some(0.2),
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
            reasoning_effort: None,
            response_format: None,
        }
    }

    #[test]
    fn prepare_body_only_includes_supported_parameters() {
        let body = prepare_body(&request(), &mapping(), false);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["content"], "Hi");

        // `top_p`/`frequency_penalty`/`presence_penalty` weren't in the
        // mapping's supported parameters, so they're absent rather than null.
        assert!(body.get("top_p").is_none());
        assert!(body.get("frequency_penalty").is_none());
    }

    #[test]
    fn streaming_request_asks_for_usage_in_the_final_chunk() {
        let body = prepare_body(&request(), &mapping(), true);

        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn extract_raw_reasoning_prefers_reasoning_content_when_present() {
        let event = json!({"choices": [{"delta": {"reasoning_content": "thinking", "reasoning": "legacy"}}]});
        assert_eq!(extract_raw_reasoning(&event), None);

        let event = json!({"choices": [{"delta": {"reasoning": "legacy"}}]});
        assert_eq!(extract_raw_reasoning(&event), Some("legacy".to_owned()));
    }
}
