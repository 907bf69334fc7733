//! Probes a credential against its provider with one minimal request,
//! without ever routing the failure through the dispatch/log pipeline.

use secrecy::{ExposeSecret, SecretString};

use crate::canonical::{CanonicalContent, CanonicalMessage, CanonicalRequest, CanonicalRole};
use crate::provider::ProviderKind;
use crate::registry::{ProviderDescriptor, Registry};
use crate::request_preparer;

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValidation {
    pub valid: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl KeyValidation {
    fn valid() -> Self {
        Self { valid: true, status_code: None, error: None }
    }

    fn invalid(status_code: Option<u16>, error: Option<String>) -> Self {
        Self { valid: false, status_code, error }
    }
}

/// Validates `token` against `provider_id` by sending the cheapest model for
/// that provider a one-token completion request.
pub async fn validate_provider_key(
    http_client: &reqwest::Client,
    registry: &Registry,
    provider_id: &str,
    token: &str,
) -> KeyValidation {
    if provider_id == "custom" {
        return KeyValidation::valid();
    }

    let Some(provider): Option<&ProviderDescriptor> = registry.get_provider(provider_id) else {
        return KeyValidation::invalid(None, Some(format!("unknown provider: {provider_id}")));
    };

    let now = jiff::Timestamp::now().as_second();

    let Some(mapping) = registry.cheapest_model_for_provider(provider_id, now) else {
        return KeyValidation::invalid(None, Some(format!("no model registered for provider: {provider_id}")));
    };

    let probe = CanonicalRequest {
        model: mapping.upstream_model_name.clone(),
        messages: vec![
            CanonicalMessage {
                role: CanonicalRole::System,
                content: Some(CanonicalContent::Text("You are a helpful assistant.".to_owned())),
                tool_calls: None,
                tool_call_id: None,
            },
            CanonicalMessage {
                role: CanonicalRole::User,
                content: Some(CanonicalContent::Text("Hello".to_owned())),
                tool_calls: None,
                tool_call_id: None,
            },
        ],
        max_tokens: mapping.supports_parameter("max_tokens").then_some(1),
        temperature: None,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        stream: Some(false),
        tools: None,
        tool_choice: None,
        reasoning_effort: None,
        response_format: None,
    };

    let api_key = SecretString::from(token.to_owned());
    let prepared = match request_preparer::prepare(http_client, provider, mapping, &probe, &api_key, false, true, false).await {
        Ok(prepared) => prepared,
        Err(err) => return KeyValidation::invalid(None, Some(err.client_message())),
    };

    let response = http_client.post(&prepared.endpoint).headers(prepared.headers).json(&prepared.body).send().await;

    let response = match response {
        Ok(response) => response,
        Err(err) => return KeyValidation::invalid(None, Some(err.to_string())),
    };

    let status = response.status();

    if status.is_success() {
        return KeyValidation::valid();
    }

    if status.as_u16() == 401 {
        return KeyValidation::invalid(Some(401), None);
    }

    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<serde_json::Value>(&body).ok();
    let message = parsed
        .and_then(|value| ProviderKind::for_provider_id(provider_id).parse_response(&value, &mapping.upstream_model_name, now).err())
        .map(|e| e.client_message())
        .or_else(|| (!body.is_empty()).then(|| body.clone()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_owned());

    KeyValidation::invalid(Some(status.as_u16()), Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn custom_provider_short_circuits_to_valid() {
        let registry = Registry::with_builtin_catalog(&config::LlmConfig::default());
        let client = reqwest::Client::new();
        let result = validate_provider_key(&client, &registry, "custom", "anything").await;
        assert_eq!(result, KeyValidation::valid());
    }

    #[tokio::test]
    async fn unknown_provider_is_invalid_without_network_call() {
        let registry = Registry::with_builtin_catalog(&config::LlmConfig::default());
        let client = reqwest::Client::new();
        let result = validate_provider_key(&client, &registry, "does-not-exist", "sk-bad").await;
        assert!(!result.valid);
    }
}
