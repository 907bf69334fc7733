//! Builds the provider-specific endpoint, headers, and body for one dispatch
//! attempt, normalizing multimodal content along the way.

use http::{HeaderMap, HeaderValue, header};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::canonical::CanonicalRequest;
use crate::error::LlmError;
use crate::image;
use crate::provider::ProviderKind;
use crate::registry::{AuthHeaderShape, ProviderDescriptor, ProviderMapping};

pub struct PreparedRequest {
    pub endpoint: String,
    pub headers: HeaderMap,
    pub body: Value,
}

pub async fn prepare(
    http_client: &reqwest::Client,
    provider: &ProviderDescriptor,
    mapping: &ProviderMapping,
    request: &CanonicalRequest,
    api_key: &SecretString,
    stream: bool,
    is_prod: bool,
    use_responses_api: bool,
) -> Result<PreparedRequest, LlmError> {
    let kind = ProviderKind::for_provider_id(&provider.id);
    let mut request = request.clone();

    normalize_images(http_client, &mut request, is_prod).await?;

    let body = kind.prepare_body(&request, mapping, stream);
    let has_existing_tool_calls = request.messages.iter().any(|m| m.tool_calls.is_some());
    let endpoint = registry_endpoint(provider, mapping, api_key, stream, use_responses_api, has_existing_tool_calls);
    let headers = provider_headers(provider, api_key);

    Ok(PreparedRequest { endpoint, headers, body })
}

fn registry_endpoint(
    provider: &ProviderDescriptor,
    mapping: &ProviderMapping,
    api_key: &SecretString,
    stream: bool,
    use_responses_api: bool,
    has_existing_tool_calls: bool,
) -> String {
    match provider.auth_header_shape {
        AuthHeaderShape::UrlEmbeddedKey if stream => {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                provider.base_url,
                mapping.upstream_model_name,
                api_key.expose_secret()
            )
        }
        AuthHeaderShape::UrlEmbeddedKey => {
            format!(
                "{}/models/{}:generateContent?key={}",
                provider.base_url,
                mapping.upstream_model_name,
                api_key.expose_secret()
            )
        }
        AuthHeaderShape::ApiKeyHeader => format!("{}/messages", provider.base_url),
        _ if use_responses_api && mapping.supports_reasoning && !has_existing_tool_calls => {
            format!("{}/responses", provider.base_url)
        }
        _ => format!("{}/chat/completions", provider.base_url),
    }
}

fn provider_headers(provider: &ProviderDescriptor, api_key: &SecretString) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    match provider.auth_header_shape {
        AuthHeaderShape::BearerAuthorization => {
            let value = format!("Bearer {}", api_key.expose_secret());
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::AUTHORIZATION, value);
            }
        }
        AuthHeaderShape::ApiKeyHeader => {
            if let Ok(value) = HeaderValue::from_str(api_key.expose_secret()) {
                headers.insert("x-api-key", value);
            }
            headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
            headers.insert(
                "anthropic-beta",
                HeaderValue::from_static("tools-2024-04-04,prompt-caching-2024-07-31"),
            );
        }
        AuthHeaderShape::UrlEmbeddedKey | AuthHeaderShape::None => {}
    }

    headers
}

/// Replaces any `image_url` content part holding a remote or data URL with
/// the fetched/base64-normalized form, surfacing `ImageFetchError` (with the
/// URL never included in the message) on failure.
async fn normalize_images(http_client: &reqwest::Client, request: &mut CanonicalRequest, is_prod: bool) -> Result<(), LlmError> {
    for message in &mut request.messages {
        let Some(crate::canonical::CanonicalContent::Parts(parts)) = &mut message.content else { continue };

        for part in parts.iter_mut() {
            if let crate::canonical::CanonicalContentPart::ImageUrl { image_url } = part {
                let resolved = image::resolve_image(http_client, &image_url.url, is_prod).await?;
                image_url.url = format!("data:{};base64,{}", resolved.mime_type, resolved.data);
            }
        }
    }

    Ok(())
}
