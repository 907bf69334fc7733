use axum::http::HeaderMap;
use context::OrganizationContext;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::LlmError;

const REQUEST_ID_HEADER: &str = "x-request-id";
const SOURCE_HEADER: &str = "x-source";
const REFERER_HEADER: &str = "referer";
const HTTP_REFERER_HEADER: &str = "http-referer";
const MODEL_OVERRIDE_HEADER: &str = "x-llmgateway-model";

static SOURCE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9./-]+$").expect("valid regex"));

/// Per-request context threaded through the dispatch pipeline.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: Option<String>,
    pub source: Option<String>,
    pub model_override: Option<String>,
    pub organization: OrganizationContext,
}

/// Parses the headers this crate cares about. HTTP authentication of the
/// caller itself happens upstream of this core and is out of scope here;
/// the organization context defaults to an anonymous, credits-mode-disabled
/// identity unless an external layer has attached one via `Extension`.
pub(crate) fn extract_context(headers: &HeaderMap) -> Result<RequestContext, LlmError> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let raw_source = headers
        .get(SOURCE_HEADER)
        .or_else(|| headers.get(HTTP_REFERER_HEADER))
        .or_else(|| headers.get(REFERER_HEADER))
        .and_then(|v| v.to_str().ok());

    let source = match raw_source {
        Some(raw) => Some(normalize_source(raw)?),
        None => None,
    };

    let model_override = headers
        .get(MODEL_OVERRIDE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    Ok(RequestContext {
        request_id,
        source,
        model_override,
        organization: OrganizationContext::default(),
    })
}

fn normalize_source(raw: &str) -> Result<String, LlmError> {
    let stripped = raw
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.");

    if !SOURCE_PATTERN.is_match(stripped) {
        return Err(LlmError::InvalidRequest(format!("invalid x-source header: {raw}")));
    }

    Ok(stripped.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_www_and_scheme() {
        assert_eq!(normalize_source("www.EXAMPLE.com/path").unwrap(), "EXAMPLE.com/path");
        assert_eq!(normalize_source("https://example.com").unwrap(), "example.com");
    }

    #[test]
    fn rejects_invalid_source() {
        assert!(normalize_source("foo bar").is_err());
    }
}
