//! Orchestrates one dispatch end to end: model/provider resolution,
//! credential lookup, request preparation, upstream invocation, and
//! response/stream normalization.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use secrecy::SecretString;

use crate::canonical::{CanonicalContent, CanonicalContentPart, CanonicalChunk, CanonicalRequest, CanonicalResponse, CanonicalUsage};
use crate::error::LlmError;
use crate::provider::ProviderKind;
use crate::registry::{ModelDescriptor, ProviderDescriptor, ProviderMapping, Registry};
use crate::request::RequestContext;
use crate::request_preparer;
use crate::stream_transformer::{self, Accumulator};
use crate::usage_cost;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

pub type CanonicalStream = Pin<Box<dyn Stream<Item = Result<CanonicalChunk, LlmError>> + Send>>;

pub enum DispatchOutcome {
    Response(CanonicalResponse),
    Stream(CanonicalStream),
}

/// Looks up an organization-owned provider key. Organization/project/
/// credential management lives in an external store; this crate only needs
/// an injection point for it.
pub trait CredentialResolver: Send + Sync {
    fn organization_key(&self, organization_id: &str, provider_id: &str) -> Option<SecretString>;
}

struct NoOrganizationCredentials;

impl CredentialResolver for NoOrganizationCredentials {
    fn organization_key(&self, _organization_id: &str, _provider_id: &str) -> Option<SecretString> {
        None
    }
}

pub struct Dispatcher {
    registry: Registry,
    http_client: reqwest::Client,
    store: store::Store,
    credentials: Arc<dyn CredentialResolver>,
    platform_keys: BTreeMap<String, SecretString>,
    is_prod: bool,
    use_responses_api: bool,
}

impl Dispatcher {
    pub fn new(registry: Registry, http_client: reqwest::Client, store: store::Store) -> Self {
        Self {
            registry,
            http_client,
            store,
            credentials: Arc::new(NoOrganizationCredentials),
            platform_keys: BTreeMap::new(),
            is_prod: false,
            use_responses_api: false,
        }
    }

    pub fn with_credential_resolver(mut self, resolver: Arc<dyn CredentialResolver>) -> Self {
        self.credentials = resolver;
        self
    }

    /// The platform-owned fallback keys read from config, used in "credits
    /// mode" for organizations without a key of their own.
    pub fn with_platform_keys(mut self, keys: BTreeMap<String, SecretString>) -> Self {
        self.platform_keys = keys;
        self
    }

    /// Mirrors `config.llm.is_prod` / `config.llm.use_responses_api`: gates
    /// the image fetcher's https-only rule and the OpenAI-family
    /// `/responses` endpoint switch, respectively.
    pub fn with_llm_config(mut self, config: &config::LlmConfig) -> Self {
        self.is_prod = config.is_prod;
        self.use_responses_api = config.use_responses_api;
        self
    }

    pub async fn dispatch(&self, request: CanonicalRequest, ctx: RequestContext) -> Result<DispatchOutcome, LlmError> {
        let stream = request.stream.unwrap_or(false);
        let request_id = ctx.request_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = jiff::Timestamp::now().as_second();

        let selector = ctx.model_override.as_deref().unwrap_or(&request.model);
        let candidates = self.resolve_candidates(selector, &request, &ctx, now)?;

        let mut last_error = None;

        for (model, mapping) in candidates {
            let Some(api_key) = self.resolve_credential(&ctx, &mapping.provider_id) else {
                last_error = Some(LlmError::NoCredential(mapping.provider_id.clone()));
                continue;
            };

            let provider = self.registry.get_provider(&mapping.provider_id).ok_or_else(|| {
                LlmError::InternalError(Some(format!("mapping references unregistered provider {}", mapping.provider_id)))
            })?;

            match self.attempt(provider, mapping, &request, &api_key, stream, &request_id, now, &model.id).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if is_retriable(&err) => {
                    log::warn!("attempt against {} failed, trying next mapping: {err}", provider.id);
                    last_error = Some(err);
                    continue;
                }
                Err(err) => {
                    self.log_failure(&request_id, &request.model, Some(&provider.id), Some(&model.id), stream, now, &err).await;
                    return Err(err);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| LlmError::ModelNotFound(request.model.clone()));
        self.log_failure(&request_id, &request.model, None, None, stream, now, &err).await;
        Err(err)
    }

    /// Resolution per the algorithm's steps 1-2: picks the model (or, for
    /// `"auto"`, the cheapest model across providers) and orders its capable,
    /// credentialed provider mappings cheapest-first as a fallback chain.
    fn resolve_candidates<'a>(
        &'a self,
        selector: &str,
        request: &CanonicalRequest,
        ctx: &RequestContext,
        now: i64,
    ) -> Result<Vec<(&'a ModelDescriptor, &'a ProviderMapping)>, LlmError> {
        if selector == "auto" {
            let mut candidates: Vec<(&ModelDescriptor, &ProviderMapping)> = self
                .registry
                .models()
                .filter(|model| !model.is_deactivated(now) && !model.is_deprecated(now))
                .filter_map(|model| {
                    model
                        .mappings
                        .iter()
                        .filter(|mapping| meets_capabilities(request, mapping) && self.has_credential(ctx, &mapping.provider_id))
                        .min_by(|a, b| a.average_price().partial_cmp(&b.average_price()).unwrap())
                        .map(|mapping| (model, mapping))
                })
                .collect();

            candidates.sort_by(|(_, a), (_, b)| a.average_price().partial_cmp(&b.average_price()).unwrap());

            if candidates.is_empty() {
                return Err(LlmError::NoCredential("auto".to_owned()));
            }

            return Ok(candidates);
        }

        let (model, provider_constraint) = self.registry.resolve_selector(selector)?;

        if model.is_deactivated(now) {
            return Err(LlmError::ModelDeactivated(model.id.clone()));
        }

        let capable: Vec<&ProviderMapping> = model
            .mappings
            .iter()
            .filter(|mapping| provider_constraint.is_none_or(|p| mapping.provider_id == p) && meets_capabilities(request, mapping))
            .collect();

        let Some(first_capable) = capable.first() else {
            return Err(LlmError::InvalidRequest(format!(
                "no provider mapping for {selector} meets the request's requirements"
            )));
        };

        let mut candidates: Vec<(&ModelDescriptor, &ProviderMapping)> = capable
            .iter()
            .filter(|mapping| self.has_credential(ctx, &mapping.provider_id))
            .map(|mapping| (model, *mapping))
            .collect();

        if candidates.is_empty() {
            return Err(LlmError::NoCredential(first_capable.provider_id.clone()));
        }

        candidates.sort_by(|(_, a), (_, b)| a.average_price().partial_cmp(&b.average_price()).unwrap());

        Ok(candidates)
    }

    fn has_credential(&self, ctx: &RequestContext, provider_id: &str) -> bool {
        self.credentials.organization_key(&ctx.organization.organization_id, provider_id).is_some()
            || (ctx.organization.allow_credits_mode && self.platform_keys.contains_key(provider_id))
    }

    fn resolve_credential(&self, ctx: &RequestContext, provider_id: &str) -> Option<SecretString> {
        self.credentials
            .organization_key(&ctx.organization.organization_id, provider_id)
            .or_else(|| ctx.organization.allow_credits_mode.then(|| self.platform_keys.get(provider_id).cloned()).flatten())
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        provider: &ProviderDescriptor,
        mapping: &ProviderMapping,
        request: &CanonicalRequest,
        api_key: &SecretString,
        stream: bool,
        request_id: &str,
        now: i64,
        served_model: &str,
    ) -> Result<DispatchOutcome, LlmError> {
        let prepared = request_preparer::prepare(
            &self.http_client,
            provider,
            mapping,
            request,
            api_key,
            stream,
            self.is_prod,
            self.use_responses_api,
        )
        .await?;

        let send = self.http_client.post(&prepared.endpoint).headers(prepared.headers).json(&prepared.body).send();

        let response = tokio::time::timeout(DEFAULT_TIMEOUT, send)
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|err| LlmError::ConnectionError(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_provider_status(status, &body));
        }

        if stream {
            let canonical_stream = self.stream_response(
                response,
                provider.id.clone(),
                request_id.to_owned(),
                now,
                served_model.to_owned(),
                request.model.clone(),
                usage_cost::prompt_char_count(&request.messages),
            );
            return Ok(DispatchOutcome::Stream(canonical_stream));
        }

        let body: serde_json::Value = response.json().await.map_err(|err| LlmError::InternalError(Some(err.to_string())))?;

        let kind = ProviderKind::for_provider_id(&provider.id);
        let mut canonical = kind.parse_response(&body, served_model, now)?;

        if canonical.usage.prompt_tokens == 0 {
            canonical.usage.prompt_tokens = usage_cost::estimate_prompt_tokens(&request.messages);
            canonical.usage.total_tokens = canonical.usage.prompt_tokens + canonical.usage.completion_tokens;
        }

        canonical.id = request_id.to_owned();
        canonical.created = now as u64;

        let finish_reason = canonical.choices.first().and_then(|choice| choice.finish_reason.clone());
        let prompt_chars = usage_cost::prompt_char_count(&request.messages);
        let completion_chars = canonical
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .map(|content| content.as_text().chars().count() as u32);
        self.log_success(
            request_id,
            &request.model,
            &provider.id,
            served_model,
            false,
            canonical.usage,
            finish_reason,
            now,
            prompt_chars,
            completion_chars,
        )
        .await;

        Ok(DispatchOutcome::Response(canonical))
    }

    /// Frames the upstream body as SSE (every provider's streaming endpoint
    /// here emits `data:`-prefixed events, Google's because it's invoked with
    /// `alt=sse`), feeds each event through the Stream Transformer, and
    /// writes the LogRecord once the stream ends.
    #[allow(clippy::too_many_arguments)]
    fn stream_response(
        &self,
        response: reqwest::Response,
        provider_id: String,
        request_id: String,
        created: i64,
        served_model: String,
        canonical_model: String,
        prompt_chars: u32,
    ) -> CanonicalStream {
        let kind = ProviderKind::for_provider_id(&provider_id);
        let store = self.store.clone();
        let events = response.bytes_stream().eventsource();

        let state = (events, Accumulator::new(), false);

        let stream = futures::stream::unfold(state, move |(mut events, mut accumulator, mut done)| {
            let store = store.clone();
            let provider_id = provider_id.clone();
            let request_id = request_id.clone();
            let served_model = served_model.clone();
            let canonical_model = canonical_model.clone();

            async move {
                loop {
                    if done {
                        return None;
                    }

                    match events.next().await {
                        Some(Ok(event)) if event.data == "[DONE]" => {
                            write_stream_log(
                                &store,
                                &request_id,
                                &canonical_model,
                                &provider_id,
                                &served_model,
                                &accumulator,
                                None,
                                created,
                                prompt_chars,
                            )
                            .await;
                            return None;
                        }
                        Some(Ok(event)) => {
                            let Ok(value) = serde_json::from_str::<serde_json::Value>(&event.data) else { continue };

                            let chunks =
                                stream_transformer::transform_event(kind, &value, &mut accumulator, &request_id, created as u64, &served_model);

                            if let Some(chunk) = chunks.into_iter().next() {
                                return Some((Ok(chunk), (events, accumulator, done)));
                            }
                        }
                        Some(Err(err)) => {
                            let llm_err = LlmError::ConnectionError(err.to_string());
                            write_stream_log(
                                &store,
                                &request_id,
                                &canonical_model,
                                &provider_id,
                                &served_model,
                                &accumulator,
                                Some(&llm_err),
                                created,
                                prompt_chars,
                            )
                            .await;
                            done = true;
                            return Some((Err(llm_err), (events, accumulator, done)));
                        }
                        None => {
                            write_stream_log(
                                &store,
                                &request_id,
                                &canonical_model,
                                &provider_id,
                                &served_model,
                                &accumulator,
                                None,
                                created,
                                prompt_chars,
                            )
                            .await;
                            return None;
                        }
                    }
                }
            }
        });

        Box::pin(stream)
    }

    #[allow(clippy::too_many_arguments)]
    async fn log_success(
        &self,
        request_id: &str,
        canonical_model: &str,
        provider_id: &str,
        served_model: &str,
        streamed: bool,
        usage: CanonicalUsage,
        finish_reason: Option<String>,
        created_at: i64,
        prompt_chars: u32,
        completion_chars: Option<u32>,
    ) {
        let record = store::LogRecord {
            request_id: request_id.to_owned(),
            canonical_model: canonical_model.to_owned(),
            used_provider: Some(provider_id.to_owned()),
            used_model: Some(served_model.to_owned()),
            streamed,
            prompt_tokens: Some(usage.prompt_tokens),
            completion_tokens: Some(usage.completion_tokens),
            reasoning_tokens: Some(usage.reasoning_tokens),
            cached_tokens: Some(usage.cached_tokens),
            total_tokens: Some(usage.total_tokens),
            prompt_chars: Some(prompt_chars),
            completion_chars,
            input_cost: None,
            output_cost: None,
            cached_input_cost: None,
            cost: None,
            finish_reason,
            error_kind: None,
            created_at,
            finalized_at: None,
        };

        if let Err(err) = self.store.insert_log(&record).await {
            log::warn!("failed to write log record {request_id}: {err}");
        }
    }

    async fn log_failure(
        &self,
        request_id: &str,
        canonical_model: &str,
        provider_id: Option<&str>,
        served_model: Option<&str>,
        streamed: bool,
        created_at: i64,
        error: &LlmError,
    ) {
        let record = store::LogRecord {
            request_id: request_id.to_owned(),
            canonical_model: canonical_model.to_owned(),
            used_provider: provider_id.map(str::to_owned),
            used_model: served_model.map(str::to_owned),
            streamed,
            prompt_tokens: None,
            completion_tokens: None,
            reasoning_tokens: None,
            cached_tokens: None,
            total_tokens: None,
            prompt_chars: None,
            completion_chars: None,
            input_cost: None,
            output_cost: None,
            cached_input_cost: None,
            cost: None,
            finish_reason: None,
            error_kind: Some(error.kind().as_str().to_owned()),
            created_at,
            finalized_at: None,
        };

        if let Err(err) = self.store.insert_log(&record).await {
            log::warn!("failed to write log record {request_id}: {err}");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn write_stream_log(
    store: &store::Store,
    request_id: &str,
    canonical_model: &str,
    provider_id: &str,
    served_model: &str,
    accumulator: &Accumulator,
    error: Option<&LlmError>,
    created_at: i64,
    prompt_chars: u32,
) {
    let mut usage = accumulator.usage.unwrap_or_default();

    if usage.completion_tokens == 0 && !accumulator.full_content.is_empty() {
        usage.completion_tokens = usage_cost::estimate_completion_tokens(&accumulator.full_content);
        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens + usage.reasoning_tokens;
    }

    // A provider that never sent a usage payload (dropped connection, no
    // final usage chunk) leaves these at zero; store None so the
    // finalization worker knows to estimate from the char counts below
    // rather than finalizing at a real zero.
    let prompt_tokens = (usage.prompt_tokens > 0).then_some(usage.prompt_tokens);
    let completion_tokens = (usage.completion_tokens > 0 || accumulator.full_content.is_empty()).then_some(usage.completion_tokens);
    let total_tokens = prompt_tokens.zip(completion_tokens).map(|_| usage.total_tokens);
    let completion_chars = (!accumulator.full_content.is_empty()).then(|| accumulator.full_content.chars().count() as u32);

    let record = store::LogRecord {
        request_id: request_id.to_owned(),
        canonical_model: canonical_model.to_owned(),
        used_provider: Some(provider_id.to_owned()),
        used_model: Some(served_model.to_owned()),
        streamed: true,
        prompt_tokens,
        completion_tokens,
        reasoning_tokens: Some(usage.reasoning_tokens),
        cached_tokens: Some(usage.cached_tokens),
        total_tokens,
        prompt_chars: Some(prompt_chars),
        completion_chars,
        input_cost: None,
        output_cost: None,
        cached_input_cost: None,
        cost: None,
        finish_reason: accumulator.finish_reason.clone().or_else(|| error.map(|_| "client_error".to_owned())),
        error_kind: error.map(|err| err.kind().as_str().to_owned()),
        created_at,
        finalized_at: None,
    };

    if let Err(err) = store.insert_log(&record).await {
        log::warn!("failed to write log record {request_id}: {err}");
    }
}

/// Network errors and 5xx are retried against the next provider mapping; 4xx
/// is treated as a hard failure for the request as a whole.
fn is_retriable(error: &LlmError) -> bool {
    matches!(error, LlmError::ConnectionError(_) | LlmError::Timeout | LlmError::InternalError(_))
        || matches!(error, LlmError::ProviderApiError { status, .. } if *status >= 500)
}

fn meets_capabilities(request: &CanonicalRequest, mapping: &ProviderMapping) -> bool {
    let needs_tools = request.tools.is_some();
    let needs_reasoning = request.reasoning_effort.is_some();
    let needs_streaming = request.stream.unwrap_or(false);

    (!needs_tools || mapping.supports_tools)
        && (!needs_reasoning || mapping.supports_reasoning)
        && (!needs_streaming || mapping.supports_streaming)
        && (!requires_vision(request) || mapping.supports_vision)
}

fn requires_vision(request: &CanonicalRequest) -> bool {
    request.messages.iter().any(|message| {
        matches!(
            &message.content,
            Some(CanonicalContent::Parts(parts)) if parts.iter().any(|part| matches!(part, CanonicalContentPart::ImageUrl { .. }))
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{CanonicalMessage, CanonicalRole};
    use context::OrganizationContext;

    fn dispatcher_with_platform_keys(keys: &[&str]) -> Dispatcher {
        let registry = Registry::with_builtin_catalog(&config::LlmConfig::default());
        let http_client = reqwest::Client::new();
        let store = store::Store::connect_lazy("postgres://localhost/unused").unwrap();

        let platform_keys = keys.iter().map(|id| (id.to_string(), SecretString::from(format!("sk-{id}")))).collect();

        Dispatcher::new(registry, http_client, store).with_platform_keys(platform_keys)
    }

    fn sample_request() -> CanonicalRequest {
        CanonicalRequest {
            model: "auto".to_owned(),
            messages: vec![CanonicalMessage {
                role: CanonicalRole::User,
                content: Some(CanonicalContent::Text("Hi".to_owned())),
                tool_calls: None,
                tool_call_id: None,
            }],
            max_tokens: None,
            temperature: None,
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
    fn auto_selector_only_offers_credentialed_providers() {
        let dispatcher = dispatcher_with_platform_keys(&["google"]);
        let ctx = RequestContext { organization: OrganizationContext::new("org_1").with_credits_mode(true), ..Default::default() };

        let candidates = dispatcher.resolve_candidates("auto", &sample_request(), &ctx, 0).unwrap();

        assert!(candidates.iter().all(|(_, mapping)| mapping.provider_id == "google"));
    }

    #[test]
    fn explicit_selector_without_any_credential_fails_closed() {
        let dispatcher = dispatcher_with_platform_keys(&[]);
        let ctx = RequestContext { organization: OrganizationContext::new("org_1").with_credits_mode(true), ..Default::default() };

        let err = dispatcher.resolve_candidates("gpt-4o", &sample_request(), &ctx, 0).unwrap_err();

        assert!(matches!(err, LlmError::NoCredential(_)));
    }

    #[test]
    fn credits_mode_disabled_ignores_platform_keys() {
        let dispatcher = dispatcher_with_platform_keys(&["openai"]);
        let ctx = RequestContext { organization: OrganizationContext::new("org_1"), ..Default::default() };

        let err = dispatcher.resolve_candidates("gpt-4o", &sample_request(), &ctx, 0).unwrap_err();

        assert!(matches!(err, LlmError::NoCredential(_)));
    }
}
