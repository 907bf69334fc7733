//! The model/provider registry: a static, in-memory catalog plus the lookup
//! helpers the dispatcher needs to resolve endpoints, headers, and the
//! cheapest viable model or provider for a request.

use std::collections::BTreeMap;

use config::LlmConfig;

use crate::error::LlmError;

/// How a provider expects its credential to be carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthHeaderShape {
    BearerAuthorization,
    ApiKeyHeader,
    UrlEmbeddedKey,
    None,
}

#[derive(Debug, Clone)]
pub struct ProviderDescriptor {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub auth_header_shape: AuthHeaderShape,
    pub supports_streaming: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderMapping {
    pub provider_id: String,
    pub upstream_model_name: String,
    pub input_price_per_token: f64,
    pub output_price_per_token: f64,
    pub cached_input_price_per_token: Option<f64>,
    pub request_price: f64,
    pub discount: f64,
    pub context_size: u32,
    pub max_output_tokens: u32,
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub supports_tools: bool,
    pub supports_reasoning: bool,
    pub supported_parameters: Vec<&'static str>,
}

impl ProviderMapping {
    /// `((input + output) / 2) * discount`, the formula `getCheapestModelForProvider`
    /// and `getCheapestFromAvailableProviders` both minimize over.
    pub fn average_price(&self) -> f64 {
        ((self.input_price_per_token + self.output_price_per_token) / 2.0) * self.discount
    }

    pub fn supports_parameter(&self, name: &str) -> bool {
        self.supported_parameters.contains(&name)
    }
}

#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub deprecated_at: Option<i64>,
    pub deactivated_at: Option<i64>,
    pub mappings: Vec<ProviderMapping>,
}

impl ModelDescriptor {
    pub fn is_deactivated(&self, now: i64) -> bool {
        self.deactivated_at.is_some_and(|t| now >= t)
    }

    pub fn is_deprecated(&self, now: i64) -> bool {
        self.deprecated_at.is_some_and(|t| now >= t)
    }
}

/// The in-memory provider/model catalog, overlaid with per-provider
/// configuration overrides (base URL, platform fallback key).
#[derive(Clone)]
pub struct Registry {
    providers: BTreeMap<String, ProviderDescriptor>,
    models: BTreeMap<String, ModelDescriptor>,
}

impl Registry {
    /// Builds the registry from the built-in catalog, applying any base-URL
    /// overrides from configuration.
    pub fn with_builtin_catalog(config: &LlmConfig) -> Self {
        let mut providers = builtin_providers();

        for (id, overrides) in &config.providers {
            if let Some(provider) = providers.get_mut(id)
                && let Some(base_url) = &overrides.base_url
            {
                provider.base_url = base_url.clone();
            }
        }

        Self {
            providers,
            models: builtin_models(),
        }
    }

    pub fn get_model(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.get(id)
    }

    pub fn get_provider(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(id)
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    /// Resolves a model selector that is `"provider/model"` or a bare model
    /// id. `"auto"` is resolved by the dispatcher's own cheapest-across-
    /// providers search, which filters on capability and credentials this
    /// lookup has no access to, and never reaches here.
    pub fn resolve_selector<'a>(
        &'a self,
        selector: &str,
    ) -> Result<(&'a ModelDescriptor, Option<&'a str>), LlmError> {
        if let Some((provider, model_id)) = selector.split_once('/')
            && self.providers.contains_key(provider)
        {
            let model = self
                .models
                .get(model_id)
                .ok_or_else(|| LlmError::ModelNotFound(selector.to_owned()))?;
            return Ok((model, Some(provider)));
        }

        let model = self
            .models
            .get(selector)
            .ok_or_else(|| LlmError::ModelNotFound(selector.to_owned()))?;

        Ok((model, None))
    }

    pub fn cheapest_model_for_provider(&self, provider_id: &str, now: i64) -> Option<&ProviderMapping> {
        self.models
            .values()
            .filter(|m| !m.is_deprecated(now))
            .flat_map(|m| &m.mappings)
            .filter(|m| m.provider_id == provider_id)
            .min_by(|a, b| a.average_price().partial_cmp(&b.average_price()).unwrap())
    }

    /// Among the given available provider ids for a model, picks the mapping
    /// minimizing `average_price()`, ties broken by encounter order.
    pub fn cheapest_from_available<'a>(
        &self,
        model: &'a ModelDescriptor,
        available: &[String],
    ) -> Option<&'a ProviderMapping> {
        model
            .mappings
            .iter()
            .filter(|m| available.contains(&m.provider_id))
            .min_by(|a, b| a.average_price().partial_cmp(&b.average_price()).unwrap())
    }
}

fn builtin_providers() -> BTreeMap<String, ProviderDescriptor> {
    let openai_shaped = [
        ("openai", "OpenAI", "https://api.openai.com/v1"),
        ("deepseek", "DeepSeek", "https://api.deepseek.com/v1"),
        ("groq", "Groq", "https://api.groq.com/openai/v1"),
        ("xai", "xAI", "https://api.x.ai/v1"),
        ("together.ai", "Together AI", "https://api.together.xyz/v1"),
        ("novita", "Novita", "https://api.novita.ai/v3/openai"),
        ("moonshot", "Moonshot", "https://api.moonshot.cn/v1"),
        ("inference.net", "Inference.net", "https://api.inference.net/v1"),
        ("kluster.ai", "Kluster", "https://api.kluster.ai/v1"),
        ("cloudrift", "CloudRift", "https://inference.cloudrift.ai/v1"),
        ("perplexity", "Perplexity", "https://api.perplexity.ai"),
        ("mistral", "Mistral", "https://api.mistral.ai/v1"),
        ("alibaba", "Alibaba", "https://dashscope.aliyuncs.com/compatible-mode/v1"),
        ("nebius", "Nebius", "https://api.studio.nebius.ai/v1"),
        ("zai", "Z.ai", "https://api.z.ai/api/paas/v4"),
    ];

    let mut providers = BTreeMap::new();

    for (id, name, base_url) in openai_shaped {
        providers.insert(
            id.to_owned(),
            ProviderDescriptor {
                id: id.to_owned(),
                display_name: name.to_owned(),
                base_url: base_url.to_owned(),
                auth_header_shape: AuthHeaderShape::BearerAuthorization,
                supports_streaming: true,
            },
        );
    }

    providers.insert(
        "anthropic".to_owned(),
        ProviderDescriptor {
            id: "anthropic".to_owned(),
            display_name: "Anthropic".to_owned(),
            base_url: "https://api.anthropic.com/v1".to_owned(),
            auth_header_shape: AuthHeaderShape::ApiKeyHeader,
            supports_streaming: true,
        },
    );

    providers.insert(
        "google".to_owned(),
        ProviderDescriptor {
            id: "google".to_owned(),
            display_name: "Google AI Studio".to_owned(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_owned(),
            auth_header_shape: AuthHeaderShape::UrlEmbeddedKey,
            supports_streaming: true,
        },
    );

    providers
}

fn builtin_models() -> BTreeMap<String, ModelDescriptor> {
    let mut models = BTreeMap::new();

    models.insert(
        "gpt-4o".to_owned(),
        ModelDescriptor {
            id: "gpt-4o".to_owned(),
            display_name: "GPT-4o".to_owned(),
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "openai".to_owned(),
                upstream_model_name: "gpt-4o".to_owned(),
                input_price_per_token: 0.0000025,
                output_price_per_token: 0.00001,
                cached_input_price_per_token: Some(0.00000125),
                request_price: 0.0,
                discount: 1.0,
                context_size: 128_000,
                max_output_tokens: 16_384,
                supports_streaming: true,
                supports_vision: true,
                supports_tools: true,
                supports_reasoning: false,
                supported_parameters: vec![
                    "max_tokens",
                    "temperature",
                    "top_p",
                    "frequency_penalty",
                    "presence_penalty",
                    "response_format",
                    "tools",
                    "tool_choice",
                ],
            }],
        },
    );

    models.insert(
        "claude-sonnet-4".to_owned(),
        ModelDescriptor {
            id: "claude-sonnet-4".to_owned(),
            display_name: "Claude Sonnet 4".to_owned(),
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "anthropic".to_owned(),
                upstream_model_name: "claude-sonnet-4-20250514".to_owned(),
                input_price_per_token: 0.000003,
                output_price_per_token: 0.000015,
                cached_input_price_per_token: Some(0.0000003),
                request_price: 0.0,
                discount: 1.0,
                context_size: 200_000,
                max_output_tokens: 64_000,
                supports_streaming: true,
                supports_vision: true,
                supports_tools: true,
                supports_reasoning: true,
                supported_parameters: vec!["max_tokens", "temperature", "top_p", "tools", "tool_choice"],
            }],
        },
    );

    models.insert(
        "gemini-2.0-flash".to_owned(),
        ModelDescriptor {
            id: "gemini-2.0-flash".to_owned(),
            display_name: "Gemini 2.0 Flash".to_owned(),
            deprecated_at: None,
            deactivated_at: None,
            mappings: vec![ProviderMapping {
                provider_id: "google".to_owned(),
                upstream_model_name: "gemini-2.0-flash".to_owned(),
                input_price_per_token: 0.0000001,
                output_price_per_token: 0.0000004,
                cached_input_price_per_token: None,
                request_price: 0.0,
                discount: 1.0,
                context_size: 1_000_000,
                max_output_tokens: 8_192,
                supports_streaming: true,
                supports_vision: true,
                supports_tools: true,
                supports_reasoning: true,
                supported_parameters: vec!["max_tokens", "temperature", "top_p", "tools"],
            }],
        },
    );

    models
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        Registry::with_builtin_catalog(&LlmConfig::default())
    }

    #[test]
    fn resolves_legacy_provider_prefix() {
        let registry = test_registry();
        let (model, provider) = registry.resolve_selector("openai/gpt-4o").unwrap();
        assert_eq!(model.id, "gpt-4o");
        assert_eq!(provider, Some("openai"));
    }

    #[test]
    fn resolves_bare_model_id() {
        let registry = test_registry();
        let (model, provider) = registry.resolve_selector("claude-sonnet-4").unwrap();
        assert_eq!(model.id, "claude-sonnet-4");
        assert_eq!(provider, None);
    }

    #[test]
    fn unknown_model_is_an_error() {
        let registry = test_registry();
        assert!(registry.resolve_selector("does-not-exist").is_err());
    }

    #[test]
    fn cheapest_model_for_provider_minimizes_average_price() {
        let registry = test_registry();
        let cheapest = registry.cheapest_model_for_provider("openai", 0).unwrap();
        assert_eq!(cheapest.upstream_model_name, "gpt-4o");
    }
}
