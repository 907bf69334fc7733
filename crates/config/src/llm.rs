//! Per-provider overrides layered on top of the built-in model/provider registry.
//!
//! Everything here is optional: an empty `[llm]` table still produces a working
//! gateway, provided the organization/platform credential store can supply a key
//! for at least one provider at dispatch time.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::Deserialize;

/// Top-level LLM section of the gateway configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Per-provider overrides, keyed by provider id (e.g. `"openai"`, `"anthropic"`).
    pub providers: BTreeMap<String, ProviderOverride>,
    /// Routes OpenAI-shaped reasoning requests to `/responses` instead of
    /// `/chat/completions` when the resolved model supports it.
    pub use_responses_api: bool,
    /// Disables the https-only restriction on remote image fetches. Set by
    /// the `is_prod` flag at load time, never directly by the caller.
    #[serde(skip)]
    pub is_prod: bool,
}

/// Overrides for a single provider. All fields are optional so a provider can
/// be used purely from its built-in registry defaults and an environment
/// variable holding the platform-owned fallback key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderOverride {
    /// Platform-owned credential used in "credits mode" when an organization
    /// has no key of its own for this provider. Typically sourced from an
    /// environment variable via `{{ env.OPENAI_API_KEY }}` interpolation.
    pub api_key: Option<SecretString>,
    /// Overrides the registry's default base URL for this provider.
    pub base_url: Option<String>,
}
