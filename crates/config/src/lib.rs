//! Typed configuration for the gateway binary.
//!
//! A file is entirely optional: every field has a default, so an empty TOML
//! document (or no file at all, with environment variables only) still
//! produces a runnable configuration. String values support `{{ env.VAR }}`
//! interpolation, expanded once at load time.

#![deny(missing_docs)]

mod database;
pub mod error;
mod llm;
mod loader;
mod logging;
mod server;

use std::path::Path;

pub use database::DatabaseConfig;
pub use llm::{LlmConfig, ProviderOverride};
pub use logging::LoggingConfig;
use serde::Deserialize;
pub use server::ServerConfig;

/// Root configuration structure for the gateway binary.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP listen address.
    pub server: ServerConfig,
    /// Persistence settings for the log/lock tables.
    pub database: DatabaseConfig,
    /// Per-provider overrides layered on the built-in registry.
    pub llm: LlmConfig,
    /// Structured logging settings.
    pub logging: LoggingConfig,
}

impl Config {
    /// Loads configuration from a TOML file, expanding environment variable
    /// placeholders and validating the result.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Returns the default configuration, as used when no `--config` flag is given.
    pub fn defaults() -> Config {
        let mut config = Config::default();
        config.llm.is_prod = is_prod_from_env();
        config
    }
}

/// `is_prod` isn't a TOML field (it's `#[serde(skip)]`'d on [`LlmConfig`]) so
/// both load paths set it from the environment directly, the way the
/// upstream gateway reads `NODE_ENV`.
pub(crate) fn is_prod_from_env() -> bool {
    std::env::var("NODE_ENV").is_ok_and(|v| v == "production")
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: 127.0.0.1:3000,
            },
            database: DatabaseConfig {
                url: None,
            },
            llm: LlmConfig {
                providers: {},
                use_responses_api: false,
                is_prod: false,
            },
            logging: LoggingConfig {
                filter: "info",
            },
        }
        "#);
    }

    #[test]
    fn provider_override_round_trips() {
        let toml = r#"
            [llm.providers.openai]
            base_url = "https://proxy.internal/openai"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let openai = config.llm.providers.get("openai").unwrap();

        assert_eq!(openai.base_url.as_deref(), Some("https://proxy.internal/openai"));
        assert!(openai.api_key.is_none());
    }
}
