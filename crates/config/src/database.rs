//! Persistence configuration.

use serde::Deserialize;

/// Database configuration settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Postgres connection string. Required once the finalization worker is
    /// started; a dispatch-only build can omit it.
    pub url: Option<String>,
}
