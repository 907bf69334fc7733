use std::{path::Path, str::FromStr};

use indoc::indoc;
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let mut config = Config::deserialize(raw_config)?;
    config.llm.is_prod = crate::is_prod_from_env();
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if config.llm.providers.is_empty() {
        log::warn!(
            "no provider overrides configured; the gateway will rely entirely on organization-owned credentials"
        );
    }

    if config.database.url.is_none() {
        log::warn!(indoc! {"
            no database url configured; the finalization worker cannot start.
            set `[database] url = \"...\"` or the DATABASE_URL environment variable
            if you need asynchronous cost accounting.
        "});
    }

    Ok(())
}

/// Recursively expands `{{ env.VAR }}`-style placeholders in every string leaf
/// of the parsed TOML document, the same way the upstream configuration
/// format lets API keys and URLs reference environment variables.
fn expand_dynamic_strings(path: &mut Vec<String>, value: &mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                return Err(crate::error::Error::EnvVarSubstitution {
                    path: path.join("."),
                    reason: err.to_string(),
                }
                .into());
            }
        },
        Value::Table(map) => {
            for (key, v) in map.iter_mut() {
                path.push(key.clone());
                expand_dynamic_strings(path, v)?;
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter_mut().enumerate() {
                path.push(i.to_string());
                expand_dynamic_strings(path, v)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
