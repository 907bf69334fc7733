use std::path::PathBuf;

use clap::Parser;

/// Command line arguments for the gateway binary.
#[derive(Debug, Parser)]
#[command(name = "llm-core-gateway", version)]
pub struct Args {
    /// Path to a TOML configuration file. Without one, the gateway runs with
    /// defaults and whatever environment variables the config fields read.
    #[arg(short, long, env = "LLM_CORE_GATEWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the `[logging] filter` config value, e.g. `"info"` or
    /// `"llm=debug,tower_http=debug"`.
    #[arg(long, env = "LOG_FILTER")]
    pub log_filter: Option<String>,
}
