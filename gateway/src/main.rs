use std::collections::BTreeMap;
use std::sync::Arc;

use args::Args;
use clap::Parser;
use llm::{Dispatcher, Registry};
use secrecy::SecretString;
use store::Store;
use worker::FinalizationWorker;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::defaults(),
    };

    telemetry::init(args.log_filter.as_deref().unwrap_or(&config.logging.filter));

    log::info!("starting on {}", config.server.listen_address);

    let registry = Registry::with_builtin_catalog(&config.llm);
    let http_client = reqwest::Client::builder().build()?;

    let store = match &config.database.url {
        Some(url) => Store::connect(url).await?,
        None => {
            log::warn!("no database configured; log records will be dropped and no finalization worker will run");
            Store::connect_lazy("postgres://unconfigured/unconfigured")?
        }
    };

    let platform_keys: BTreeMap<String, SecretString> = config
        .llm
        .providers
        .iter()
        .filter_map(|(id, overrides)| overrides.api_key.as_ref().map(|key| (id.clone(), key.clone())))
        .collect();

    let dispatcher = Arc::new(
        Dispatcher::new(registry.clone(), http_client, store.clone())
            .with_platform_keys(platform_keys)
            .with_llm_config(&config.llm),
    );

    if config.database.url.is_some() {
        let worker = FinalizationWorker::new(store, registry);
        tokio::spawn(worker.run());
    }

    let listener = tokio::net::TcpListener::bind(config.server.listen_address).await?;
    let router = llm::router(dispatcher);

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        log::warn!("failed to install Ctrl+C handler, shutting down without waiting for it");
    }

    log::info!("shutdown signal received");
}
