use std::sync::Arc;

use anyhow::Context;

use crate::{
    config::SyncConfig,
    data_backend::{eth_parser::EthProvider, uzh_parser::UzhProvider, MenuProvider, ProviderContext},
    db_operations::MenuStore,
    sync_coordinator::SyncCoordinator,
};

pub fn logger_init(module_name: &str) {
    let level = if std::env::var(pretty_env_logger::env_logger::DEFAULT_FILTER_ENV).unwrap_or_default()
        == "debug"
    {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    pretty_env_logger::formatted_timed_builder()
        .filter_level(log::LevelFilter::Info)
        .filter_module(module_name, level)
        .filter_module("mensa_sync", level)
        .init();
}

/// Opens the store and wires both providers into a coordinator.
pub fn build_coordinator(config: &SyncConfig) -> anyhow::Result<Arc<SyncCoordinator>> {
    let store = MenuStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;

    let eth = EthProvider::new(
        ProviderContext::new(store.clone(), &config.http)?,
        config.eth.clone(),
    );
    let uzh = UzhProvider::new(
        ProviderContext::new(store.clone(), &config.http)?,
        config.uzh.clone(),
    );
    if config.uzh.api_key.is_none() {
        log::warn!("No UZH API key configured, UZH fetches will likely be rejected");
    }

    let providers: Vec<Arc<dyn MenuProvider>> = vec![Arc::new(eth), Arc::new(uzh)];
    Ok(Arc::new(SyncCoordinator::new(store, providers, config)))
}
