//! Command-line support for the consultation service.
//!
//! Re-exports the workspace crates and hosts the config loading and knowledge
//! import routines shared by the `cdss` subcommands.

/// Re-export for convenience.
pub use cdss_rs_config as config;
pub use cdss_rs_core as core;
/// Re-export for convenience.
pub use cdss_rs_knowledge as knowledge;
pub use cdss_rs_protocol as protocol;
pub use cdss_rs_server as server;

use anyhow::Context;
use cdss_rs_config::{CdssConfig, EmbeddingConfig, LayeredConfigOptions};
use cdss_rs_knowledge::{
    Embedder, HttpEmbedder, KnowledgeError, SqliteKnowledgeStore,
    import::{embed_records, parse_products, parse_rules},
};
use cdss_rs_protocol::RecordSource;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Initialize env_logger with millisecond timestamps and `RUST_LOG` filters.
pub fn init_logging() {
    let _ = env_logger::builder()
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}

/// Load the layered config for `cwd`, applying `overrides` last.
pub fn load_config(cwd: &Path, overrides: &[PathBuf]) -> anyhow::Result<CdssConfig> {
    let mut options = LayeredConfigOptions::new(cwd);
    for path in overrides {
        options = options.with_runtime_path(path);
    }
    let layered = CdssConfig::load_layered_with_options(options)
        .context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered.config)
}

/// Counts reported by a knowledge import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub products: usize,
    pub rules: usize,
    pub embedded: usize,
    /// Rows removed before the import when replacing.
    pub removed: usize,
}

/// Load the product and rule collections into the knowledge store.
///
/// With `replace`, both collections are cleared and reloaded in one transaction.
pub async fn import_knowledge(
    store: &SqliteKnowledgeStore,
    products_json: &str,
    rules_json: &str,
    embedder: Option<&dyn Embedder>,
    replace: bool,
) -> Result<ImportSummary, KnowledgeError> {
    let mut products = parse_products(products_json)?;
    let mut rules = parse_rules(rules_json)?;
    let mut summary = ImportSummary {
        products: products.len(),
        rules: rules.len(),
        ..ImportSummary::default()
    };
    if let Some(embedder) = embedder {
        summary.embedded += embed_records(&mut products, embedder).await;
        summary.embedded += embed_records(&mut rules, embedder).await;
    }
    let mut records = products;
    records.append(&mut rules);
    if replace {
        summary.removed =
            store.replace_sources(&[RecordSource::Product, RecordSource::Rule], &records)?;
    } else {
        store.upsert_records(&records)?;
    }
    info!(
        "knowledge import finished (products={}, rules={}, embedded={}, removed={})",
        summary.products, summary.rules, summary.embedded, summary.removed
    );
    Ok(summary)
}

/// Embedder described by the config, when enabled.
pub fn configured_embedder(config: &EmbeddingConfig) -> anyhow::Result<Option<HttpEmbedder>> {
    if !config.enabled {
        return Ok(None);
    }
    let api_key = config.api_key().context("embedding credential")?;
    let embedder = HttpEmbedder::new(
        &config.base_url,
        config.model.clone(),
        api_key,
        Duration::from_secs(config.timeout_secs),
    )
    .context("failed to build embedding client")?;
    Ok(Some(embedder))
}
