//! Layered configuration loader.
//!
//! Discovers configuration layers (system/user/project/etc), validates schema,
//! merges them, and produces a final `CdssConfig`.

mod layer_io;
mod schema;

#[cfg(test)]
mod tests;

use crate::{CdssConfig, ConfigError, RetrievalConfig};
use log::{debug, info};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config filename in local layers.
const DEFAULT_CONFIG_FILE: &str = "cdss.json5";
/// Default config directory under user or repo roots.
const DEFAULT_CONFIG_DIR: &str = ".cdss";
/// Marker files/dirs that identify a project root.
const DEFAULT_PROJECT_ROOT_MARKERS: &[&str] = &[".git"];

#[cfg(unix)]
/// Default system config path on Unix.
const SYSTEM_CONFIG_PATH: &str = "/etc/cdss/cdss.json5";

/// Effective config plus metadata about which layers were loaded.
#[derive(Debug, Clone)]
pub struct LayeredConfig {
    /// The merged, validated config.
    pub config: CdssConfig,
    /// Metadata for each layer merged during load.
    pub layers: Vec<ConfigLayer>,
}

/// Origin for a single config layer in the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLayerSource {
    /// System-wide configuration.
    System,
    /// User-specific configuration.
    User,
    /// Project root configuration.
    Project,
    /// Current working directory configuration.
    Cwd,
    /// Repo-local configuration under `.cdss/`.
    Repo,
    /// Runtime overrides (highest precedence).
    Runtime,
}

/// Metadata about a merged config layer.
#[derive(Debug, Clone)]
pub struct ConfigLayer {
    /// Layer origin.
    pub source: ConfigLayerSource,
    /// Location on disk.
    pub path: Option<PathBuf>,
}

/// Schema validation mode for layered configs.
#[derive(Debug, Clone, Copy)]
enum SchemaMode {
    /// Partial validation for non-final layers.
    Partial,
    /// Full validation for the effective config.
    Full,
}

/// Options controlling layered config discovery and overrides.
#[derive(Debug, Clone)]
pub struct LayeredConfigOptions {
    /// Working directory used to resolve local layers.
    pub cwd: PathBuf,
    /// Optional system config path (defaults to `/etc/cdss/cdss.json5` on Unix).
    pub system_config_path: Option<PathBuf>,
    /// Optional user config path (defaults to `~/.cdss/cdss.json5`).
    pub user_config_path: Option<PathBuf>,
    /// Runtime override config paths applied last.
    pub runtime_paths: Vec<PathBuf>,
    /// Marker files/dirs used to detect the project root.
    pub project_root_markers: Vec<String>,
}

impl LayeredConfigOptions {
    /// Create options with default layer locations for the provided cwd.
    pub fn new(cwd: impl AsRef<Path>) -> Self {
        Self {
            cwd: cwd.as_ref().to_path_buf(),
            system_config_path: layer_io::default_system_config_path(),
            user_config_path: layer_io::default_user_config_path(),
            runtime_paths: Vec::new(),
            project_root_markers: DEFAULT_PROJECT_ROOT_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }

    /// Add a runtime override config path that is applied last.
    pub fn with_runtime_path(mut self, path: impl AsRef<Path>) -> Self {
        self.runtime_paths.push(path.as_ref().to_path_buf());
        self
    }
}

impl CdssConfig {
    /// Load a single config from a path (no layering).
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        info!("loading config from path: {}", path.as_ref().display());
        let contents = fs::read_to_string(path)?;
        let value: Value = json5::from_str(&contents)?;
        config_from_value(value, "config")
    }

    /// Load a single config from JSON5 contents (no layering).
    pub fn load_from_str(contents: &str) -> Result<Self, ConfigError> {
        debug!("loading config from raw contents (len={})", contents.len());
        let value: Value = json5::from_str(contents)?;
        config_from_value(value, "config")
    }

    /// Load a layered config stack using the default layer locations.
    pub fn load_layered(cwd: impl AsRef<Path>) -> Result<LayeredConfig, ConfigError> {
        info!(
            "loading layered config with defaults (cwd={})",
            cwd.as_ref().display()
        );
        Self::load_layered_with_options(LayeredConfigOptions::new(cwd))
    }

    /// Load a layered config stack using explicit layer locations and overrides.
    ///
    /// Layer precedence (low -> high): system, user, project, cwd, repo,
    /// runtime overrides.
    pub fn load_layered_with_options(
        options: LayeredConfigOptions,
    ) -> Result<LayeredConfig, ConfigError> {
        let cwd = layer_io::normalize_path(&options.cwd)?;
        debug!("normalized cwd for config load: {}", cwd.display());
        let mut layers = Vec::new();
        let mut merge_layers = Vec::new();
        let mut seen_paths = HashSet::new();

        for (source, path) in [
            (
                ConfigLayerSource::System,
                options.system_config_path.as_deref(),
            ),
            (ConfigLayerSource::User, options.user_config_path.as_deref()),
        ] {
            if let Some(layer) = layer_io::load_optional_layer(source, path)? {
                debug!("loaded {:?} layer", source);
                if let Some(path) = path {
                    seen_paths.insert(layer_io::unique_path(path));
                }
                layers.push(layer.meta.clone());
                merge_layers.push(layer);
            }
        }

        let project_root = layer_io::find_project_root(&cwd, &options.project_root_markers);
        let mut local_layers = Vec::new();
        if let Some(project_root) = project_root.as_ref() {
            debug!("resolved project root: {}", project_root.display());
            local_layers.push((
                ConfigLayerSource::Project,
                project_root.join(DEFAULT_CONFIG_FILE),
            ));
        } else {
            debug!("project root not found; skipping project/repo layers");
        }
        local_layers.push((ConfigLayerSource::Cwd, cwd.join(DEFAULT_CONFIG_FILE)));
        if let Some(project_root) = project_root.as_ref() {
            local_layers.push((
                ConfigLayerSource::Repo,
                project_root
                    .join(DEFAULT_CONFIG_DIR)
                    .join(DEFAULT_CONFIG_FILE),
            ));
        }

        for (source, path) in local_layers {
            if !path.exists() {
                debug!(
                    "skipping missing layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            if !seen_paths.insert(layer_io::unique_path(&path)) {
                debug!(
                    "skipping duplicate layer (source={:?}, path={})",
                    source,
                    path.display()
                );
                continue;
            }
            let loaded = layer_io::load_required_layer(source, &path)?;
            layers.push(loaded.meta.clone());
            merge_layers.push(loaded);
        }

        for runtime_path in &options.runtime_paths {
            let loaded = layer_io::load_required_layer(ConfigLayerSource::Runtime, runtime_path)?;
            debug!("loaded runtime layer (path={})", runtime_path.display());
            layers.push(loaded.meta.clone());
            merge_layers.push(loaded);
        }

        let mut merged = Value::Object(serde_json::Map::new());
        for layer in merge_layers {
            layer_io::merge_values(&mut merged, &layer.value);
        }

        let config = config_from_value(merged, "effective")?;
        info!("layered config loaded (layers={})", layers.len());
        Ok(LayeredConfig { config, layers })
    }

    /// Validate configuration invariants that cannot be expressed in serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_retrieval(&self.retrieval)?;

        let completion = &self.completion;
        if completion.timeout_secs == 0 {
            return Err(invalid("completion.timeout_secs", "must be greater than 0"));
        }
        if !(0.0..=2.0).contains(&completion.temperature) {
            return Err(invalid("completion.temperature", "must be within [0, 2]"));
        }
        if completion.model.trim().is_empty() {
            return Err(invalid("completion.model", "must not be empty"));
        }
        if completion.api_key_env.trim().is_empty() {
            return Err(invalid("completion.api_key_env", "must not be empty"));
        }
        if self.embedding.enabled && self.embedding.timeout_secs == 0 {
            return Err(invalid("embedding.timeout_secs", "must be greater than 0"));
        }
        if self.auth.remote_url.is_some() && self.auth.remote_timeout_secs == 0 {
            return Err(invalid("auth.remote_timeout_secs", "must be greater than 0"));
        }
        if self.auth.anonymous_owner.trim().is_empty() {
            return Err(invalid("auth.anonymous_owner", "must not be empty"));
        }
        Ok(())
    }
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    for (path, value) in [
        ("retrieval.tier1_threshold", retrieval.tier1_threshold),
        ("retrieval.tier2_threshold", retrieval.tier2_threshold),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(invalid(path, "must be a non-negative number"));
        }
    }
    if retrieval.tier2_threshold > retrieval.tier1_threshold {
        return Err(invalid(
            "retrieval.tier2_threshold",
            "must not exceed tier1_threshold",
        ));
    }
    for (path, value) in [
        ("retrieval.vector_weight", retrieval.vector_weight),
        ("retrieval.text_weight", retrieval.text_weight),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(path, "must be within [0, 1]"));
        }
    }
    for (path, value) in [
        ("retrieval.match_count", retrieval.match_count),
        ("retrieval.search_keywords", retrieval.search_keywords),
        ("retrieval.keyword_count", retrieval.keyword_count),
        ("retrieval.keyword_match_count", retrieval.keyword_match_count),
        ("retrieval.embedding_dimension", retrieval.embedding_dimension),
    ] {
        if value == 0 {
            return Err(invalid(path, "must be greater than 0"));
        }
    }
    Ok(())
}

fn invalid(path: &str, message: &str) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Internal representation of a loaded config layer.
#[derive(Debug, Clone)]
struct LoadedLayer {
    meta: ConfigLayer,
    value: Value,
}

fn config_from_value(value: Value, label: &str) -> Result<CdssConfig, ConfigError> {
    schema::validate_layer_schema(&value, SchemaMode::Full, label)?;
    let config: CdssConfig = serde_json::from_value(value)?;
    config.validate()?;
    Ok(config)
}
