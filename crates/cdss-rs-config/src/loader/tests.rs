//! Tests for layered configuration loading.

use super::*;
use crate::{AuthMode, RefusalPolicy};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

fn isolated_options(cwd: &Path) -> LayeredConfigOptions {
    let mut options = LayeredConfigOptions::new(cwd);
    options.system_config_path = None;
    options.user_config_path = None;
    options
}

#[test]
fn parse_minimal_config() {
    let config = CdssConfig::load_from_str("{}").expect("config");
    assert_eq!(config.retrieval.match_count, 5);
    assert_eq!(config.retrieval.tier1_threshold, 0.05);
    assert_eq!(config.completion.model, "llama-3.3-70b-versatile");
    assert_eq!(config.completion.timeout_secs, 15);
    assert_eq!(config.completion.history_window, 6);
    assert_eq!(config.grounding.policy, RefusalPolicy::HardRefuse);
    assert_eq!(config.auth.mode, AuthMode::Strict);
    assert_eq!(config.auth.remote_timeout_secs, 5);
}

#[test]
fn parses_policies_and_tokens() {
    let json5 = r#"{
        grounding: { policy: "labeled_general_knowledge" },
        auth: { mode: "anonymous_fallback", tokens: { "tok-1": "dentist-1" } },
        storage: { conversations_path: null },
    }"#;
    let config = CdssConfig::load_from_str(json5).expect("config");
    assert_eq!(
        config.grounding.policy,
        RefusalPolicy::LabeledGeneralKnowledge
    );
    assert_eq!(config.auth.mode, AuthMode::AnonymousFallback);
    assert_eq!(
        config.auth.tokens.get("tok-1").map(String::as_str),
        Some("dentist-1")
    );
    assert_eq!(config.storage.conversations_path, None);
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = CdssConfig::load_from_str(r#"{ unexpected: true }"#).unwrap_err();
    assert!(format!("{err}").contains("unknown key"));
}

#[test]
fn rejects_unknown_nested_key_with_path() {
    let err = CdssConfig::load_from_str(r#"{ retrieval: { top_k: 3 } }"#).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("retrieval.top_k"), "{msg}");
}

#[test]
fn rejects_invalid_refusal_policy() {
    let err = CdssConfig::load_from_str(r#"{ grounding: { policy: "guess" } }"#).unwrap_err();
    assert!(format!("{err}").contains("grounding.policy"));
}

#[test]
fn rejects_non_string_token_owner() {
    let err = CdssConfig::load_from_str(r#"{ auth: { tokens: { abc: 1 } } }"#).unwrap_err();
    assert!(format!("{err}").contains("auth.tokens.abc"));
}

#[test]
fn rejects_inverted_thresholds() {
    let json5 = r#"{ retrieval: { tier1_threshold: 0.1, tier2_threshold: 0.5 } }"#;
    let err = CdssConfig::load_from_str(json5).unwrap_err();
    assert!(format!("{err}").contains("retrieval.tier2_threshold"));
}

#[test]
fn rejects_zero_completion_timeout() {
    let err = CdssConfig::load_from_str(r#"{ completion: { timeout_secs: 0 } }"#).unwrap_err();
    assert!(format!("{err}").contains("completion.timeout_secs"));
}

#[test]
fn rejects_zero_remote_identity_timeout() {
    let json5 = r#"{ auth: { remote_url: "http://127.0.0.1:9/user", remote_timeout_secs: 0 } }"#;
    let err = CdssConfig::load_from_str(json5).unwrap_err();
    assert!(format!("{err}").contains("auth.remote_timeout_secs"));
}

#[test]
fn rejects_zero_match_count() {
    let err = CdssConfig::load_from_str(r#"{ retrieval: { match_count: 0 } }"#).unwrap_err();
    assert!(format!("{err}").contains("retrieval.match_count"));
}

#[test]
fn missing_credential_is_reported_by_name() {
    let json5 = r#"{ completion: { api_key_env: "CDSS_TEST_KEY_THAT_IS_NEVER_SET" } }"#;
    let config = CdssConfig::load_from_str(json5).expect("config");
    let err = config.completion.api_key().unwrap_err();
    assert!(matches!(err, ConfigError::MissingCredential(ref name) if name == "CDSS_TEST_KEY_THAT_IS_NEVER_SET"));
}

#[test]
fn embedding_without_key_env_has_no_credential() {
    let config = CdssConfig::load_from_str("{}").expect("config");
    assert_eq!(config.embedding.api_key().expect("key"), None);
}

#[test]
fn layered_config_prefers_repo_over_cwd() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let project_root = root.join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    let cwd = project_root.join("subdir");
    fs::create_dir_all(&cwd).expect("cwd");

    let system_config = root.join("system.json5");
    write_json5(&system_config, r#"{ server: { bind: "0.0.0.0:1" } }"#);
    let user_config = root.join("user.json5");
    write_json5(&user_config, r#"{ server: { bind: "0.0.0.0:2" } }"#);
    write_json5(
        &project_root.join(DEFAULT_CONFIG_FILE),
        r#"{ server: { bind: "0.0.0.0:3" }, retrieval: { match_count: 7 } }"#,
    );
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        r#"{ server: { bind: "0.0.0.0:4" } }"#,
    );
    write_json5(
        &project_root
            .join(DEFAULT_CONFIG_DIR)
            .join(DEFAULT_CONFIG_FILE),
        r#"{ server: { bind: "0.0.0.0:5" } }"#,
    );

    let mut options = LayeredConfigOptions::new(&cwd);
    options.system_config_path = Some(system_config);
    options.user_config_path = Some(user_config);
    let layered = CdssConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.server.bind, "0.0.0.0:5");
    assert_eq!(layered.config.retrieval.match_count, 7);
    let sources: Vec<ConfigLayerSource> = layered.layers.iter().map(|l| l.source).collect();
    assert_eq!(
        sources,
        vec![
            ConfigLayerSource::System,
            ConfigLayerSource::User,
            ConfigLayerSource::Project,
            ConfigLayerSource::Cwd,
            ConfigLayerSource::Repo,
        ]
    );
}

#[test]
fn runtime_layer_overrides_everything() {
    let temp = TempDir::new().expect("tmp");
    let cwd = temp.path().join("work");
    fs::create_dir_all(&cwd).expect("cwd");
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        r#"{ completion: { model: "local" } }"#,
    );
    let runtime = temp.path().join("override.json5");
    write_json5(&runtime, r#"{ completion: { model: "override" } }"#);

    let options = isolated_options(&cwd).with_runtime_path(&runtime);
    let layered = CdssConfig::load_layered_with_options(options).expect("layered");
    assert_eq!(layered.config.completion.model, "override");
    assert_eq!(layered.layers.len(), 2);
}

#[test]
fn project_layer_skipped_when_same_as_cwd() {
    let temp = TempDir::new().expect("tmp");
    let project_root = temp.path().join("project");
    fs::create_dir_all(project_root.join(".git")).expect("git");
    write_json5(
        &project_root.join(DEFAULT_CONFIG_FILE),
        r#"{ retrieval: { keyword_count: 4 } }"#,
    );

    let layered =
        CdssConfig::load_layered_with_options(isolated_options(&project_root)).expect("layered");
    assert_eq!(layered.config.retrieval.keyword_count, 4);
    assert_eq!(layered.layers.len(), 1);
    assert_eq!(layered.layers[0].source, ConfigLayerSource::Project);
}

#[test]
fn invalid_layer_reports_its_label() {
    let temp = TempDir::new().expect("tmp");
    let cwd = temp.path().join("work");
    fs::create_dir_all(&cwd).expect("cwd");
    write_json5(&cwd.join(DEFAULT_CONFIG_FILE), r#"{ server: { port: 1 } }"#);

    let err = CdssConfig::load_layered_with_options(isolated_options(&cwd)).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("cwd("), "{msg}");
    assert!(msg.contains("server.port"), "{msg}");
}

#[test]
fn builder_overrides_sections() {
    let config = CdssConfig::builder()
        .grounding(crate::GroundingConfig {
            policy: RefusalPolicy::LabeledGeneralKnowledge,
        })
        .build();
    assert_eq!(
        config.grounding.policy,
        RefusalPolicy::LabeledGeneralKnowledge
    );
    config.validate().expect("valid");
}
