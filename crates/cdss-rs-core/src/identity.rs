//! Caller identity resolution from bearer tokens.

use async_trait::async_trait;
use cdss_rs_config::{AuthConfig, AuthMode, ConfigError};
use cdss_rs_protocol::OwnerId;
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Resolved caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner_id: OwnerId,
    /// True when no credential was verified.
    pub anonymous: bool,
}

impl Identity {
    pub fn user(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            anonymous: false,
        }
    }

    pub fn anonymous(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            owner_id: owner_id.into(),
            anonymous: true,
        }
    }
}

/// Errors returned while resolving a caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdentityError {
    #[error("missing authorization header")]
    MissingCredential,
    #[error("unauthorized")]
    InvalidToken,
    #[error("identity service error: {0}")]
    Remote(String),
}

#[async_trait]
/// Maps an optional bearer token to a caller identity.
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, bearer: Option<&str>) -> Result<Identity, IdentityError>;
}

/// Token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenResolver {
    tokens: HashMap<String, OwnerId>,
}

impl StaticTokenResolver {
    pub fn new(tokens: HashMap<String, OwnerId>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityResolver for StaticTokenResolver {
    async fn resolve(&self, bearer: Option<&str>) -> Result<Identity, IdentityError> {
        let token = bearer.ok_or(IdentityError::MissingCredential)?;
        self.tokens
            .get(token)
            .map(|owner| Identity::user(owner.clone()))
            .ok_or(IdentityError::InvalidToken)
    }
}

/// User-info endpoint answering `{ "id": ... }` for a valid bearer token.
#[derive(Debug, Clone)]
pub struct RemoteIdentityResolver {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: String,
}

impl RemoteIdentityResolver {
    /// Resolver whose user-info requests give up after `timeout`.
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, IdentityError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| IdentityError::Remote(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl IdentityResolver for RemoteIdentityResolver {
    async fn resolve(&self, bearer: Option<&str>) -> Result<Identity, IdentityError> {
        let token = bearer.ok_or(IdentityError::MissingCredential)?;
        let mut request = self.client.get(&self.url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| IdentityError::Remote(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(IdentityError::InvalidToken);
        }
        if !status.is_success() {
            return Err(IdentityError::Remote(format!("status {status}")));
        }
        let info: UserInfo = response
            .json()
            .await
            .map_err(|err| IdentityError::Remote(err.to_string()))?;
        if info.id.trim().is_empty() {
            return Err(IdentityError::InvalidToken);
        }
        debug!("resolved remote identity (owner_id={})", info.id);
        Ok(Identity::user(info.id))
    }
}

/// Tries resolvers in order and returns the first success.
pub struct ChainedResolver {
    resolvers: Vec<Arc<dyn IdentityResolver>>,
}

impl ChainedResolver {
    pub fn new(resolvers: Vec<Arc<dyn IdentityResolver>>) -> Self {
        Self { resolvers }
    }
}

#[async_trait]
impl IdentityResolver for ChainedResolver {
    async fn resolve(&self, bearer: Option<&str>) -> Result<Identity, IdentityError> {
        let mut last = match bearer {
            Some(_) => IdentityError::InvalidToken,
            None => IdentityError::MissingCredential,
        };
        for resolver in &self.resolvers {
            match resolver.resolve(bearer).await {
                Ok(identity) => return Ok(identity),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}

/// Downgrades every resolution failure to an anonymous identity.
pub struct AnonymousFallbackResolver {
    inner: Arc<dyn IdentityResolver>,
    owner_id: OwnerId,
}

impl AnonymousFallbackResolver {
    pub fn new(inner: Arc<dyn IdentityResolver>, owner_id: impl Into<OwnerId>) -> Self {
        Self {
            inner,
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for AnonymousFallbackResolver {
    async fn resolve(&self, bearer: Option<&str>) -> Result<Identity, IdentityError> {
        match self.inner.resolve(bearer).await {
            Ok(identity) => Ok(identity),
            Err(err) => {
                warn!("identity unresolved; continuing anonymously (error={})", err);
                Ok(Identity::anonymous(self.owner_id.clone()))
            }
        }
    }
}

/// Build the resolver stack described by the auth section.
pub fn resolver_from_config(config: &AuthConfig) -> Result<Arc<dyn IdentityResolver>, ConfigError> {
    let mut resolvers: Vec<Arc<dyn IdentityResolver>> = Vec::new();
    if !config.tokens.is_empty() {
        resolvers.push(Arc::new(StaticTokenResolver::new(config.tokens.clone())));
    }
    if let Some(url) = &config.remote_url {
        let api_key = match &config.remote_api_key_env {
            Some(name) => Some(std::env::var(name).map_err(|_| {
                ConfigError::MissingCredential(name.clone())
            })?),
            None => None,
        };
        let remote = RemoteIdentityResolver::new(
            url.clone(),
            api_key,
            Duration::from_secs(config.remote_timeout_secs),
        )
        .map_err(|err| ConfigError::InvalidField {
            path: "auth.remote_url".to_string(),
            message: err.to_string(),
        })?;
        resolvers.push(Arc::new(remote));
    }
    info!(
        "identity resolvers configured (count={}, mode={:?})",
        resolvers.len(),
        config.mode
    );
    let chain: Arc<dyn IdentityResolver> = Arc::new(ChainedResolver::new(resolvers));
    Ok(match config.mode {
        AuthMode::Strict => chain,
        AuthMode::AnonymousFallback => Arc::new(AnonymousFallbackResolver::new(
            chain,
            config.anonymous_owner.clone(),
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::{IdentityError, IdentityResolver, RemoteIdentityResolver, resolver_from_config};
    use crate::identity::Identity;
    use cdss_rs_config::{AuthConfig, AuthMode};
    use pretty_assertions::assert_eq;
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;

    fn config(mode: AuthMode) -> AuthConfig {
        let mut config = AuthConfig {
            mode,
            ..AuthConfig::default()
        };
        config
            .tokens
            .insert("tok-1".to_string(), "dentist-1".to_string());
        config
    }

    #[tokio::test]
    async fn strict_mode_rejects_missing_and_unknown_tokens() {
        let resolver = resolver_from_config(&config(AuthMode::Strict)).expect("resolver");
        assert_eq!(
            resolver.resolve(Some("tok-1")).await,
            Ok(Identity::user("dentist-1"))
        );
        assert_eq!(
            resolver.resolve(None).await,
            Err(IdentityError::MissingCredential)
        );
        assert_eq!(
            resolver.resolve(Some("nope")).await,
            Err(IdentityError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn fallback_mode_continues_anonymously() {
        let resolver =
            resolver_from_config(&config(AuthMode::AnonymousFallback)).expect("resolver");
        assert_eq!(
            resolver.resolve(Some("nope")).await,
            Ok(Identity::anonymous("anonymous"))
        );
        assert_eq!(
            resolver.resolve(Some("tok-1")).await,
            Ok(Identity::user("dentist-1"))
        );
    }

    #[tokio::test]
    async fn empty_strict_config_rejects_everyone() {
        let resolver = resolver_from_config(&AuthConfig::default()).expect("resolver");
        assert_eq!(
            resolver.resolve(Some("anything")).await,
            Err(IdentityError::InvalidToken)
        );
    }

    #[tokio::test]
    async fn silent_user_info_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.expect("accept");
                held.push(socket);
            }
        });

        let resolver = RemoteIdentityResolver::new(
            format!("http://{addr}/auth/v1/user"),
            None,
            Duration::from_millis(200),
        )
        .expect("resolver");
        let started = Instant::now();
        let result = resolver.resolve(Some("token")).await;
        server.abort();

        assert!(matches!(result, Err(IdentityError::Remote(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn remote_url_builds_a_bounded_resolver() {
        let resolver = resolver_from_config(&AuthConfig {
            remote_url: Some("http://127.0.0.1:9/auth/v1/user".to_string()),
            remote_timeout_secs: 1,
            ..AuthConfig::default()
        });
        assert!(resolver.is_ok());
    }
}
