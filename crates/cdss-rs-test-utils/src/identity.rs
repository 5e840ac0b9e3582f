use async_trait::async_trait;
use cdss_rs_core::{Identity, IdentityError, IdentityResolver};

/// Resolver returning a fixed outcome regardless of the token.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    outcome: Result<Identity, IdentityError>,
}

impl StaticIdentity {
    pub fn user(owner_id: &str) -> Self {
        Self {
            outcome: Ok(Identity::user(owner_id)),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            outcome: Err(IdentityError::InvalidToken),
        }
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self, _bearer: Option<&str>) -> Result<Identity, IdentityError> {
        self.outcome.clone()
    }
}
