use std::{collections::HashSet, env};

use billing_client::domain::Identity;
use tokio::sync::RwLock;

use super::{AccessToken, IdentityProvider, TokenGrant};
use crate::error::BackendFailure;

#[derive(Debug, Clone)]
enum TokenSource {
    Env(String),
    Fixed(String),
}

/// Identity provider for a single, locally configured account.
///
/// Tokens come from an environment variable (or a fixed value in tests);
/// revoked tokens are refused with the same 401 shape a remote provider uses.
#[derive(Debug)]
pub struct ConfiguredIdentityProvider {
    identity: Identity,
    source: TokenSource,
    lifetime_secs: Option<u64>,
    revoked: RwLock<HashSet<AccessToken>>,
}

impl ConfiguredIdentityProvider {
    pub fn from_env(identity: Identity, token_env: impl Into<String>) -> Self {
        Self::with_source(identity, TokenSource::Env(token_env.into()))
    }

    pub fn with_token(identity: Identity, token: impl Into<String>) -> Self {
        Self::with_source(identity, TokenSource::Fixed(token.into()))
    }

    fn with_source(identity: Identity, source: TokenSource) -> Self {
        Self {
            identity,
            source,
            lifetime_secs: Some(3600),
            revoked: RwLock::new(HashSet::new()),
        }
    }

    async fn ensure_live(&self, token: &AccessToken) -> Result<(), BackendFailure> {
        if token.as_str().is_empty() || self.revoked.read().await.contains(token) {
            return Err(BackendFailure::unauthenticated());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IdentityProvider for ConfiguredIdentityProvider {
    async fn exchange_token(&self, scopes: &[&str]) -> Result<TokenGrant, BackendFailure> {
        let token = match &self.source {
            TokenSource::Fixed(t) => t.clone(),
            TokenSource::Env(var) => env::var(var)
                .map_err(|_| BackendFailure::Text(format!("no access token available in ${var}")))?,
        };
        let token = AccessToken::new(token.trim());
        self.ensure_live(&token).await?;
        tracing::debug!(scopes = scopes.len(), "issued access token");
        Ok(TokenGrant {
            access_token: token,
            expires_in: self.lifetime_secs,
        })
    }

    async fn fetch_identity(&self, token: &AccessToken) -> Result<Identity, BackendFailure> {
        self.ensure_live(token).await?;
        Ok(self.identity.clone())
    }

    async fn revoke(&self, token: &AccessToken) -> Result<(), BackendFailure> {
        self.revoked.write().await.insert(token.clone());
        Ok(())
    }
}
