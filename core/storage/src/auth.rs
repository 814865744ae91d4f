//! Credentials and access-token management.

use async_trait::async_trait;
use std::fmt;
use tracing::{error, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

use valuestocks_common::{Error, Result};

use crate::store::RemoteStore;

/// Environment variable holding the long-lived refresh token.
pub const REFRESH_TOKEN_VAR: &str = "DROPBOX_REFRESH_TOKEN";
/// Environment variable holding the OAuth2 client ID.
pub const CLIENT_ID_VAR: &str = "DROPBOX_CLIENT_ID";
/// Environment variable holding the OAuth2 client secret.
pub const CLIENT_SECRET_VAR: &str = "DROPBOX_CLIENT_SECRET";

/// The three values needed to mint access tokens.
///
/// A `Credentials` value is always complete; secrets are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    refresh_token: String,
    client_id: String,
    client_secret: String,
}

/// Values supplied directly, taking precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl Credentials {
    /// Create a credential set.
    ///
    /// # Errors
    /// - `Error::Config` naming the first missing (empty) value
    pub fn new(
        refresh_token: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Self {
            refresh_token: refresh_token.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        };

        for (value, name) in [
            (&credentials.refresh_token, REFRESH_TOKEN_VAR),
            (&credentials.client_id, CLIENT_ID_VAR),
            (&credentials.client_secret, CLIENT_SECRET_VAR),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("Missing Dropbox credential: {}", name)));
            }
        }

        Ok(credentials)
    }

    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve(CredentialOverrides::default())
    }

    /// Combine direct overrides with the process environment.
    pub fn resolve(overrides: CredentialOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |name| std::env::var(name).ok())
    }

    /// Combine direct overrides with values from `lookup`.
    pub fn resolve_with<F>(overrides: CredentialOverrides, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |value: Option<String>, name: &str| value.or_else(|| lookup(name)).unwrap_or_default();

        Self::new(
            pick(overrides.refresh_token, REFRESH_TOKEN_VAR),
            pick(overrides.client_id, CLIENT_ID_VAR),
            pick(overrides.client_secret, CLIENT_SECRET_VAR),
        )
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("refresh_token", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Something that can mint a fresh access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Exchange long-lived credentials for a new bearer token.
    ///
    /// # Errors
    /// - `Error::Authentication` if the exchange fails or yields no token
    async fn obtain_token(&self) -> Result<String>;
}

/// Holds the current access token and replaces it when a probe rejects it.
///
/// There is no expiry tracking: validity is whatever the remote store says
/// when probed.
pub struct TokenManager<S> {
    source: S,
    access_token: Option<String>,
}

impl<S: TokenSource> TokenManager<S> {
    /// Create a manager with no token yet.
    pub fn new(source: S) -> Self {
        Self {
            source,
            access_token: None,
        }
    }

    /// Create a manager and fetch the first token.
    ///
    /// # Errors
    /// - `Error::Authentication` if the initial exchange fails
    pub async fn initialize(source: S) -> Result<Self> {
        let mut manager = Self::new(source);
        manager.refresh().await?;
        Ok(manager)
    }

    /// Replace the current token with a freshly obtained one.
    pub async fn refresh(&mut self) -> Result<String> {
        let token = self.source.obtain_token().await.inspect_err(|e| {
            error!("Error obtaining access token: {}", e);
        })?;
        self.access_token = Some(token.clone());
        info!("Access token refreshed successfully");
        Ok(token)
    }

    /// Probe the store with `token`.
    ///
    /// Any failure counts as "not valid"; nothing is propagated.
    pub async fn is_valid<R: RemoteStore + ?Sized>(store: &R, token: &str) -> bool {
        match store.current_account(token).await {
            Ok(()) => true,
            Err(Error::Authentication(reason)) => {
                info!("Access token is invalid or expired: {}", reason);
                false
            }
            Err(e) => {
                error!("Unexpected error while validating token: {}", e);
                false
            }
        }
    }

    /// Return a token the store currently accepts.
    ///
    /// Refreshes at most once. A refreshed token that is still rejected is
    /// fatal for the calling operation.
    ///
    /// # Errors
    /// - `Error::Authentication` if the refresh fails or its token is rejected
    pub async fn ensure_valid<R: RemoteStore + ?Sized>(&mut self, store: &R) -> Result<String> {
        if let Some(token) = &self.access_token {
            if Self::is_valid(store, token).await {
                return Ok(token.clone());
            }
        }

        info!("Access token missing or rejected, refreshing");
        let token = self.refresh().await?;

        if !Self::is_valid(store, &token).await {
            error!("Access token could not be refreshed. Please check credentials.");
            return Err(Error::Authentication(
                "Access token invalid, and refresh failed".to_string(),
            ));
        }

        Ok(token)
    }

    /// The token currently held, if any.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Get the underlying token source.
    pub fn source(&self) -> &S {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_credentials_from_lookup() {
        let creds = Credentials::resolve_with(
            CredentialOverrides::default(),
            env(&[
                (REFRESH_TOKEN_VAR, "refresh"),
                (CLIENT_ID_VAR, "id"),
                (CLIENT_SECRET_VAR, "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(creds.refresh_token(), "refresh");
        assert_eq!(creds.client_id(), "id");
        assert_eq!(creds.client_secret(), "secret");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = CredentialOverrides {
            client_id: Some("override-id".to_string()),
            ..Default::default()
        };
        let creds = Credentials::resolve_with(
            overrides,
            env(&[
                (REFRESH_TOKEN_VAR, "refresh"),
                (CLIENT_ID_VAR, "env-id"),
                (CLIENT_SECRET_VAR, "secret"),
            ]),
        )
        .unwrap();

        assert_eq!(creds.client_id(), "override-id");
    }

    #[test]
    fn test_any_missing_value_is_config_error() {
        let full = [
            (REFRESH_TOKEN_VAR, "refresh"),
            (CLIENT_ID_VAR, "id"),
            (CLIENT_SECRET_VAR, "secret"),
        ];

        for skip in 0..full.len() {
            let partial: Vec<(&str, &str)> = full
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, pair)| *pair)
                .collect();

            let result = Credentials::resolve_with(CredentialOverrides::default(), env(&partial));
            match result {
                Err(Error::Config(msg)) => assert!(msg.contains(full[skip].0)),
                other => panic!("expected config error, got {:?}", other),
            }
        }

        assert!(matches!(
            Credentials::new("refresh", "   ", "secret"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("refresh-secret", "app-id", "client-secret").unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("app-id"));
        assert!(!debug.contains("refresh-secret"));
        assert!(!debug.contains("client-secret"));
    }

    #[tokio::test]
    async fn test_valid_token_is_not_refreshed() {
        let store = MemoryStore::new();
        let mut manager = TokenManager::initialize(store.token_source()).await.unwrap();
        assert_eq!(store.issued_tokens(), 1);

        let token = manager.ensure_valid(&store).await.unwrap();
        assert_eq!(Some(token.as_str()), manager.access_token());
        assert_eq!(store.issued_tokens(), 1);
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_once() {
        let store = MemoryStore::new();
        let mut manager = TokenManager::initialize(store.token_source()).await.unwrap();
        let first = manager.access_token().unwrap().to_string();

        store.revoke_tokens();
        let second = manager.ensure_valid(&store).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.issued_tokens(), 2);
    }

    #[tokio::test]
    async fn test_refresh_that_stays_invalid_is_fatal() {
        let store = MemoryStore::new();
        let mut manager = TokenManager::initialize(store.token_source()).await.unwrap();

        store.revoke_tokens();
        store.reject_new_tokens(true);

        let result = manager.ensure_valid(&store).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(store.issued_tokens(), 2);

        // The manager stays usable once the store accepts tokens again.
        store.reject_new_tokens(false);
        assert!(manager.ensure_valid(&store).await.is_ok());
        assert_eq!(store.issued_tokens(), 3);
    }
}
