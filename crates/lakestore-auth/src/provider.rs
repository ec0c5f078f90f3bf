//! Token caching and refresh serialization.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::token::OAuthToken;

/// A strategy for obtaining a fresh token from an identity service.
///
/// Implementations do one acquisition round-trip per call; caching and
/// expiry tracking live in [`AccessTokenProvider`].
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<OAuthToken>;
}

/// Caches the last token from a [`TokenSource`] and refreshes it when it is
/// about to expire.
///
/// The cache mutex serializes refreshes, so at most one acquisition is in
/// flight per provider instance. `get_token` may block on the network; do
/// not call it while holding other locks.
pub struct AccessTokenProvider {
    source: Box<dyn TokenSource>,
    cached: Mutex<Option<OAuthToken>>,
}

impl AccessTokenProvider {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            cached: Mutex::new(None),
        }
    }

    /// Returns a currently-valid token, refreshing from the source if the
    /// cached one is missing or inside the expiry window.
    pub async fn get_token(&self) -> Result<OAuthToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if !token.is_about_to_expire() {
                return Ok(token.clone());
            }
        }
        debug!("cached token missing or expiring, fetching a new one");
        let token = self.source.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Replaces the cached token directly. Useful for long-lived clients
    /// whose tokens are managed outside the SDK; the installed token is
    /// served until it nears its expiry.
    pub async fn install_token(&self, token: OAuthToken) {
        *self.cached.lock().await = Some(token);
    }
}

impl std::fmt::Debug for AccessTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenProvider").finish_non_exhaustive()
    }
}
