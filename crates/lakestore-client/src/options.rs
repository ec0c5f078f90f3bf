//! Per-client configuration.

use std::time::Duration;

use lakestore_core::error::{Result, StoreError};
use lakestore_core::query::encode_path;
use lakestore_core::retry::BackoffConfig;

/// TLS channel selection for the transport collaborator. `Default` tries
/// OpenSSL and falls back to the platform stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslChannelMode {
    OpenSsl,
    DefaultJse,
    #[default]
    Default,
}

/// Options controlling a [`StoreClient`](crate::StoreClient), applied at
/// construction.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub(crate) user_agent_suffix: Option<String>,
    pub(crate) insecure_transport: bool,
    pub(crate) throw_remote_exceptions: bool,
    pub(crate) file_path_prefix: Option<String>,
    pub(crate) read_ahead_queue_depth: Option<usize>,
    pub(crate) default_timeout: Option<Duration>,
    pub(crate) ssl_channel_mode: SslChannelMode,
    pub(crate) backoff: Option<BackoffConfig>,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `suffix` to the user-agent the SDK builds.
    pub fn with_user_agent_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.user_agent_suffix = Some(suffix.into());
        self
    }

    /// Uses plain http instead of https. Only for tests against mock or
    /// local servers; the real service speaks https only.
    pub fn with_insecure_transport(mut self) -> Self {
        self.insecure_transport = true;
        self
    }

    /// Surfaces server-reported exception class names as typed I/O errors
    /// instead of the SDK's structured error.
    pub fn with_throw_remote_exceptions(mut self) -> Self {
        self.throw_remote_exceptions = true;
        self
    }

    /// Scopes the client to a subtree: the prefix is prepended to every
    /// path. Must be absolute with no empty segments.
    pub fn with_file_path_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_path_prefix = Some(prefix.into());
        self
    }

    /// Default look-ahead depth for read streams; 0 disables read-ahead.
    pub fn with_read_ahead_queue_depth(mut self, depth: usize) -> Self {
        self.read_ahead_queue_depth = Some(depth);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_ssl_channel_mode(mut self, mode: SslChannelMode) -> Self {
        self.ssl_channel_mode = mode;
        self
    }

    /// Parameters for the exponential-backoff retry policy this client
    /// mints for idempotent operations.
    pub fn with_exponential_backoff(
        mut self,
        max_retries: u32,
        initial_interval: Duration,
        factor: u32,
    ) -> Self {
        self.backoff = Some(BackoffConfig {
            max_retries,
            initial_interval,
            factor,
        });
        self
    }
}

/// Normalizes and URL-encodes a path prefix: leading slash enforced,
/// trailing slash stripped, empty segments rejected.
pub(crate) fn normalize_path_prefix(prefix: &str) -> Result<Option<String>> {
    if prefix.is_empty() {
        return Err(StoreError::InvalidInput(
            "path prefix cannot be empty".to_string(),
        ));
    }
    if prefix == "/" {
        return Ok(None);
    }
    if prefix.contains("//") {
        return Err(StoreError::InvalidInput(format!(
            "path prefix cannot contain an empty path element: {prefix}"
        )));
    }
    let mut normalized = String::new();
    if !prefix.starts_with('/') {
        normalized.push('/');
    }
    normalized.push_str(prefix.trim_end_matches('/'));
    Ok(Some(encode_path(&normalized)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(
            normalize_path_prefix("tenant1").unwrap().as_deref(),
            Some("/tenant1")
        );
        assert_eq!(
            normalize_path_prefix("/tenant1/").unwrap().as_deref(),
            Some("/tenant1")
        );
        assert_eq!(normalize_path_prefix("/").unwrap(), None);
    }

    #[test]
    fn test_prefix_rejects_empty_segments() {
        assert!(normalize_path_prefix("/a//b").is_err());
        assert!(normalize_path_prefix("").is_err());
    }

    #[test]
    fn test_prefix_is_url_encoded() {
        assert_eq!(
            normalize_path_prefix("/team space").unwrap().as_deref(),
            Some("/team%20space")
        );
    }

    #[test]
    fn test_options_builder_chains() {
        let options = StoreOptions::new()
            .with_user_agent_suffix("svc/1.2")
            .with_insecure_transport()
            .with_read_ahead_queue_depth(0)
            .with_exponential_backoff(2, Duration::from_millis(10), 3);
        assert_eq!(options.user_agent_suffix.as_deref(), Some("svc/1.2"));
        assert!(options.insecure_transport);
        assert_eq!(options.read_ahead_queue_depth, Some(0));
        assert_eq!(options.backoff.unwrap().max_retries, 2);
    }
}
