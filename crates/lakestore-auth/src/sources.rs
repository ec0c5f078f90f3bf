//! Concrete token acquisition strategies.
//!
//! Four grant types are supported against an OAuth2 identity service:
//! client credentials, refresh token, device code, and managed identity
//! (instance metadata endpoint). A fifth, [`StaticTokenSource`], wraps a
//! token string the caller obtained out of band.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AuthError, Result};
use crate::provider::TokenSource;
use crate::token::OAuthToken;

/// Standard OAuth2 token endpoint response body.
#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Lifetime in seconds. Some services return it as a JSON string.
    #[serde(default, deserialize_with = "lenient_u64")]
    expires_in: Option<u64>,
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::String(s)) => s.parse().ok(),
        None => None,
    })
}

async fn post_token_request(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
    headers: &[(&str, &str)],
) -> Result<OAuthToken> {
    let mut req = client.post(endpoint).form(form);
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(AuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }
    parse_token_response(&body)
}

fn parse_token_response(body: &str) -> Result<OAuthToken> {
    let parsed: TokenEndpointResponse =
        serde_json::from_str(body).map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
    let lifetime = parsed
        .expires_in
        .ok_or_else(|| AuthError::MalformedResponse("missing expires_in".to_string()))?;
    let mut token = OAuthToken::new(
        parsed.access_token,
        Utc::now() + Duration::seconds(lifetime as i64),
    );
    token.refresh_token = parsed.refresh_token;
    Ok(token)
}

/// Wraps a token string obtained outside the SDK. Never refreshes; the
/// reported expiry is far in the future so the provider cache keeps it.
pub struct StaticTokenSource {
    access_token: String,
}

impl StaticTokenSource {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch(&self) -> Result<OAuthToken> {
        Ok(OAuthToken::new(
            self.access_token.clone(),
            Utc::now() + Duration::days(365),
        ))
    }
}

/// Client-credentials grant: authenticates with a client id and secret.
pub struct ClientCredsTokenSource {
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: String,
    resource: String,
}

impl ClientCredsTokenSource {
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            resource: resource.into(),
        }
    }
}

#[async_trait]
impl TokenSource for ClientCredsTokenSource {
    async fn fetch(&self) -> Result<OAuthToken> {
        debug!(endpoint = %self.token_endpoint, "fetching token with client credentials");
        post_token_request(
            &self.client,
            &self.token_endpoint,
            &[
                ("grant_type", "client_credentials"),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("resource", &self.resource),
            ],
            &[],
        )
        .await
    }
}

/// Refresh-token grant. The stored refresh token is rotated whenever the
/// endpoint issues a replacement.
pub struct RefreshTokenSource {
    client: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    refresh_token: Mutex<String>,
}

impl RefreshTokenSource {
    pub fn new(
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            refresh_token: Mutex::new(refresh_token.into()),
        }
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    async fn fetch(&self) -> Result<OAuthToken> {
        let mut current = self.refresh_token.lock().await;
        debug!(endpoint = %self.token_endpoint, "refreshing token with refresh-token grant");
        let token = post_token_request(
            &self.client,
            &self.token_endpoint,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.client_id),
                ("refresh_token", current.as_str()),
            ],
            &[],
        )
        .await?;
        if let Some(rotated) = &token.refresh_token {
            *current = rotated.clone();
        }
        Ok(token)
    }
}

/// The user-facing half of the device-code handshake: the code the user must
/// enter and where to enter it.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeChallenge {
    pub user_code: String,
    pub device_code: String,
    pub verification_url: String,
    #[serde(default)]
    pub message: String,
    /// Polling interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Seconds until the device code itself expires.
    #[serde(default = "default_expires")]
    pub expires_in: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires() -> u64 {
    900
}

/// Device-code grant: obtains a user code, hands it to the supplied callback
/// for display, and polls the token endpoint until the user has authorized
/// the request or the code expires.
pub struct DeviceCodeTokenSource {
    client: reqwest::Client,
    device_code_endpoint: String,
    token_endpoint: String,
    client_id: String,
    on_challenge: Box<dyn Fn(&DeviceCodeChallenge) + Send + Sync>,
}

impl DeviceCodeTokenSource {
    pub fn new(
        device_code_endpoint: impl Into<String>,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        on_challenge: impl Fn(&DeviceCodeChallenge) + Send + Sync + 'static,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            device_code_endpoint: device_code_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            on_challenge: Box::new(on_challenge),
        }
    }
}

#[async_trait]
impl TokenSource for DeviceCodeTokenSource {
    async fn fetch(&self) -> Result<OAuthToken> {
        let resp = self
            .client
            .post(&self.device_code_endpoint)
            .form(&[("client_id", self.client_id.as_str())])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AuthError::TokenEndpoint {
                status: status.as_u16(),
                body,
            });
        }
        let challenge: DeviceCodeChallenge =
            serde_json::from_str(&body).map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        (self.on_challenge)(&challenge);

        let deadline = Utc::now() + Duration::seconds(challenge.expires_in as i64);
        loop {
            if Utc::now() > deadline {
                return Err(AuthError::DeviceCodeExpired);
            }
            tokio::time::sleep(std::time::Duration::from_secs(challenge.interval)).await;

            let resp = self
                .client
                .post(&self.token_endpoint)
                .form(&[
                    ("grant_type", "device_code"),
                    ("client_id", self.client_id.as_str()),
                    ("code", challenge.device_code.as_str()),
                ])
                .send()
                .await?;
            let status = resp.status();
            let body = resp.text().await?;
            if status.is_success() {
                return parse_token_response(&body);
            }
            // authorization_pending means keep polling; anything else is final
            if !body.contains("authorization_pending") {
                return Err(AuthError::TokenEndpoint {
                    status: status.as_u16(),
                    body,
                });
            }
        }
    }
}

/// Managed-identity grant: fetches a token from the local instance metadata
/// endpoint, available to workloads running inside the provider's compute.
pub struct ManagedIdentityTokenSource {
    client: reqwest::Client,
    metadata_endpoint: String,
    client_id: Option<String>,
}

impl ManagedIdentityTokenSource {
    pub fn new(metadata_endpoint: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            metadata_endpoint: metadata_endpoint.into(),
            client_id,
        }
    }
}

#[async_trait]
impl TokenSource for ManagedIdentityTokenSource {
    async fn fetch(&self) -> Result<OAuthToken> {
        debug!(endpoint = %self.metadata_endpoint, "fetching token from instance metadata");
        let mut form: Vec<(&str, &str)> = Vec::new();
        if let Some(id) = &self.client_id {
            form.push(("client_id", id.as_str()));
        }
        post_token_request(
            &self.client,
            &self.metadata_endpoint,
            &form,
            &[("Metadata", "true")],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source_returns_token() {
        let source = StaticTokenSource::new("raw-token");
        let token = source.fetch().await.unwrap();
        assert_eq!(token.access_token, "raw-token");
        assert!(!token.is_about_to_expire());
    }

    #[test]
    fn test_parse_token_response_numeric_expiry() {
        let token = parse_token_response(r#"{"access_token":"abc","expires_in":3600}"#).unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(token.refresh_token.is_none());
    }

    #[test]
    fn test_parse_token_response_string_expiry() {
        let token = parse_token_response(
            r#"{"access_token":"abc","expires_in":"3600","refresh_token":"r1"}"#,
        )
        .unwrap();
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
    }

    #[test]
    fn test_parse_token_response_missing_expiry() {
        let err = parse_token_response(r#"{"access_token":"abc"}"#).unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }
}
