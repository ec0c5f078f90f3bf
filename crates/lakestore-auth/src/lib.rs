//! OAuth2 token acquisition for the lakestore SDK.
//!
//! The store authenticates every REST call with a bearer token. This crate
//! provides:
//! - The [`OAuthToken`] model with expiry tracking
//! - The [`TokenSource`] trait for pluggable acquisition strategies
//! - [`AccessTokenProvider`], a caching wrapper that refreshes tokens
//!   shortly before expiry and serializes refreshes per instance
//! - Concrete sources: client credentials, refresh token, device code,
//!   and managed identity

pub mod error;
pub mod provider;
pub mod sources;
pub mod token;

pub use error::{AuthError, Result};
pub use provider::{AccessTokenProvider, TokenSource};
pub use sources::{
    ClientCredsTokenSource, DeviceCodeChallenge, DeviceCodeTokenSource, ManagedIdentityTokenSource,
    RefreshTokenSource, StaticTokenSource,
};
pub use token::OAuthToken;
