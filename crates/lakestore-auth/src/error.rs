use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token endpoint returned HTTP {status}: {body}")]
    TokenEndpoint { status: u16, body: String },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("device code flow expired before the user authorized the request")]
    DeviceCodeExpired,

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;
