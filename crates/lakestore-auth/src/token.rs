use chrono::{DateTime, Duration, Utc};

/// Refresh tokens this long before their stated expiry, to absorb clock
/// skew and leave time for the refresh round-trip itself.
pub const EXPIRY_WINDOW_SECS: i64 = 300;

/// A bearer token for the store's REST surface.
#[derive(Debug, Clone)]
pub struct OAuthToken {
    /// The access token string sent in the `Authorization` header.
    pub access_token: String,
    /// Refresh token, when the grant type issues one.
    pub refresh_token: Option<String>,
    /// Instant at which the access token stops being accepted.
    pub expiry: DateTime<Utc>,
}

impl OAuthToken {
    pub fn new(access_token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expiry,
        }
    }

    /// True when the token expires within the refresh window.
    pub fn is_about_to_expire(&self) -> bool {
        self.expiry - Utc::now() < Duration::seconds(EXPIRY_WINDOW_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_expiring() {
        let token = OAuthToken::new("abc", Utc::now() + Duration::hours(1));
        assert!(!token.is_about_to_expire());
    }

    #[test]
    fn test_token_inside_window_is_expiring() {
        let token = OAuthToken::new("abc", Utc::now() + Duration::seconds(60));
        assert!(token.is_about_to_expire());
    }

    #[test]
    fn test_expired_token_is_expiring() {
        let token = OAuthToken::new("abc", Utc::now() - Duration::hours(1));
        assert!(token.is_about_to_expire());
    }
}
