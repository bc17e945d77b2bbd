//! Auth configuration types
//!
//! `AuthConfig` is read straight from the extractor configuration file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authentication configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication required
    #[default]
    None,

    /// HTTP Basic authentication
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },

    /// Static bearer token
    Bearer {
        /// The bearer token
        token: String,
    },

    /// OAuth2 Client Credentials flow
    Oauth2ClientCredentials {
        /// Token endpoint URL
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Requested scopes
        #[serde(default)]
        scopes: Vec<String>,
    },
}

impl AuthConfig {
    /// Whether tokens are fetched (and can be refreshed) at runtime
    pub fn is_refreshable(&self) -> bool {
        matches!(self, Self::Oauth2ClientCredentials { .. })
    }
}

/// Cached token with expiration
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The access token
    pub token: String,
    /// When the token expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// Create a new cached token
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    /// Create a token that expires in N seconds from now
    pub fn expires_in(token: String, seconds: i64) -> Self {
        let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
        Self {
            token,
            expires_at: Some(expires_at),
        }
    }

    /// Check if the token is expired (with 30 second buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(30);
                Utc::now() + buffer >= expires_at
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_cached_token_not_expired() {
        let token = CachedToken::expires_in("test".to_string(), 3600);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_cached_token_inside_buffer_is_expired() {
        let token = CachedToken::expires_in("test".to_string(), 10);
        assert!(token.is_expired());
    }

    #[test]
    fn test_cached_token_no_expiration() {
        let token = CachedToken::new("test".to_string(), None);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_auth_config_from_yaml() {
        let config: AuthConfig = serde_yaml::from_str(
            "type: oauth2_client_credentials\ntoken_url: https://auth.example.com/token\nclient_id: abc\nclient_secret: xyz\n",
        )
        .unwrap();
        assert!(config.is_refreshable());

        let config: AuthConfig =
            serde_yaml::from_str("type: basic\nusername: u\npassword: p\n").unwrap();
        assert!(!config.is_refreshable());
        assert_eq!(AuthConfig::default(), AuthConfig::None);
    }
}
