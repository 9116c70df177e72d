//! Auth configuration types

use crate::config::{ServiceAccountConfig, SinkAuthConfig};
use crate::error::{Error, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::collections::HashMap;

/// Token endpoint used when a key does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Lifetime requested for service-account assertions
const JWT_LIFETIME_SECONDS: u64 = 3600;

/// Credentials a sink client presents
#[derive(Debug, Clone, Default)]
pub enum AuthConfig {
    #[default]
    None,

    /// `Authorization: Bearer <token>`
    Bearer { token: String },

    /// RS256 assertion, used directly as the bearer token or exchanged at
    /// `token_url` for an access token
    Jwt {
        issuer: String,
        subject: Option<String>,
        audience: String,
        /// PEM-encoded RSA key
        private_key: String,
        token_lifetime_seconds: u64,
        /// Extra claims such as `scope`
        claims: HashMap<String, String>,
        token_url: Option<String>,
    },

    /// Fixed headers added verbatim
    CustomHeaders { headers: HashMap<String, String> },
}

impl From<&SinkAuthConfig> for AuthConfig {
    fn from(config: &SinkAuthConfig) -> Self {
        match config {
            SinkAuthConfig::None => Self::None,
            SinkAuthConfig::Bearer { token } => Self::Bearer {
                token: token.clone(),
            },
            SinkAuthConfig::CustomHeaders { headers } => Self::CustomHeaders {
                headers: headers.clone(),
            },
        }
    }
}

/// Seconds before expiry at which a token is treated as stale
const EXPIRY_SKEW_SECONDS: i64 = 30;

/// An access token and when it stops being accepted
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: String,
    /// `None` for tokens that never expire
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    /// Token valid for `seconds` from now
    pub fn expires_in(token: String, seconds: i64) -> Self {
        Self::new(token, Some(Utc::now() + TimeDelta::seconds(seconds)))
    }

    /// Stale once within the skew window of its expiry
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| Utc::now() + TimeDelta::seconds(EXPIRY_SKEW_SECONDS) >= at)
    }
}

/// Resolved service-account credentials
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    /// Service account email, the JWT issuer
    pub client_email: String,
    /// PEM private key
    pub private_key: String,
    /// Token endpoint
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    /// Resolve credentials from a key file or inline fields.
    ///
    /// Inline fields and `token_uri` override values read from the file.
    pub fn from_config(config: &ServiceAccountConfig) -> Result<Self> {
        let mut key = match &config.credentials_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
                serde_json::from_str::<ServiceAccountKey>(&text).map_err(|e| {
                    Error::auth(format!(
                        "Invalid service account key file {}: {e}",
                        path.display()
                    ))
                })?
            }
            None => Self {
                client_email: String::new(),
                private_key: String::new(),
                token_uri: None,
            },
        };

        if let Some(email) = &config.client_email {
            key.client_email.clone_from(email);
        }
        if let Some(private_key) = &config.private_key {
            key.private_key.clone_from(private_key);
        }
        if config.token_uri.is_some() {
            key.token_uri.clone_from(&config.token_uri);
        }

        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(Error::auth(
                "service account needs client_email and private_key (inline or via credentials_file)",
            ));
        }

        Ok(key)
    }

    /// Token endpoint, falling back to the default
    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    /// JWT-bearer auth config requesting the given scopes
    pub fn auth_config(&self, scopes: &[String]) -> AuthConfig {
        let mut claims = HashMap::new();
        if !scopes.is_empty() {
            claims.insert("scope".to_string(), scopes.join(" "));
        }
        AuthConfig::Jwt {
            issuer: self.client_email.clone(),
            subject: None,
            audience: self.token_uri().to_string(),
            private_key: self.private_key.clone(),
            token_lifetime_seconds: JWT_LIFETIME_SECONDS,
            claims,
            token_url: Some(self.token_uri().to_string()),
        }
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_token_expiry_window() {
        assert!(!CachedToken::expires_in("fresh".to_string(), 3600).is_expired());
        assert!(CachedToken::expires_in("inside skew".to_string(), 10).is_expired());
        assert!(CachedToken::expires_in("past".to_string(), -100).is_expired());
        assert!(!CachedToken::new("forever".to_string(), None).is_expired());
    }

    #[test]
    fn test_from_sink_auth() {
        let auth = AuthConfig::from(&SinkAuthConfig::Bearer {
            token: "t".to_string(),
        });
        assert!(matches!(auth, AuthConfig::Bearer { token } if token == "t"));
        assert!(matches!(
            AuthConfig::from(&SinkAuthConfig::None),
            AuthConfig::None
        ));
    }

    #[test]
    fn test_service_account_inline() {
        let config = ServiceAccountConfig {
            client_email: Some("svc@example.iam".to_string()),
            private_key: Some("pem".to_string()),
            ..Default::default()
        };
        let key = ServiceAccountKey::from_config(&config).unwrap();
        assert_eq!(key.token_uri(), DEFAULT_TOKEN_URI);

        let AuthConfig::Jwt {
            issuer, claims, ..
        } = key.auth_config(&["scope-a".to_string(), "scope-b".to_string()])
        else {
            panic!("expected jwt auth");
        };
        assert_eq!(issuer, "svc@example.iam");
        assert_eq!(claims["scope"], "scope-a scope-b");
    }

    #[test]
    fn test_service_account_key_file_with_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.json");
        std::fs::write(
            &path,
            r#"{"type": "service_account", "client_email": "file@example.iam",
                "private_key": "pem", "token_uri": "https://file/token"}"#,
        )
        .unwrap();

        let config = ServiceAccountConfig {
            credentials_file: Some(path),
            token_uri: Some("http://localhost/token".to_string()),
            ..Default::default()
        };
        let key = ServiceAccountKey::from_config(&config).unwrap();
        assert_eq!(key.client_email, "file@example.iam");
        assert_eq!(key.token_uri(), "http://localhost/token");
    }

    #[test]
    fn test_service_account_missing_fields() {
        let err = ServiceAccountKey::from_config(&ServiceAccountConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Auth { .. }));
    }
}
