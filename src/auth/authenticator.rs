//! Per-request credentials for sink clients
//!
//! Static credentials (bearer, custom headers) are applied verbatim. JWT
//! credentials go through a `TokenSource` that signs an RS256 assertion,
//! optionally exchanges it for an access token, and caches the result until
//! shortly before expiry.

use super::types::{AuthConfig, CachedToken};
use crate::error::{Error, Result};
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Applies one sink's credentials to outgoing requests
pub struct Authenticator {
    config: AuthConfig,
    tokens: Option<TokenSource>,
}

impl Authenticator {
    pub fn new(config: AuthConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    /// Use `http` for token exchanges, sharing the sink client's pool
    pub fn with_client(config: AuthConfig, http: Client) -> Self {
        let tokens = match &config {
            AuthConfig::Jwt { .. } => Some(TokenSource::new(http)),
            _ => None,
        };
        Self { config, tokens }
    }

    /// Attach credentials to `req`
    pub async fn apply(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        match (&self.config, &self.tokens) {
            (AuthConfig::None, _) => Ok(req),
            (AuthConfig::Bearer { token }, _) => Ok(req.bearer_auth(token)),
            (AuthConfig::CustomHeaders { headers }, _) => Ok(headers
                .iter()
                .fold(req, |req, (name, value)| req.header(name.as_str(), value.as_str()))),
            (AuthConfig::Jwt { .. }, Some(tokens)) => {
                let token = tokens.current(&self.config).await?;
                Ok(req.bearer_auth(token))
            }
            (AuthConfig::Jwt { .. }, None) => {
                Err(Error::auth("JWT credentials without a token source"))
            }
        }
    }

    /// Drop the cached access token; the next request signs a fresh one
    pub async fn clear_cache(&self) {
        if let Some(tokens) = &self.tokens {
            tokens.invalidate().await;
        }
    }

    fn kind(&self) -> &'static str {
        match &self.config {
            AuthConfig::None => "none",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::Jwt { .. } => "jwt",
            AuthConfig::CustomHeaders { .. } => "custom_headers",
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Cached access token for JWT credentials.
///
/// The mutex is held across a refresh so concurrent appends wait for one
/// exchange instead of each starting their own.
struct TokenSource {
    http: Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    fn new(http: Client) -> Self {
        Self {
            http,
            cached: Mutex::new(None),
        }
    }

    async fn current(&self, config: &AuthConfig) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| !t.is_expired()) {
            return Ok(token.token.clone());
        }

        let fresh = self.issue(config).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        self.cached.lock().await.take();
    }

    async fn issue(&self, config: &AuthConfig) -> Result<CachedToken> {
        let AuthConfig::Jwt {
            issuer,
            subject,
            audience,
            private_key,
            token_lifetime_seconds,
            claims,
            token_url,
        } = config
        else {
            return Err(Error::auth("token refresh needs JWT credentials"));
        };

        #[allow(clippy::cast_possible_wrap)]
        let lifetime = *token_lifetime_seconds as i64;
        let now = Utc::now().timestamp();
        let assertion = Assertion {
            iss: issuer,
            sub: subject.as_deref(),
            aud: audience,
            iat: now,
            exp: now + lifetime,
            extra: claims,
        }
        .sign(private_key)?;

        match token_url {
            Some(url) => self.exchange(url, &assertion).await,
            None => Ok(CachedToken::expires_in(assertion, lifetime)),
        }
    }

    async fn exchange(&self, token_url: &str, assertion: &str) -> Result<CachedToken> {
        let response = self
            .http
            .post(token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenRefresh {
                message: format!("{token_url} answered {}: {body}", status.as_u16()),
            });
        }

        let grant: TokenGrant = response.json().await?;
        tracing::debug!(token_url, expires_in = ?grant.expires_in, "Exchanged JWT assertion");
        Ok(match grant.expires_in {
            Some(secs) => CachedToken::expires_in(grant.access_token, secs),
            None => CachedToken::new(grant.access_token, None),
        })
    }
}

#[derive(Serialize)]
struct Assertion<'a> {
    iss: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
    aud: &'a str,
    iat: i64,
    exp: i64,
    #[serde(flatten)]
    extra: &'a HashMap<String, String>,
}

impl Assertion<'_> {
    fn sign(&self, pem: &str) -> Result<String> {
        let key = EncodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| Error::JwtGeneration {
            message: format!("private key is not an RSA PEM: {e}"),
        })?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), self, &key).map_err(|e| {
            Error::JwtGeneration {
                message: format!("signing assertion for {}: {e}", self.iss),
            }
        })
    }
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}
