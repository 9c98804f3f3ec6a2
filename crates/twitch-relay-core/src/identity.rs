//! OAuth authorization-code exchange and token validation.
//!
//! The relay logs in exactly one account: the login endpoint redirects the
//! operator to the identity service, exchanges the returned code for an
//! access token, validates the token and compares the resulting user id with
//! the configured one. [`IdentityProvider`] is the seam the HTTP layer talks
//! to; [`TwitchIdentityClient`] is the production implementation.

use crate::SharedSecret;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Twitch authorization endpoint.
pub const TWITCH_AUTHORIZE_URL: &str = "https://id.twitch.tv/oauth2/authorize";

/// Twitch token endpoint.
pub const TWITCH_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Twitch token validation endpoint.
pub const TWITCH_VALIDATE_URL: &str = "https://id.twitch.tv/oauth2/validate";

// ============================================================================
// Types
// ============================================================================

/// An OAuth access token. Wiped on drop and never shown by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw token for an `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<REDACTED>)")
    }
}

/// Identity behind a validated access token.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidatedIdentity {
    pub user_id: String,
    pub login: String,
    pub client_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Errors talking to the identity service.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity client configuration error: {message}")]
    Configuration { message: String },

    #[error("Identity service request timed out")]
    Timeout,

    #[error("Identity service request failed: {message}")]
    Network { message: String },

    #[error("Identity service returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Invalid identity service response: {message}")]
    InvalidResponse { message: String },
}

impl IdentityError {
    fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Network {
                message: error.to_string(),
            }
        }
    }
}

/// OAuth identity service used by the login endpoint.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL the user is redirected to in order to grant access.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] if the authorize URL is invalid.
    fn authorization_url(&self, redirect_uri: &str) -> Result<String, IdentityError>;

    /// Exchange an authorization code for an access token.
    ///
    /// `redirect_uri` must equal the one used to obtain the code.
    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AccessToken, IdentityError>;

    /// Look up the identity an access token belongs to.
    async fn validate_token(&self, token: &AccessToken) -> Result<ValidatedIdentity, IdentityError>;
}

// ============================================================================
// Twitch client
// ============================================================================

/// Settings for [`TwitchIdentityClient`].
#[derive(Debug, Clone)]
pub struct IdentityClientConfig {
    pub client_id: String,
    pub client_secret: SharedSecret,
    pub authorize_url: String,
    pub token_url: String,
    pub validate_url: String,
    pub scopes: Vec<String>,
    pub timeout: Duration,
}

impl IdentityClientConfig {
    /// Config pointing at the Twitch endpoints with a 10 second timeout.
    pub fn new(client_id: impl Into<String>, client_secret: SharedSecret) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            authorize_url: TWITCH_AUTHORIZE_URL.to_string(),
            token_url: TWITCH_TOKEN_URL.to_string(),
            validate_url: TWITCH_VALIDATE_URL.to_string(),
            scopes: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Point all three endpoints at `base`, e.g. a mock server.
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.authorize_url = format!("{}/oauth2/authorize", base);
        self.token_url = format!("{}/oauth2/token", base);
        self.validate_url = format!("{}/oauth2/validate", base);
        self
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// [`IdentityProvider`] backed by the Twitch OAuth endpoints.
#[derive(Debug, Clone)]
pub struct TwitchIdentityClient {
    http_client: reqwest::Client,
    config: IdentityClientConfig,
}

impl TwitchIdentityClient {
    /// Build a client whose requests are bounded by `config.timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Configuration`] if the HTTP client cannot be
    /// constructed or the authorize URL does not parse.
    pub fn new(config: IdentityClientConfig) -> Result<Self, IdentityError> {
        Url::parse(&config.authorize_url).map_err(|e| IdentityError::Configuration {
            message: format!("invalid authorize URL '{}': {}", config.authorize_url, e),
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IdentityError::Configuration {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            config,
        })
    }

    async fn error_from_response(response: reqwest::Response) -> IdentityError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error body".to_string());
        IdentityError::Provider { status, body }
    }
}

#[async_trait]
impl IdentityProvider for TwitchIdentityClient {
    fn authorization_url(&self, redirect_uri: &str) -> Result<String, IdentityError> {
        let mut url =
            Url::parse(&self.config.authorize_url).map_err(|e| IdentityError::Configuration {
                message: format!("invalid authorize URL: {}", e),
            })?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", redirect_uri)
                .append_pair("response_type", "code");
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
        }

        Ok(url.to_string())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<AccessToken, IdentityError> {
        debug!(token_url = %self.config.token_url, "Exchanging authorization code");

        let response = self
            .http_client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(IdentityError::from_reqwest)?;

        if !response.status().is_success() {
            let error = Self::error_from_response(response).await;
            warn!(error = %error, "Authorization code exchange rejected");
            return Err(error);
        }

        let token: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| IdentityError::InvalidResponse {
                    message: format!("token response: {}", e),
                })?;

        Ok(AccessToken(token.access_token))
    }

    async fn validate_token(&self, token: &AccessToken) -> Result<ValidatedIdentity, IdentityError> {
        let response = self
            .http_client
            .get(&self.config.validate_url)
            .header("Authorization", format!("OAuth {}", token.secret()))
            .send()
            .await
            .map_err(IdentityError::from_reqwest)?;

        if !response.status().is_success() {
            let error = Self::error_from_response(response).await;
            warn!(error = %error, "Token validation rejected");
            return Err(error);
        }

        response
            .json::<ValidatedIdentity>()
            .await
            .map_err(|e| IdentityError::InvalidResponse {
                message: format!("validate response: {}", e),
            })
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
