//! Configuration types for the relay service
//!
//! Every section carries serde defaults, so an empty source set yields a
//! config that only lacks the secrets. [`ServiceConfig::validate`] rejects
//! anything the listeners could not run with.

use crate::errors::ConfigError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use twitch_relay_core::identity::{
    IdentityClientConfig, TWITCH_AUTHORIZE_URL, TWITCH_TOKEN_URL, TWITCH_VALIDATE_URL,
};
use twitch_relay_core::SharedSecret;

/// Prefix for environment overrides, e.g. `RELAY__SERVER__PORT=9090`.
pub const ENV_PREFIX: &str = "RELAY";

/// EventSub accepts secrets between 10 and 100 characters.
const SECRET_MIN_LEN: usize = 10;
const SECRET_MAX_LEN: usize = 100;

/// Service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Webhook / login HTTP listener
    pub server: ServerConfig,

    /// EventSub callback settings
    pub webhooks: WebhookConfig,

    /// Real-time subscriber listener
    pub subscribers: SubscriberConfig,

    /// OAuth login settings
    pub oauth: OAuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum request body in bytes; larger bodies get 413
    pub max_body_size: usize,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Serve `/metrics`
    pub enable_metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 1024 * 1024,
            shutdown_timeout_seconds: 30,
            enable_metrics: false,
        }
    }
}

/// EventSub callback configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Callback path registered with EventSub
    pub endpoint_path: String,

    /// Secret EventSub signs deliveries with
    pub secret: SharedSecret,

    /// Subscription types broadcast to subscribers
    pub forwarded_subscription_types: Vec<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/twitch/callback".to_string(),
            secret: SharedSecret::new(String::new()),
            forwarded_subscription_types: vec!["channel.follow".to_string()],
        }
    }
}

/// Subscriber (WebSocket) listener configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub host: String,
    pub port: u16,

    /// Password subscribers authenticate with
    pub password: SharedSecret,

    /// Per-connection outbound queue length
    pub outbound_capacity: usize,

    /// Certificate and key; plain WebSocket when absent
    pub tls: Option<TlsConfig>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            password: SharedSecret::new(String::new()),
            outbound_capacity: 64,
            tls: None,
        }
    }
}

/// PEM files for the subscriber listener
#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// OAuth login configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: SharedSecret,

    /// User id the login must resolve to
    pub expected_user_id: String,

    pub authorize_url: String,
    pub token_url: String,
    pub validate_url: String,
    pub scopes: Vec<String>,

    /// Externally visible base URL, e.g. `https://relay.example.com`.
    /// Defaults to `http://<Host header>`.
    pub public_base_url: Option<String>,

    pub request_timeout_seconds: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: SharedSecret::new(String::new()),
            expected_user_id: String::new(),
            authorize_url: TWITCH_AUTHORIZE_URL.to_string(),
            token_url: TWITCH_TOKEN_URL.to_string(),
            validate_url: TWITCH_VALIDATE_URL.to_string(),
            scopes: vec!["moderator:read:followers".to_string()],
            public_base_url: None,
            request_timeout_seconds: 10,
        }
    }
}

impl OAuthConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Settings for the identity client.
    pub fn identity_client_config(&self) -> IdentityClientConfig {
        let mut config = IdentityClientConfig::new(&self.client_id, self.client_secret.clone())
            .with_scopes(self.scopes.iter().cloned())
            .with_timeout(self.request_timeout());
        config.authorize_url = self.authorize_url.clone();
        config.token_url = self.token_url.clone();
        config.validate_url = self.validate_url.clone();
        config
    }
}

impl ServiceConfig {
    /// Load configuration from the layered sources.
    ///
    /// Sources, later overriding earlier:
    ///  1. `/etc/twitch-relay/relay.yaml` (optional)
    ///  2. `./config/relay.yaml` (optional)
    ///  3. `explicit_path` (required when given)
    ///  4. `RELAY__<SECTION>__<KEY>` environment variables
    ///
    /// The result is not validated; call [`ServiceConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source is unreadable or a value has
    /// the wrong type.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/twitch-relay/relay")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/relay")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the configuration is complete and consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an absent required value and
    /// [`ConfigError::Invalid`] for a value out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.webhooks.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.endpoint_path must start with '/': '{}'",
                    self.webhooks.endpoint_path
                ),
            });
        }
        if self.webhooks.endpoint_path == "/login" || self.webhooks.endpoint_path == "/metrics" {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.endpoint_path '{}' collides with a built-in route",
                    self.webhooks.endpoint_path
                ),
            });
        }

        if self.webhooks.secret.is_empty() {
            return Err(ConfigError::Missing {
                key: "webhooks.secret".to_string(),
            });
        }
        let secret_len = self.webhooks.secret.len();
        if !(SECRET_MIN_LEN..=SECRET_MAX_LEN).contains(&secret_len) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.secret must be {}-{} characters, got {}",
                    SECRET_MIN_LEN, SECRET_MAX_LEN, secret_len
                ),
            });
        }

        if self.subscribers.password.is_empty() {
            return Err(ConfigError::Missing {
                key: "subscribers.password".to_string(),
            });
        }

        for (key, value) in [
            ("oauth.client_id", self.oauth.client_id.as_str()),
            ("oauth.client_secret", self.oauth.client_secret.expose()),
            ("oauth.expected_user_id", self.oauth.expected_user_id.as_str()),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Missing {
                    key: key.to_string(),
                });
            }
        }

        if let Some(base) = &self.oauth.public_base_url {
            url::Url::parse(base).map_err(|e| ConfigError::Invalid {
                message: format!("oauth.public_base_url '{}': {}", base, e),
            })?;
        }

        if self.server.max_body_size == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_body_size must be greater than zero".to_string(),
            });
        }
        if self.subscribers.outbound_capacity == 0 {
            return Err(ConfigError::Invalid {
                message: "subscribers.outbound_capacity must be greater than zero".to_string(),
            });
        }
        if self.oauth.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "oauth.request_timeout_seconds must be greater than zero".to_string(),
            });
        }

        self.server_addr()?;
        self.subscriber_addr()?;

        Ok(())
    }

    /// Socket address of the webhook listener.
    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("server", &self.server.host, self.server.port)
    }

    /// Socket address of the subscriber listener.
    pub fn subscriber_addr(&self) -> Result<SocketAddr, ConfigError> {
        parse_addr("subscribers", &self.subscribers.host, self.subscribers.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_seconds)
    }
}

fn parse_addr(section: &str, host: &str, port: u16) -> Result<SocketAddr, ConfigError> {
    format!("{}:{}", host, port)
        .parse()
        .map_err(|e| ConfigError::Invalid {
            message: format!("{}.host '{}' is not an IP address: {}", section, host, e),
        })
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
