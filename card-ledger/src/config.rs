//! Runtime configuration
//!
//! Secrets are injected at startup, from the environment or by the embedding
//! application; there are no compiled-in fallbacks. Both keys are immutable
//! for the life of the process.

use base64::{engine::general_purpose, Engine as _};
use chrono::Duration;
use thiserror::Error;

/// `JWT_SECRET` — HMAC key for bearer tokens (required).
pub const ENV_JWT_SECRET: &str = "JWT_SECRET";
/// `PAN_ENCRYPTION_KEY` — base64-encoded 32-byte AES key (required).
pub const ENV_PAN_KEY: &str = "PAN_ENCRYPTION_KEY";
/// `TOKEN_TTL_SECS` — token lifetime override (optional).
pub const ENV_TOKEN_TTL: &str = "TOKEN_TTL_SECS";

/// Default bearer-token lifetime: 15 minutes.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 900;

/// Configuration failures are startup failures, not operation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Immutable application configuration.
pub struct AppConfig {
    /// Signing key for bearer tokens.
    pub jwt_secret: String,
    /// Bearer-token lifetime.
    pub token_ttl: Duration,
    /// AES-256 key sealing card numbers at rest.
    pub pan_key: [u8; 32],
}

impl AppConfig {
    pub fn new(jwt_secret: impl Into<String>, pan_key: [u8; 32]) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            pan_key,
        }
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Load from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret =
            std::env::var(ENV_JWT_SECRET).map_err(|_| ConfigError::Missing(ENV_JWT_SECRET))?;
        if jwt_secret.is_empty() {
            return Err(ConfigError::Invalid(
                ENV_JWT_SECRET,
                "must not be empty".to_string(),
            ));
        }

        let pan_key_b64 =
            std::env::var(ENV_PAN_KEY).map_err(|_| ConfigError::Missing(ENV_PAN_KEY))?;
        let pan_key = decode_key(&pan_key_b64)?;

        let token_ttl = match std::env::var(ENV_TOKEN_TTL) {
            Ok(raw) => {
                let secs: i64 = raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid(ENV_TOKEN_TTL, raw.clone()))?;
                if secs <= 0 {
                    return Err(ConfigError::Invalid(ENV_TOKEN_TTL, raw));
                }
                Duration::seconds(secs)
            }
            Err(_) => Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
        };

        Ok(Self {
            jwt_secret,
            token_ttl,
            pan_key,
        })
    }
}

fn decode_key(encoded: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| ConfigError::Invalid(ENV_PAN_KEY, "not valid base64".to_string()))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        ConfigError::Invalid(ENV_PAN_KEY, format!("expected 32 key bytes, got {len}"))
    })
}
