//! Signed bearer tokens
//!
//! Tokens are HS256 JWTs over (subject, role, issued-at, expiry). Verification
//! needs nothing but the signing key, which keeps authentication stateless;
//! there is no server-side session or revocation list.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Error, Result};
use crate::models::users::Role;

/// JWT claims structure.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// Caller role
    pub role: Role,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expiration time (unix seconds)
    pub exp: i64,
}

/// The verified identity a token proves: what the gate and the services see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub subject: String,
    pub role: Role,
}

/// Issues and verifies bearer tokens.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    validation: Validation,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // No leeway: a token presented at or after exp is expired
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            validation,
        }
    }

    /// Issue a token for `subject` with the configured TTL.
    pub fn issue(&self, subject: &str, role: Role) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("token encoding failed: {e}")))
    }

    /// Verify signature and expiry, returning the decoded identity.
    pub fn verify(&self, token: &str) -> std::result::Result<AuthClaims, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            }
        })?;
        Ok(AuthClaims {
            subject: data.claims.sub,
            role: data.claims.role,
        })
    }

    /// [`TokenService::verify`] plus a subject check.
    pub fn validate(
        &self,
        token: &str,
        expected_subject: &str,
    ) -> std::result::Result<AuthClaims, AuthError> {
        let claims = self.verify(token)?;
        if claims.subject != expected_subject {
            return Err(AuthError::SubjectMismatch);
        }
        Ok(claims)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
