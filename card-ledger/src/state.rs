//! Application state
//!
//! One immutable context, established at startup, shared by every service:
//! the token service, the PAN cipher, the stores, and the password verifier.
//! Nothing in here changes after construction; concurrent workers share it
//! behind an `Arc`.

use std::sync::Arc;

use crate::auth::password::{BcryptVerifier, PasswordVerifier};
use crate::auth::token::TokenService;
use crate::config::AppConfig;
use crate::crypto::PanCipher;
use crate::models::cards::{CardStore, InMemoryCardStore};
use crate::models::users::{InMemoryUserStore, UserStore};

/// Shared application state.
pub struct AppState {
    pub token_service: TokenService,
    pub pan_cipher: PanCipher,
    pub users: Arc<dyn UserStore>,
    pub cards: Arc<dyn CardStore>,
    pub passwords: Arc<dyn PasswordVerifier>,
}

impl AppState {
    /// In-memory stores and bcrypt hashing; the default wiring.
    pub fn new(config: AppConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(InMemoryUserStore::new()),
            Arc::new(InMemoryCardStore::new()),
            Arc::new(BcryptVerifier::new()),
        )
    }

    /// Custom stores and password capability, e.g. a database-backed
    /// repository or a cheaper hash in tests.
    pub fn with_collaborators(
        config: AppConfig,
        users: Arc<dyn UserStore>,
        cards: Arc<dyn CardStore>,
        passwords: Arc<dyn PasswordVerifier>,
    ) -> Self {
        Self {
            token_service: TokenService::new(&config.jwt_secret, config.token_ttl),
            pan_cipher: PanCipher::new(&config.pan_key),
            users,
            cards,
            passwords,
        }
    }
}
