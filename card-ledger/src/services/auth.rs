//! Registration, login, and token verification

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::token::AuthClaims;
use crate::error::{AuthError, Error, Result};
use crate::models::users::{Role, User};
use crate::state::AppState;

/// Authentication entry points.
pub struct AuthService {
    state: Arc<AppState>,
}

impl AuthService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Register a new user. Usernames are unique and case-sensitive.
    pub fn register(&self, username: &str, password: &str, role: Role) -> Result<User> {
        if username.trim().is_empty() {
            return Err(Error::Validation("username must not be empty".to_string()));
        }
        if password.is_empty() {
            return Err(Error::Validation("password must not be empty".to_string()));
        }

        let password_hash = self.state.passwords.hash(password)?;
        let user = self
            .state
            .users
            .insert(User::new(username, password_hash, role))?;
        info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    /// Check credentials and issue a bearer token.
    ///
    /// Unknown usernames and wrong passwords fail identically, so callers
    /// cannot probe which usernames exist.
    pub fn login(&self, username: &str, password: &str) -> Result<String> {
        let user = self
            .state
            .users
            .get_by_username(username)?
            .ok_or(Error::Auth(AuthError::InvalidCredentials))?;

        if !self.state.passwords.verify(password, &user.password_hash)? {
            warn!(%username, "login rejected");
            return Err(AuthError::InvalidCredentials.into());
        }

        self.state.token_service.issue(&user.username, user.role)
    }

    /// Verify a raw token and return the identity it proves.
    pub fn authenticate(&self, token: &str) -> Result<AuthClaims> {
        Ok(self.state.token_service.verify(token)?)
    }

    /// Verify an `Authorization` header value of the form `Bearer <token>`.
    pub fn authenticate_bearer(&self, header: &str) -> Result<AuthClaims> {
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(Error::Auth(AuthError::MissingToken))?;
        self.authenticate(token)
    }
}
