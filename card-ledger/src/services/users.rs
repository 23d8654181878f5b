//! User administration behind the authorization gate

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::gate::{authorize, Action};
use crate::auth::token::AuthClaims;
use crate::error::{Error, Result};
use crate::models::users::{Role, User};
use crate::state::AppState;

/// What a caller sees of a user; never the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserView {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// User service facade.
pub struct UserService {
    state: Arc<AppState>,
}

impl UserService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// ADMIN: all registered users.
    pub fn list_users(&self, claims: &AuthClaims) -> Result<Vec<UserView>> {
        authorize(claims, Action::ListUsers)?;
        Ok(self.state.users.list()?.iter().map(UserView::from).collect())
    }

    /// Fetch one user by id.
    pub fn get_user(&self, claims: &AuthClaims, user_id: Uuid) -> Result<UserView> {
        authorize(claims, Action::GetUser)?;
        self.state
            .users
            .get(user_id)?
            .as_ref()
            .map(UserView::from)
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    /// ADMIN: delete a user. Refused while the user still owns cards, so no
    /// card row is ever orphaned.
    pub fn delete_user(&self, claims: &AuthClaims, user_id: Uuid) -> Result<()> {
        authorize(claims, Action::DeleteUser)?;
        let owned = self.state.cards.count_by_owner(user_id)?;
        if owned > 0 {
            return Err(Error::Conflict(format!(
                "user still owns {owned} cards; delete them first"
            )));
        }
        self.state.users.delete(user_id)?;
        info!(user_id = %user_id, "user deleted");
        Ok(())
    }
}
