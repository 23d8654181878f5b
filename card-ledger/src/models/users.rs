//! User accounts and the user store

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Closed role enumeration.
///
/// Serialized as `"USER"` / `"ADMIN"`, which is also the form carried in
/// token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "USER"),
            Role::Admin => write!(f, "ADMIN"),
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            other => Err(Error::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Registered identity. The password hash is opaque to the core; it is
/// produced and checked by the `PasswordVerifier` capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, password_hash: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            password_hash,
            role,
            created_at: Utc::now(),
        }
    }
}

/// User store trait for data access.
///
/// Usernames are unique and case-sensitive.
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with `Conflict` if the username is taken.
    fn insert(&self, user: User) -> Result<User>;

    /// Get user by id.
    fn get(&self, user_id: Uuid) -> Result<Option<User>>;

    /// Get user by username (exact match).
    fn get_by_username(&self, username: &str) -> Result<Option<User>>;

    /// List all users.
    fn list(&self) -> Result<Vec<User>>;

    /// Delete a user. Fails with `NotFound` if absent.
    fn delete(&self, user_id: Uuid) -> Result<()>;
}

#[derive(Default)]
struct UserTables {
    users: HashMap<Uuid, User>,
    by_username: HashMap<String, Uuid>,
}

/// In-memory user store implementation.
#[derive(Default)]
pub struct InMemoryUserStore {
    tables: RwLock<UserTables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> Error {
        Error::Internal("user store lock poisoned".to_string())
    }
}

impl UserStore for InMemoryUserStore {
    fn insert(&self, user: User) -> Result<User> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        if tables.by_username.contains_key(&user.username) {
            return Err(Error::Conflict(format!(
                "username {} is already taken",
                user.username
            )));
        }
        tables.by_username.insert(user.username.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn get(&self, user_id: Uuid) -> Result<Option<User>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables.users.get(&user_id).cloned())
    }

    fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        Ok(tables
            .by_username
            .get(username)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    fn list(&self) -> Result<Vec<User>> {
        let tables = self.tables.read().map_err(|_| Self::poisoned())?;
        let mut users: Vec<User> = tables.users.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    fn delete(&self, user_id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Self::poisoned())?;
        let user = tables
            .users
            .remove(&user_id)
            .ok_or_else(|| Error::not_found("user", user_id))?;
        tables.by_username.remove(&user.username);
        Ok(())
    }
}
