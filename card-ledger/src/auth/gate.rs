//! Authorization gate
//!
//! A static table maps each operation to the role it requires. Role checks
//! are exact: an ADMIN does not implicitly satisfy a USER-gated action.
//! Ownership checks are a second layer on top, applied per operation where
//! the caller must own the touched resource. Every decision is a pure
//! function of the caller's claims and the requested action; the gate holds
//! no state.

use tracing::warn;
use uuid::Uuid;

use crate::auth::token::AuthClaims;
use crate::error::{Error, Result};
use crate::models::users::Role;

/// Operations the gate knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateCard,
    BlockCard,
    ActivateCard,
    ListAllCards,
    ListUsers,
    DeleteUser,
    RequestBlock,
    Deposit,
    Transfer,
    ListOwnCards,
    ListUserCards,
    GetUser,
    GetBalance,
    DeleteCard,
}

/// What an action demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Any verified identity suffices.
    Authenticated,
    /// The caller must hold exactly this role.
    Role(Role),
}

/// The static action → requirement table.
pub fn required_for(action: Action) -> Requirement {
    match action {
        Action::CreateCard
        | Action::BlockCard
        | Action::ActivateCard
        | Action::ListAllCards
        | Action::ListUsers
        | Action::DeleteUser => Requirement::Role(Role::Admin),

        Action::RequestBlock
        | Action::Deposit
        | Action::Transfer
        | Action::ListOwnCards => Requirement::Role(Role::User),

        Action::ListUserCards | Action::GetUser | Action::GetBalance | Action::DeleteCard => {
            Requirement::Authenticated
        }
    }
}

/// Check the caller's role against the table.
pub fn authorize(claims: &AuthClaims, action: Action) -> Result<()> {
    match required_for(action) {
        Requirement::Authenticated => Ok(()),
        Requirement::Role(required) if claims.role == required => Ok(()),
        Requirement::Role(required) => {
            warn!(
                subject = %claims.subject,
                role = %claims.role,
                ?action,
                "authorization denied"
            );
            Err(Error::Forbidden(format!(
                "{action:?} requires role {required}"
            )))
        }
    }
}

/// Ownership check layered above the role check.
pub fn ensure_owner(caller_id: Uuid, owner_id: Uuid, what: &str) -> Result<()> {
    if caller_id == owner_id {
        Ok(())
    } else {
        Err(Error::Forbidden(format!("{what} belongs to another user")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role) -> AuthClaims {
        AuthClaims {
            subject: "someone".to_string(),
            role,
        }
    }

    #[test]
    fn admin_actions_require_admin() {
        for action in [
            Action::CreateCard,
            Action::BlockCard,
            Action::ActivateCard,
            Action::ListAllCards,
            Action::ListUsers,
            Action::DeleteUser,
        ] {
            assert!(authorize(&claims(Role::Admin), action).is_ok());
            assert!(matches!(
                authorize(&claims(Role::User), action),
                Err(Error::Forbidden(_))
            ));
        }
    }

    #[test]
    fn user_actions_require_exactly_the_user_role() {
        for action in [
            Action::RequestBlock,
            Action::Deposit,
            Action::Transfer,
            Action::ListOwnCards,
        ] {
            assert!(authorize(&claims(Role::User), action).is_ok());
            // Admins do not implicitly hold the USER role
            assert!(matches!(
                authorize(&claims(Role::Admin), action),
                Err(Error::Forbidden(_))
            ));
        }
    }

    #[test]
    fn remaining_actions_accept_any_authenticated_identity() {
        for action in [
            Action::ListUserCards,
            Action::GetUser,
            Action::GetBalance,
            Action::DeleteCard,
        ] {
            assert!(authorize(&claims(Role::User), action).is_ok());
            assert!(authorize(&claims(Role::Admin), action).is_ok());
        }
    }

    #[test]
    fn ownership_mismatch_is_forbidden() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(ensure_owner(a, a, "card").is_ok());
        assert!(matches!(
            ensure_owner(a, b, "card"),
            Err(Error::Forbidden(_))
        ));
    }
}
