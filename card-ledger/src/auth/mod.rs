//! Authentication and authorization

pub mod gate;
pub mod password;
pub mod token;

pub use gate::{authorize, ensure_owner, required_for, Action, Requirement};
pub use password::{BcryptVerifier, PasswordVerifier};
pub use token::{AuthClaims, Claims, TokenService};
