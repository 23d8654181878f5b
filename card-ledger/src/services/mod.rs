//! Transport-agnostic service facades
//!
//! Each method verifies the caller's claims against the authorization gate
//! before touching the ledger engine, and maps entities to views that never
//! expose a plaintext PAN or a password hash.

pub mod auth;
pub mod cards;
pub mod users;

pub use auth::AuthService;
pub use cards::{CardService, CardView};
pub use users::{UserService, UserView};
