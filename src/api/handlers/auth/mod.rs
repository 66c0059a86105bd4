//! Authentication route handlers.

pub mod login;
pub mod logout;
pub mod mfa;
pub mod refresh;
pub mod state;
pub mod types;
pub mod users;
pub mod validate;

pub use state::{AuthState, PendingLogin};
pub use users::{MemoryUserRepo, PgUserRepo, UserRecord, UserRepo};
