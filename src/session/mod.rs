//! Session tracking with device/IP binding and a concurrent-session cap.
//!
//! A session is created on successful authentication, sealed into the cache
//! store, and indexed relationally for the per-user cap. Validation compares
//! the stored device identity against the live request and answers with typed
//! alerts so "expired" and "likely hijacked" never look the same.

mod models;
mod service;
mod store;

pub use models::{device_fingerprint, Session, SessionStatus};
pub use service::{RequestContext, SessionConfig, SessionService};
pub use store::{MemoryIndex, PgSessionIndex, SessionBlobs, SessionIndex};
