//! Signed bearer/refresh credential pairs.
//!
//! An access credential is short-lived (minutes) and checked on every request;
//! a refresh credential is long-lived (days) and single-use: each refresh
//! revokes the presented credential and mints a new pair in the same token
//! family. Reuse of a retired family member is treated as theft.

mod claims;
mod service;

pub use claims::{decode_claims, encode_claims, Claims, TokenKind};
pub use service::{TokenConfig, TokenPair, TokenService};
