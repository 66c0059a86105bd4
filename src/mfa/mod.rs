//! Multi-factor verification: TOTP, SMS and email one-time codes, and
//! single-use backup codes.

mod backup;
mod dispatch;
mod models;
mod repo;
mod service;
mod totp;

pub use backup::{
    hash_backup_code, normalize_backup_code, verify_backup_code, BackupCodeBatch,
    BACKUP_CODE_COUNT,
};
pub use dispatch::{generate_numeric_code, CodeSender, LogCodeSender};
pub use models::{BackupCode, ConfigRecord, ConfigState, MfaMethod, VerificationAttempt};
pub use repo::{MemoryMfaRepo, MfaRepo, PgMfaRepo};
pub use service::{ChallengeInfo, FactorSetup, MfaContext, MfaService, MfaSettings, VerifyOutcome};
pub use totp::TotpEnrollment;
