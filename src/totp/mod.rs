//! Second-factor (TOTP) lifecycle: secret provisioning, activation,
//! login-time validation, disablement, and one-time recovery codes.

pub mod models;
pub mod recovery;
pub mod repo;
pub mod service;

pub use models::{AccountStatus, TwoFactorState, UserAuthRecord};
pub use service::{TotpError, TotpManager};
