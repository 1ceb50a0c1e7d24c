//! Credential parsing, principal construction, and authorization.
//!
//! Two credential mechanisms coexist: a self-issued signed session token
//! carried in a cookie, and a platform-injected identity-claims header. Both
//! resolve to the same [`AuthenticatedPrincipal`] shape; downstream code only
//! branches on the source for audit logging.

pub mod claims;
pub mod events;
pub mod principal;
pub mod rate_limit;
pub mod roles;
pub mod state;
pub mod token;

pub use principal::{authenticate, AuthenticatedPrincipal, ClientInfo, CredentialSource};
pub use state::AuthState;

use thiserror::Error;

/// Credential parse failures.
///
/// `InvalidToken` and `ExpiredToken` are kept distinct for the security event
/// log but must collapse into the same generic 401 at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid session token")]
    InvalidToken,
    #[error("expired session token")]
    ExpiredToken,
    #[error("invalid authentication format")]
    InvalidFormat,
    #[error("invalid claim format")]
    InvalidClaimFormat,
    #[error("incomplete authentication data")]
    IncompleteIdentity,
    #[error("not authenticated")]
    NotAuthenticated,
}
