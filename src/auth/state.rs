//! Shared authentication state wired at server startup.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::rate_limit::{RateLimitDecision, RateLimiter};
use super::roles::AdminRolePolicy;

/// Per-operation rate limit parameters.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: Duration,
}

/// Login attempts per client IP.
pub const LOGIN_RATE_LIMIT: RateLimitRule = RateLimitRule {
    limit: 5,
    window: Duration::from_secs(15 * 60),
};

/// Second-factor operations per client IP.
pub const TWOFA_RATE_LIMIT: RateLimitRule = RateLimitRule {
    limit: 10,
    window: Duration::from_secs(5 * 60),
};

/// Immutable auth configuration plus the injected rate-limit store.
#[derive(Clone)]
pub struct AuthState {
    token_secret: SecretString,
    issuer: String,
    cookie_secure: bool,
    admin_policy: AdminRolePolicy,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        token_secret: SecretString,
        issuer: String,
        cookie_secure: bool,
        admin_policy: AdminRolePolicy,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            token_secret,
            issuer,
            cookie_secure,
            admin_policy,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn token_secret(&self) -> &SecretString {
        &self.token_secret
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    #[must_use]
    pub fn admin_policy(&self) -> AdminRolePolicy {
        self.admin_policy
    }

    /// Check one attempt under `rule` for an operation-scoped key.
    #[must_use]
    pub fn check_rate_limit(&self, key: &str, rule: RateLimitRule) -> RateLimitDecision {
        self.rate_limiter.check(key, rule.limit, rule.window)
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("token_secret", &"***")
            .field("issuer", &self.issuer)
            .field("cookie_secure", &self.cookie_secure)
            .field("admin_policy", &self.admin_policy)
            .finish_non_exhaustive()
    }
}
