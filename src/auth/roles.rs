//! Role resolution and the authorization gate.
//!
//! Gate state machine per request:
//! `Unauthenticated -> (credential parsed) -> Authenticated -> (role check)
//! -> Authorized | Forbidden`. No transition re-enters `Unauthenticated`
//! within one request.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::Instrument;

use super::events::{log_security_event, Severity};
use super::principal::{AuthenticatedPrincipal, CredentialSource};

/// Principals older than this are rejected outright, forcing periodic
/// re-derivation even for otherwise-valid credentials.
pub const MAX_PRINCIPAL_AGE_SECONDS: i64 = 30 * 60;

/// Whether an embedded `admin` role claim is authoritative or must always be
/// corroborated against the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminRolePolicy {
    /// Embedded `admin` short-circuits; anything else falls back to one
    /// database lookup. Embedded roles can only over-claim for at most the
    /// token TTL after a database-side demotion.
    #[default]
    TrustEmbedded,
    /// Always perform the database lookup for admin checks.
    VerifyDb,
}

impl AdminRolePolicy {
    /// Parse the CLI/env spelling.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "trust-embedded" => Some(Self::TrustEmbedded),
            "verify-db" => Some(Self::VerifyDb),
            _ => None,
        }
    }
}

/// A role requirement as named by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleRequirement {
    Admin,
    ScoreboardRead,
    ScoreboardWrite,
    Named(String),
}

impl RoleRequirement {
    #[must_use]
    pub fn parse(role: &str) -> Self {
        match role.to_lowercase().as_str() {
            "admin" => Self::Admin,
            "scoreboard.read" => Self::ScoreboardRead,
            "scoreboard.write" => Self::ScoreboardWrite,
            other => Self::Named(other.to_string()),
        }
    }
}

/// Role resolution failure. A database error is surfaced, never silently
/// treated as "not admin": the gate fails closed but observably.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("dependency failure during role resolution")]
    Dependency(#[from] sqlx::Error),
}

/// Whether the principal is within the stale-principal window.
#[must_use]
pub fn principal_is_fresh(principal: &AuthenticatedPrincipal) -> bool {
    let age = Utc::now().signed_duration_since(principal.auth_timestamp);
    age <= ChronoDuration::seconds(MAX_PRINCIPAL_AGE_SECONDS)
}

/// Case-insensitive membership test against the principal's full claim set.
#[must_use]
pub fn holds_role(principal: &AuthenticatedPrincipal, role: &str) -> bool {
    principal
        .roles
        .iter()
        .any(|held| held.eq_ignore_ascii_case(role))
}

/// Pure admin decision: either the embedded claim settles it, or the database
/// must be consulted. Split out so both policies are testable without a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminDecision {
    Grant,
    Lookup,
}

#[must_use]
pub fn admin_decision(principal: &AuthenticatedPrincipal, policy: AdminRolePolicy) -> AdminDecision {
    if policy == AdminRolePolicy::TrustEmbedded && holds_role(principal, "admin") {
        AdminDecision::Grant
    } else {
        AdminDecision::Lookup
    }
}

/// Decide whether the principal satisfies the requested role.
///
/// Admin checks may perform exactly one database lookup; the lookup key is
/// the platform subject, or the token email when the credential carries only
/// an email. All other roles resolve purely from the claim set.
///
/// # Errors
/// `RoleError::Dependency` when the fallback lookup fails; the caller must
/// deny but report a dependency failure, not a policy denial.
pub async fn require_role(
    pool: &PgPool,
    principal: &AuthenticatedPrincipal,
    requirement: &RoleRequirement,
    policy: AdminRolePolicy,
) -> Result<bool, RoleError> {
    if !principal_is_fresh(principal) {
        log_security_event(
            "stale_principal_rejected",
            Severity::Warning,
            json!({
                "userId": principal.user_id,
                "source": principal.source.as_str(),
            }),
        );
        return Ok(false);
    }

    let granted = match requirement {
        RoleRequirement::Admin => match admin_decision(principal, policy) {
            AdminDecision::Grant => true,
            AdminDecision::Lookup => {
                let stored = lookup_stored_role(pool, principal).await.map_err(|err| {
                    log_security_event(
                        "role_lookup_failed",
                        Severity::Critical,
                        json!({
                            "userId": principal.user_id,
                            "error": err.to_string(),
                        }),
                    );
                    err
                })?;
                stored.is_some_and(|role| role.trim().eq_ignore_ascii_case("admin"))
            }
        },
        // Capability map: admin implies both scoreboard capabilities.
        RoleRequirement::ScoreboardRead => {
            holds_role(principal, "scoreboard.read") || holds_role(principal, "admin")
        }
        RoleRequirement::ScoreboardWrite => {
            holds_role(principal, "scoreboard.write") || holds_role(principal, "admin")
        }
        RoleRequirement::Named(role) => holds_role(principal, role),
    };

    if !granted {
        log_security_event(
            "role_check_denied",
            Severity::Warning,
            json!({
                "userId": principal.user_id,
                "requirement": format!("{requirement:?}"),
                "source": principal.source.as_str(),
            }),
        );
    }

    Ok(granted)
}

/// Single fallback lookup for the stored role. Token principals carry only an
/// email as a stable key; platform principals carry the subject identifier.
async fn lookup_stored_role(
    pool: &PgPool,
    principal: &AuthenticatedPrincipal,
) -> Result<Option<String>, sqlx::Error> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT"
    );
    let row = match principal.source {
        CredentialSource::SessionToken => {
            let Some(email) = principal.email.as_deref() else {
                return Ok(None);
            };
            sqlx::query("SELECT role FROM users WHERE email = $1")
                .bind(email.to_lowercase())
                .fetch_optional(pool)
                .instrument(span)
                .await?
        }
        CredentialSource::PlatformIdentity => {
            sqlx::query("SELECT role FROM users WHERE external_id = $1")
                .bind(&principal.user_id)
                .fetch_optional(pool)
                .instrument(span)
                .await?
        }
    };
    Ok(row.map(|row| row.get::<String, _>("role")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal_with_roles(roles: &[&str]) -> AuthenticatedPrincipal {
        AuthenticatedPrincipal {
            user_id: "subject-1".to_string(),
            email: Some("a@b.com".to_string()),
            display_name: "User".to_string(),
            auth_timestamp: Utc::now(),
            source: CredentialSource::PlatformIdentity,
            roles: roles.iter().map(|r| (*r).to_string()).collect(),
            embedded_role: None,
            client_ip: None,
            user_agent: None,
            request_nonce: "nonce".to_string(),
        }
    }

    #[test]
    fn fresh_principal_within_thirty_minutes() {
        let mut principal = principal_with_roles(&["admin"]);
        assert!(principal_is_fresh(&principal));

        principal.auth_timestamp = Utc::now() - ChronoDuration::seconds(MAX_PRINCIPAL_AGE_SECONDS + 1);
        assert!(!principal_is_fresh(&principal));
    }

    #[test]
    fn role_membership_is_case_insensitive() {
        let principal = principal_with_roles(&["Admin", "Scoreboard.Read"]);
        assert!(holds_role(&principal, "admin"));
        assert!(holds_role(&principal, "ADMIN"));
        assert!(holds_role(&principal, "scoreboard.read"));
        assert!(!holds_role(&principal, "scoreboard.write"));
    }

    #[test]
    fn trust_embedded_grants_on_embedded_admin() {
        let principal = principal_with_roles(&["admin"]);
        assert_eq!(
            admin_decision(&principal, AdminRolePolicy::TrustEmbedded),
            AdminDecision::Grant
        );
    }

    #[test]
    fn trust_embedded_falls_back_without_conclusive_admin() {
        // An embedded `user` role is not conclusive: a stale token could
        // predate a promotion, so the database decides.
        let principal = principal_with_roles(&["user"]);
        assert_eq!(
            admin_decision(&principal, AdminRolePolicy::TrustEmbedded),
            AdminDecision::Lookup
        );
    }

    #[test]
    fn verify_db_always_looks_up() {
        let principal = principal_with_roles(&["admin"]);
        assert_eq!(
            admin_decision(&principal, AdminRolePolicy::VerifyDb),
            AdminDecision::Lookup
        );
    }

    #[test]
    fn policy_parse() {
        assert_eq!(
            AdminRolePolicy::parse("trust-embedded"),
            Some(AdminRolePolicy::TrustEmbedded)
        );
        assert_eq!(
            AdminRolePolicy::parse("VERIFY-DB"),
            Some(AdminRolePolicy::VerifyDb)
        );
        assert_eq!(AdminRolePolicy::parse("other"), None);
    }

    #[test]
    fn requirement_parse_is_case_insensitive() {
        assert_eq!(RoleRequirement::parse("Admin"), RoleRequirement::Admin);
        assert_eq!(
            RoleRequirement::parse("scoreboard.READ"),
            RoleRequirement::ScoreboardRead
        );
        assert_eq!(
            RoleRequirement::parse("auditor"),
            RoleRequirement::Named("auditor".to_string())
        );
    }
}
