pub mod admin;
pub mod health;
pub mod login;
pub mod twofa;

use regex::Regex;
use sqlx::PgPool;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::auth::{AuthenticatedPrincipal, CredentialSource};
use crate::totp::{repo, UserAuthRecord};

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern compiles"));

/// Permissive shape check; deliverability is not our problem.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    let email = email.trim();
    !email.is_empty() && email.len() <= 254 && EMAIL_PATTERN.is_match(email)
}

/// Resolve the stored account behind a request-scoped principal. Token
/// principals carry the account UUID; platform principals carry the external
/// subject identifier.
pub(crate) async fn resolve_account(
    pool: &PgPool,
    principal: &AuthenticatedPrincipal,
) -> Result<UserAuthRecord, ApiError> {
    let record = match principal.source {
        CredentialSource::SessionToken => {
            let user_id = Uuid::parse_str(principal.user_id.trim())
                .map_err(|_| ApiError::Unauthorized)?;
            repo::get_user(pool, user_id).await?
        }
        CredentialSource::PlatformIdentity => {
            repo::get_user_by_external_id(pool, &principal.user_id).await?
        }
    };
    record.ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(valid_email("alice@example.com"));
        assert!(valid_email("  alice@example.com  "));
        assert!(!valid_email("alice"));
        assert!(!valid_email("alice@"));
        assert!(!valid_email("@example.com"));
        assert!(!valid_email("alice@example"));
        assert!(!valid_email(""));
        assert!(!valid_email(&format!("{}@example.com", "a".repeat(300))));
    }
}
