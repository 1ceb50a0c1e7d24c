//! TOTP manager: the account-facing second-factor state machine.
//!
//! States per account: `NoSecondFactor -> PendingActivation -> Active ->
//! NoSecondFactor`. The pending secret is held in a separate column and is
//! never authoritative until the holder proves possession with a valid code.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::anyhow;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};
use uuid::Uuid;

use crate::auth::events::{log_security_event, Severity};
use crate::auth::ClientInfo;

use super::models::TwoFactorState;
use super::recovery::{match_entry, RecoveryCodeSet};
use super::repo;

const TOTP_DIGITS: usize = 6;
const TOTP_STEP_SECONDS: u64 = 30;
/// Accept the previous and next time step to absorb clock drift.
const TOTP_SKEW_STEPS: u8 = 1;

#[derive(Debug, Error)]
pub enum TotpError {
    #[error("user not found")]
    UserNotFound,
    #[error("second factor already enabled")]
    AlreadyEnabled,
    #[error("no pending second-factor setup")]
    NoPendingSetup,
    #[error("no active second factor")]
    NoActiveSecondFactor,
    #[error("invalid verification code")]
    InvalidCode,
    #[error("second-factor disable requires a code or elevated authorization")]
    DisableNotAuthorized,
    #[error("dependency failure")]
    Dependency(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Returned once from setup; the secret is never shown again.
#[derive(Debug)]
pub struct SetupOutcome {
    pub secret_base32: String,
    pub provisioning_uri: String,
    pub qr_code_url: String,
}

/// Returned once from activation with the only plaintext copy of the codes.
#[derive(Debug)]
pub struct ActivationOutcome {
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactorMethod {
    Totp,
    RecoveryCode,
}

#[derive(Debug)]
pub struct ValidationOutcome {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub method: SecondFactorMethod,
}

#[derive(Clone)]
pub struct TotpManager {
    pool: PgPool,
    issuer: String,
}

impl TotpManager {
    #[must_use]
    pub fn new(pool: PgPool, issuer: String) -> Self {
        Self { pool, issuer }
    }

    /// Begin provisioning: generate a fresh secret and QR payload, persisting
    /// the secret only to the temporary field.
    ///
    /// # Errors
    /// `UserNotFound` for unknown accounts, `AlreadyEnabled` when the factor
    /// is active, `Dependency` on storage failure.
    pub async fn setup(&self, user_id: Uuid, email: &str) -> Result<SetupOutcome, TotpError> {
        let user = repo::get_user(&self.pool, user_id)
            .await?
            .ok_or(TotpError::UserNotFound)?;

        if user.two_factor_state() == TwoFactorState::Active {
            return Err(TotpError::AlreadyEnabled);
        }

        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("secret generation failed: {e:?}"))?;
        let totp = self.build_totp(secret_bytes, email)?;

        let secret_base32 = totp.get_secret_base32();
        repo::set_temp_secret(&self.pool, user_id, &secret_base32).await?;

        let provisioning_uri = totp.get_url();
        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow!("QR generation failed: {e}"))?;

        log_security_event(
            "second_factor_setup_started",
            Severity::Info,
            json!({"userId": user_id, "email": user.email}),
        );

        Ok(SetupOutcome {
            secret_base32,
            provisioning_uri,
            qr_code_url: format!("data:image/png;base64,{qr}"),
        })
    }

    /// Activate: verify the first code against the pending secret, promote it
    /// to permanent, and issue the one-time recovery codes.
    ///
    /// # Errors
    /// `NoPendingSetup` when no temporary secret exists, `InvalidCode` when
    /// the code does not match (no state change).
    pub async fn activate(&self, user_id: Uuid, code: &str) -> Result<ActivationOutcome, TotpError> {
        let user = repo::get_user(&self.pool, user_id)
            .await?
            .ok_or(TotpError::NoPendingSetup)?;

        let Some(temp_secret) = user.second_factor_temp_secret.as_deref() else {
            return Err(TotpError::NoPendingSetup);
        };

        if !check_code(temp_secret, code, unix_now()) {
            log_security_event(
                "second_factor_activation_failed",
                Severity::Warning,
                json!({"userId": user_id}),
            );
            return Err(TotpError::InvalidCode);
        }

        let recovery = RecoveryCodeSet::generate();
        repo::promote_secret(&self.pool, user_id, temp_secret, &recovery.entries).await?;

        log_security_event(
            "second_factor_activated",
            Severity::Info,
            json!({"userId": user_id, "email": user.email}),
        );

        Ok(ActivationOutcome {
            recovery_codes: recovery.codes,
        })
    }

    /// Login-time validation: a candidate code satisfies the factor either as
    /// an unused recovery code (consumed atomically) or as a live TOTP code.
    ///
    /// Both checks run unconditionally before the decision so response
    /// latency does not reveal whether a recovery code existed.
    ///
    /// # Errors
    /// `NoActiveSecondFactor` when the factor is not enabled, `InvalidCode`
    /// otherwise on mismatch or a lost consumption race.
    pub async fn validate(
        &self,
        user_id: Uuid,
        code: &str,
        client: &ClientInfo,
    ) -> Result<ValidationOutcome, TotpError> {
        let user = repo::get_user(&self.pool, user_id)
            .await?
            .ok_or(TotpError::NoActiveSecondFactor)?;

        let Some(secret) = user
            .second_factor_secret
            .as_deref()
            .filter(|_| user.second_factor_enabled)
        else {
            return Err(TotpError::NoActiveSecondFactor);
        };

        let recovery_hit = match_entry(code, &user.recovery_code_entries);
        let totp_ok = check_code(secret, code, unix_now());

        if let Some(entry) = recovery_hit {
            if repo::consume_recovery_entry(&self.pool, user_id, entry).await? {
                log_security_event(
                    "recovery_code_consumed",
                    Severity::Warning,
                    json!({
                        "userId": user_id,
                        "remaining": user.recovery_code_entries.len().saturating_sub(1),
                        "clientIp": client.ip,
                    }),
                );
                return Ok(ValidationOutcome {
                    user_id: user.id,
                    email: user.email,
                    role: user.role,
                    method: SecondFactorMethod::RecoveryCode,
                });
            }
            // Lost the consumption race: the code was already spent.
            log_security_event(
                "recovery_code_replayed",
                Severity::Critical,
                json!({"userId": user_id, "clientIp": client.ip}),
            );
            return Err(TotpError::InvalidCode);
        }

        if totp_ok {
            return Ok(ValidationOutcome {
                user_id: user.id,
                email: user.email,
                role: user.role,
                method: SecondFactorMethod::Totp,
            });
        }

        log_security_event(
            "second_factor_validation_failed",
            Severity::Warning,
            json!({"userId": user_id, "clientIp": client.ip}),
        );
        Err(TotpError::InvalidCode)
    }

    /// Disable the factor. Requires a valid TOTP or recovery code, or an
    /// admin override established by the caller through the authorization
    /// gate.
    ///
    /// # Errors
    /// `NoActiveSecondFactor` when nothing is enabled, `InvalidCode` for a
    /// bad code, `DisableNotAuthorized` when neither a code nor an override
    /// was supplied.
    pub async fn disable(
        &self,
        user_id: Uuid,
        code: Option<&str>,
        admin_override: bool,
    ) -> Result<(), TotpError> {
        let user = repo::get_user(&self.pool, user_id)
            .await?
            .ok_or(TotpError::NoActiveSecondFactor)?;

        match user.two_factor_state() {
            TwoFactorState::Active => {
                let secret = user
                    .second_factor_secret
                    .as_deref()
                    .ok_or(TotpError::NoActiveSecondFactor)?;
                match code {
                    Some(code) => {
                        let recovery_hit =
                            match_entry(code, &user.recovery_code_entries).is_some();
                        if !recovery_hit && !check_code(secret, code, unix_now()) {
                            return Err(TotpError::InvalidCode);
                        }
                    }
                    None if admin_override => {}
                    None => return Err(TotpError::DisableNotAuthorized),
                }
            }
            // An abandoned setup can be discarded without proof: the pending
            // secret was never authoritative.
            TwoFactorState::PendingActivation => {}
            TwoFactorState::NoSecondFactor => return Err(TotpError::NoActiveSecondFactor),
        }

        repo::clear_second_factor(&self.pool, user_id).await?;

        log_security_event(
            "second_factor_disabled",
            Severity::Warning,
            json!({
                "userId": user_id,
                "email": user.email,
                "adminOverride": admin_override && code.is_none(),
            }),
        );

        Ok(())
    }

    /// Whether the factor is active for the account.
    ///
    /// # Errors
    /// `UserNotFound` for unknown accounts.
    pub async fn status(&self, user_id: Uuid) -> Result<bool, TotpError> {
        let user = repo::get_user(&self.pool, user_id)
            .await?
            .ok_or(TotpError::UserNotFound)?;
        Ok(user.two_factor_state() == TwoFactorState::Active)
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP, TotpError> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| TotpError::Internal(anyhow!("TOTP init failed: {e}")))
    }
}

/// Check a 6-digit code against a base32 secret at an explicit time, with the
/// standard 30-second step and ±1 step tolerance.
#[must_use]
pub fn check_code(secret_base32: &str, code: &str, at: u64) -> bool {
    let Ok(secret_bytes) = Secret::Encoded(secret_base32.to_string()).to_bytes() else {
        return false;
    };
    let Ok(totp) = TOTP::new(
        Algorithm::SHA1,
        TOTP_DIGITS,
        TOTP_SKEW_STEPS,
        TOTP_STEP_SECONDS,
        secret_bytes,
        None,
        String::new(),
    ) else {
        return false;
    };
    totp.check(code, at)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(secret_base32: &str) -> TOTP {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .unwrap();
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            secret_bytes,
            None,
            String::new(),
        )
        .unwrap()
    }

    fn fresh_secret() -> String {
        let secret = Secret::generate_secret();
        let bytes = secret.to_bytes().unwrap();
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW_STEPS,
            TOTP_STEP_SECONDS,
            bytes,
            None,
            String::new(),
        )
        .unwrap()
        .get_secret_base32()
    }

    #[test]
    fn accepts_adjacent_time_steps_only() {
        let secret = fresh_secret();
        let totp = generator(&secret);
        // Mid-step verifier clock so step boundaries are unambiguous.
        let now = 1_700_000_015u64;

        for (offset, expected) in [
            (-2i64, false),
            (-1, true),
            (0, true),
            (1, true),
            (2, false),
        ] {
            let code_time = now
                .checked_add_signed(offset * TOTP_STEP_SECONDS as i64)
                .unwrap();
            let code = totp.generate(code_time);
            assert_eq!(
                check_code(&secret, &code, now),
                expected,
                "code from step offset {offset}"
            );
        }
    }

    #[test]
    fn rejects_wrong_code() {
        let secret = fresh_secret();
        assert!(!check_code(&secret, "000000", 1_700_000_015));
        assert!(!check_code(&secret, "12345", 1_700_000_015));
        assert!(!check_code(&secret, "not-a-code", 1_700_000_015));
    }

    #[test]
    fn rejects_garbage_secret_without_panicking() {
        assert!(!check_code("not base32 at all!!", "123456", 1_700_000_015));
    }

    #[test]
    fn generated_secret_has_enough_entropy() {
        // Base32 expands 5 bytes into 8 characters; 20 bytes of secret is 32.
        let secret = fresh_secret();
        assert!(secret.len() >= 32);
    }
}
