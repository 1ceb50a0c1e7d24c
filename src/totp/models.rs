//! Persistence-facing account records for the auth subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use uuid::Uuid;

/// Account status as stored in `users.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Locked,
    PendingSecondFactor,
}

impl AccountStatus {
    /// Parse the persisted `users.status` textual value into a typed enum.
    fn from_db(value: &str) -> Result<Self, sqlx::Error> {
        match value {
            "Active" => Ok(Self::Active),
            "Locked" => Ok(Self::Locked),
            "PendingSecondFactor" => Ok(Self::PendingSecondFactor),
            _ => Err(sqlx::Error::Decode(Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid users.status value: {value}"),
            )))),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Locked => "Locked",
            Self::PendingSecondFactor => "PendingSecondFactor",
        }
    }
}

/// Logical second-factor state, derived from the stored secret fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwoFactorState {
    NoSecondFactor,
    /// A temporary secret exists but has not been verified; it is never
    /// authoritative for login.
    PendingActivation,
    Active,
}

/// One user's authentication row, owned exclusively by the persistence layer
/// and mutated only through the login and second-factor operations.
#[derive(Debug, Clone)]
pub struct UserAuthRecord {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub status: AccountStatus,
    pub second_factor_enabled: bool,
    pub second_factor_secret: Option<String>,
    pub second_factor_temp_secret: Option<String>,
    /// Salted digests, one per unused recovery code.
    pub recovery_code_entries: Vec<String>,
    pub failed_login_attempts: i32,
    pub account_locked: bool,
    pub lockout_until: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserAuthRecord {
    #[must_use]
    pub fn two_factor_state(&self) -> TwoFactorState {
        if self.second_factor_enabled && self.second_factor_secret.is_some() {
            TwoFactorState::Active
        } else if self.second_factor_temp_secret.is_some() {
            TwoFactorState::PendingActivation
        } else {
            TwoFactorState::NoSecondFactor
        }
    }
}

impl<'r> FromRow<'r, PgRow> for UserAuthRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        let codes: Option<serde_json::Value> = row.try_get("second_factor_recovery_codes")?;
        let recovery_code_entries = codes
            .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
            .unwrap_or_default();
        Ok(Self {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: row.try_get("role")?,
            status: AccountStatus::from_db(&status)?,
            second_factor_enabled: row.try_get("second_factor_enabled")?,
            second_factor_secret: row.try_get("second_factor_secret")?,
            second_factor_temp_secret: row.try_get("second_factor_temp_secret")?,
            recovery_code_entries,
            failed_login_attempts: row.try_get("failed_login_attempts")?,
            account_locked: row.try_get("account_locked")?,
            lockout_until: row.try_get("lockout_until")?,
            last_login: row.try_get("last_login")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UserAuthRecord {
        UserAuthRecord {
            id: Uuid::new_v4(),
            external_id: None,
            email: "a@b.com".to_string(),
            password_hash: None,
            role: "user".to_string(),
            status: AccountStatus::Active,
            second_factor_enabled: false,
            second_factor_secret: None,
            second_factor_temp_secret: None,
            recovery_code_entries: Vec::new(),
            failed_login_attempts: 0,
            account_locked: false,
            lockout_until: None,
            last_login: None,
        }
    }

    #[test]
    fn state_derivation() {
        let mut user = record();
        assert_eq!(user.two_factor_state(), TwoFactorState::NoSecondFactor);

        user.second_factor_temp_secret = Some("TEMPSECRET".to_string());
        assert_eq!(user.two_factor_state(), TwoFactorState::PendingActivation);

        user.second_factor_enabled = true;
        user.second_factor_secret = Some("SECRET".to_string());
        user.second_factor_temp_secret = None;
        assert_eq!(user.two_factor_state(), TwoFactorState::Active);
    }

    #[test]
    fn status_round_trip() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Locked,
            AccountStatus::PendingSecondFactor,
        ] {
            assert_eq!(AccountStatus::from_db(status.as_str()).unwrap(), status);
        }
        assert!(AccountStatus::from_db("bogus").is_err());
    }
}
