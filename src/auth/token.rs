//! Self-issued session tokens.
//!
//! A session token is a signed, time-boxed claim bundle carried in the
//! `auth_token` cookie. The embedded role is never trusted for privileged
//! operations beyond the token TTL without corroboration against the
//! database (see [`crate::auth::roles`]).

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AuthError;

pub const SESSION_COOKIE_NAME: &str = "auth_token";

/// Token and cookie lifetime. Kept at or below one hour so the embedded role
/// claim stays short-lived.
pub const SESSION_TTL_SECONDS: i64 = 3600;

/// Signed claim bundle: self-contained, verified offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// User id as a UUID string.
    pub sub: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a new session token for the user.
///
/// # Errors
/// Returns `InvalidToken` only if serialization of the claims fails, which
/// indicates a bug rather than caller error.
pub fn issue(
    secret: &SecretString,
    user_id: Uuid,
    email: &str,
    role: &str,
) -> Result<String, AuthError> {
    let now = Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role: Some(role.to_string()),
        iat: now,
        exp: now + SESSION_TTL_SECONDS,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|_| AuthError::InvalidToken)
}

/// Verify signature and expiry, yielding the embedded claims.
///
/// # Errors
/// `ExpiredToken` on expiry, `InvalidToken` on any other defect. Callers at
/// the HTTP boundary must collapse both into the same generic 401.
pub fn verify(secret: &SecretString, token: &str) -> Result<SessionClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
        _ => AuthError::InvalidToken,
    })
}

/// Build the `Set-Cookie` value for a freshly issued session token.
pub fn session_cookie(token: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={SESSION_TTL_SECONDS}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Pull the raw session token out of the cookie header, if present.
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}
