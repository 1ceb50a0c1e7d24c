//! Authenticated principal construction and the credential dispatcher.
//!
//! Credential strategies are tried in a fixed priority order: session token
//! first, then the platform identity header. A strategy that is present but
//! defective records a security event and falls through to the next; if no
//! strategy authenticates, the caller sees one generic failure.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use serde_json::json;

use super::claims::{parse_identity_header, warn_suspicious_headers, IdentityAssertion};
use super::events::{log_security_event, Severity};
use super::token::{self, SessionClaims};
use super::AuthError;

const MAX_USER_AGENT_LEN: usize = 500;

/// Which credential mechanism produced the principal. Used for audit logging
/// and for choosing the role-resolver fallback lookup key, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    SessionToken,
    PlatformIdentity,
}

impl CredentialSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionToken => "session-token",
            Self::PlatformIdentity => "platform-identity",
        }
    }
}

/// Client network details captured once per request for audit.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Extract client IP and user agent from common proxy headers.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let ip = forwarded.or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        });
        let user_agent = headers
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .map(|value| {
                let mut value = value.to_string();
                value.truncate(MAX_USER_AGENT_LEN);
                value
            });
        Self { ip, user_agent }
    }
}

/// Request-scoped identity, rebuilt on every request and never persisted.
/// Shape-compatible across credential sources.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    /// Stable identifier: UUID string for token principals, platform subject
    /// claim otherwise.
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub auth_timestamp: DateTime<Utc>,
    pub source: CredentialSource,
    /// Full role/claim set as asserted by the credential.
    pub roles: Vec<String>,
    /// Raw role claim embedded in a session token, if any.
    pub embedded_role: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Opaque per-request nonce for downstream CSRF correlation.
    pub request_nonce: String,
}

impl AuthenticatedPrincipal {
    /// Build a principal from verified session-token claims. Pure aside from
    /// reading the clock and the nonce RNG.
    #[must_use]
    pub fn from_session(claims: SessionClaims, client: ClientInfo) -> Self {
        let roles = claims.role.iter().cloned().collect();
        Self {
            user_id: claims.sub,
            email: Some(claims.email),
            display_name: "User".to_string(),
            auth_timestamp: Utc::now(),
            source: CredentialSource::SessionToken,
            roles,
            embedded_role: claims.role,
            client_ip: client.ip,
            user_agent: client.user_agent,
            request_nonce: request_nonce(),
        }
    }

    /// Build a principal from a parsed platform identity assertion.
    #[must_use]
    pub fn from_assertion(assertion: IdentityAssertion, client: ClientInfo) -> Self {
        Self {
            user_id: assertion.subject,
            email: None,
            display_name: assertion.display_name,
            auth_timestamp: Utc::now(),
            source: CredentialSource::PlatformIdentity,
            roles: assertion.roles,
            embedded_role: None,
            client_ip: client.ip,
            user_agent: client.user_agent,
            request_nonce: request_nonce(),
        }
    }
}

/// Resolve the caller's identity from whichever credential mechanism is
/// present.
///
/// # Errors
/// Returns `NotAuthenticated` when neither mechanism yields an identity. The
/// per-strategy failure reason is recorded in the security event log only.
pub fn authenticate(
    headers: &HeaderMap,
    token_secret: &SecretString,
) -> Result<AuthenticatedPrincipal, AuthError> {
    let client = ClientInfo::from_headers(headers);
    warn_suspicious_headers(headers, client.ip.as_deref());

    if let Some(raw_token) = token::extract_session_token(headers) {
        match token::verify(token_secret, &raw_token) {
            Ok(claims) => return Ok(AuthenticatedPrincipal::from_session(claims, client)),
            Err(err) => {
                log_security_event(
                    "session_token_rejected",
                    Severity::Warning,
                    json!({
                        "reason": err.to_string(),
                        "clientIp": client.ip,
                    }),
                );
                // Fall through to the platform header.
            }
        }
    }

    match parse_identity_header(headers) {
        Ok(assertion) => Ok(AuthenticatedPrincipal::from_assertion(assertion, client)),
        Err(AuthError::NotAuthenticated) => Err(AuthError::NotAuthenticated),
        Err(err) => {
            log_security_event(
                "identity_header_rejected",
                Severity::Warning,
                json!({
                    "reason": err.to_string(),
                    "clientIp": client.ip,
                }),
            );
            Err(AuthError::NotAuthenticated)
        }
    }
}

fn request_nonce() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::{issue, SESSION_COOKIE_NAME};
    use axum::http::header::COOKIE;
    use axum::http::HeaderValue;
    use base64ct::{Base64, Encoding};
    use uuid::Uuid;

    fn secret() -> SecretString {
        SecretString::from("dispatcher-secret".to_string())
    }

    #[test]
    fn client_info_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn user_agent_is_bounded() {
        let mut headers = HeaderMap::new();
        let long_ua = "a".repeat(600);
        headers.insert("user-agent", HeaderValue::from_str(&long_ua).unwrap());
        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.user_agent.map(|ua| ua.len()), Some(500));
    }

    #[test]
    fn session_token_wins_over_platform_header() {
        let token = issue(&secret(), Uuid::new_v4(), "a@b.com", "user").unwrap();
        let principal_json = serde_json::json!({
            "claims": [{"typ": "sub", "val": "platform-subject"}]
        });
        let encoded = Base64::encode_string(principal_json.to_string().as_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={token}")).unwrap(),
        );
        headers.insert(
            super::super::claims::IDENTITY_HEADER,
            HeaderValue::from_str(&encoded).unwrap(),
        );

        let principal = authenticate(&headers, &secret()).unwrap();
        assert_eq!(principal.source, CredentialSource::SessionToken);
        assert_eq!(principal.email.as_deref(), Some("a@b.com"));
    }

    #[test]
    fn invalid_token_falls_through_to_platform_header() {
        let principal_json = serde_json::json!({
            "claims": [{"typ": "sub", "val": "platform-subject"}]
        });
        let encoded = Base64::encode_string(principal_json.to_string().as_bytes());

        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}=bogus")).unwrap(),
        );
        headers.insert(
            super::super::claims::IDENTITY_HEADER,
            HeaderValue::from_str(&encoded).unwrap(),
        );

        let principal = authenticate(&headers, &secret()).unwrap();
        assert_eq!(principal.source, CredentialSource::PlatformIdentity);
        assert_eq!(principal.user_id, "platform-subject");
    }

    #[test]
    fn no_credentials_is_not_authenticated() {
        let headers = HeaderMap::new();
        assert_eq!(
            authenticate(&headers, &secret()).unwrap_err(),
            AuthError::NotAuthenticated
        );
    }

    #[test]
    fn malformed_header_never_panics() {
        let mut headers = HeaderMap::new();
        headers.insert(
            super::super::claims::IDENTITY_HEADER,
            HeaderValue::from_static("@@@"),
        );
        assert!(authenticate(&headers, &secret()).is_err());
    }

    #[test]
    fn nonces_are_unique_per_principal() {
        let token = issue(&secret(), Uuid::new_v4(), "a@b.com", "user").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE_NAME}={token}")).unwrap(),
        );
        let first = authenticate(&headers, &secret()).unwrap();
        let second = authenticate(&headers, &secret()).unwrap();
        assert_ne!(first.request_nonce, second.request_nonce);
        assert_eq!(first.request_nonce.len(), 32);
    }
}
