//! Platform identity assertion parsing.
//!
//! The hosting platform's front door injects a base64-encoded JSON claims
//! bundle into every authenticated request. Claims arrive duck-typed; they are
//! validated eagerly into a closed `{typ, val}` shape at this boundary and
//! rejected on any malformation rather than inspected optimistically later.

use axum::http::HeaderMap;
use base64ct::{Base64, Encoding};
use serde::Deserialize;
use serde_json::json;

use super::events::{log_security_event, Severity};
use super::AuthError;

/// Header carrying the platform-verified claims bundle. Read-only input;
/// never set by this service.
pub const IDENTITY_HEADER: &str = "x-client-principal";

/// Headers associated with host-override and request-smuggling attempts.
/// Their presence is logged, never acted on.
const SUSPICIOUS_HEADERS: &[&str] = &[
    "x-forwarded-host",
    "x-host",
    "x-original-url",
    "x-rewrite-url",
    "x-override-url",
];

const MAX_CLAIM_TYPE_LEN: usize = 100;
const MAX_CLAIM_VALUE_LEN: usize = 500;

const ROLE_CLAIM_TYPES: &[&str] = &[
    "role",
    "roles",
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/role",
];

const SUBJECT_CLAIM_TYPES: &[&str] = &[
    "http://schemas.microsoft.com/identity/claims/objectidentifier",
    "oid",
    "sub",
];

const DISPLAY_CLAIM_TYPES: &[&str] = &["preferred_username", "name", "upn", "email"];

/// A single validated identity claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub typ: String,
    pub val: String,
}

/// Canonical claim set extracted from the platform header.
#[derive(Debug, Clone)]
pub struct IdentityAssertion {
    pub subject: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub identity_provider: String,
}

#[derive(Deserialize)]
struct RawPrincipal {
    claims: Option<serde_json::Value>,
    #[serde(rename = "identityProvider")]
    identity_provider: Option<String>,
}

/// Warn about headers known to be used for origin spoofing. Detection only:
/// the request is never blocked on this.
pub fn warn_suspicious_headers(headers: &HeaderMap, client_ip: Option<&str>) {
    for name in SUSPICIOUS_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            log_security_event(
                "suspicious_header",
                Severity::Warning,
                json!({
                    "header": name,
                    "value": value,
                    "clientIp": client_ip,
                }),
            );
        }
    }
}

/// Parse the platform identity header into a canonical claim set.
///
/// # Errors
///
/// - `NotAuthenticated` when the header is absent.
/// - `InvalidFormat` for bad base64, bad JSON, or a missing `claims` array.
/// - `InvalidClaimFormat` when any claim lacks a string `typ`/`val` or
///   exceeds the length bounds.
/// - `IncompleteIdentity` when no subject claim is present.
pub fn parse_identity_header(headers: &HeaderMap) -> Result<IdentityAssertion, AuthError> {
    let raw = headers
        .get(IDENTITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::NotAuthenticated)?;

    let decoded = Base64::decode_vec(raw.trim()).map_err(|_| AuthError::InvalidFormat)?;
    let principal: RawPrincipal =
        serde_json::from_slice(&decoded).map_err(|_| AuthError::InvalidFormat)?;

    let Some(serde_json::Value::Array(raw_claims)) = principal.claims else {
        return Err(AuthError::InvalidFormat);
    };

    let claims = validate_claims(&raw_claims)?;

    let subject = first_claim(&claims, SUBJECT_CLAIM_TYPES)
        .ok_or(AuthError::IncompleteIdentity)?
        .to_string();

    let display_name = first_claim(&claims, DISPLAY_CLAIM_TYPES)
        .unwrap_or("User")
        .to_string();

    let roles = claims
        .iter()
        .filter(|claim| ROLE_CLAIM_TYPES.contains(&claim.typ.as_str()))
        .map(|claim| claim.val.clone())
        .collect();

    Ok(IdentityAssertion {
        subject,
        display_name,
        roles,
        identity_provider: principal
            .identity_provider
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Validate each raw claim into the closed `{typ, val}` shape, failing closed
/// on missing fields, non-string values, or out-of-bound lengths.
fn validate_claims(raw_claims: &[serde_json::Value]) -> Result<Vec<Claim>, AuthError> {
    let mut claims = Vec::with_capacity(raw_claims.len());
    for raw in raw_claims {
        let typ = raw
            .get("typ")
            .and_then(serde_json::Value::as_str)
            .ok_or(AuthError::InvalidClaimFormat)?;
        let val = raw
            .get("val")
            .and_then(serde_json::Value::as_str)
            .ok_or(AuthError::InvalidClaimFormat)?;

        if typ.is_empty()
            || val.is_empty()
            || typ.len() > MAX_CLAIM_TYPE_LEN
            || val.len() > MAX_CLAIM_VALUE_LEN
        {
            return Err(AuthError::InvalidClaimFormat);
        }

        claims.push(Claim {
            typ: typ.to_string(),
            val: val.to_string(),
        });
    }
    Ok(claims)
}

fn first_claim<'a>(claims: &'a [Claim], types: &[&str]) -> Option<&'a str> {
    types.iter().find_map(|wanted| {
        claims
            .iter()
            .find(|claim| claim.typ == *wanted)
            .map(|claim| claim.val.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn header_with(principal: &serde_json::Value) -> HeaderMap {
        let encoded = Base64::encode_string(principal.to_string().as_bytes());
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, HeaderValue::from_str(&encoded).unwrap());
        headers
    }

    fn claim(typ: &str, val: &str) -> serde_json::Value {
        json!({"typ": typ, "val": val})
    }

    #[test]
    fn missing_header_is_not_authenticated() {
        let headers = HeaderMap::new();
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::NotAuthenticated
        );
    }

    #[test]
    fn malformed_base64_fails_closed() {
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, HeaderValue::from_static("!!not-base64!!"));
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::InvalidFormat
        );
    }

    #[test]
    fn malformed_json_fails_closed() {
        let encoded = Base64::encode_string(b"{not json");
        let mut headers = HeaderMap::new();
        headers.insert(IDENTITY_HEADER, HeaderValue::from_str(&encoded).unwrap());
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::InvalidFormat
        );
    }

    #[test]
    fn missing_claims_array_is_invalid() {
        let headers = header_with(&json!({"identityProvider": "aad"}));
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::InvalidFormat
        );
    }

    #[test]
    fn non_string_claim_value_is_invalid() {
        let headers = header_with(&json!({
            "claims": [{"typ": "sub", "val": 42}]
        }));
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::InvalidClaimFormat
        );
    }

    #[test]
    fn oversized_claim_is_invalid() {
        let headers = header_with(&json!({
            "claims": [claim("sub", &"x".repeat(501))]
        }));
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::InvalidClaimFormat
        );
    }

    #[test]
    fn missing_subject_is_incomplete() {
        let headers = header_with(&json!({
            "claims": [claim("name", "Alice"), claim("roles", "admin")]
        }));
        assert_eq!(
            parse_identity_header(&headers).unwrap_err(),
            AuthError::IncompleteIdentity
        );
    }

    #[test]
    fn subject_precedence_prefers_object_identifier() {
        let headers = header_with(&json!({
            "claims": [
                claim("sub", "from-sub"),
                claim(
                    "http://schemas.microsoft.com/identity/claims/objectidentifier",
                    "from-oid-uri"
                ),
            ]
        }));
        let assertion = parse_identity_header(&headers).unwrap();
        assert_eq!(assertion.subject, "from-oid-uri");
    }

    #[test]
    fn extracts_roles_from_all_role_claim_types() {
        let headers = header_with(&json!({
            "claims": [
                claim("sub", "user-1"),
                claim("role", "admin"),
                claim("roles", "scoreboard.read"),
                claim(
                    "http://schemas.microsoft.com/ws/2008/06/identity/claims/role",
                    "auditor"
                ),
                claim("email", "alice@example.com"),
            ]
        }));
        let assertion = parse_identity_header(&headers).unwrap();
        assert_eq!(assertion.roles, vec!["admin", "scoreboard.read", "auditor"]);
        assert_eq!(assertion.display_name, "alice@example.com");
    }

    #[test]
    fn display_name_defaults_when_absent() {
        let headers = header_with(&json!({
            "claims": [claim("sub", "user-1")]
        }));
        let assertion = parse_identity_header(&headers).unwrap();
        assert_eq!(assertion.display_name, "User");
        assert_eq!(assertion.identity_provider, "unknown");
    }

    #[test]
    fn parser_never_panics_on_garbage() {
        for garbage in ["", "A", "====", "eyJ9", "%%%"] {
            let mut headers = HeaderMap::new();
            headers.insert(IDENTITY_HEADER, HeaderValue::from_str(garbage).unwrap());
            assert!(parse_identity_header(&headers).is_err());
        }
    }
}
