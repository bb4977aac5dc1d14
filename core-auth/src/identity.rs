//! Display-only identity derived from the access token.
//!
//! The access token is a JWT whose payload carries the user id in `sub`. The
//! payload is decoded **without verifying the signature**; the result is only
//! used to show who is signed in. Authorization decisions belong to the
//! service.

use crate::types::AccessToken;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims read from an unverified JWT payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnverifiedClaims {
    #[serde(default, deserialize_with = "deserialize_subject")]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    /// `access` or `refresh`
    #[serde(default, rename = "type")]
    pub token_type: Option<String>,
}

// `sub` is a string per RFC 7519 but some issuers emit integers.
fn deserialize_subject<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Decode the payload segment of a JWT. Returns `None` for anything that is
/// not a three-segment token with a base64url JSON payload.
pub fn decode_unverified_claims(token: &str) -> Option<UnverifiedClaims> {
    let mut segments = token.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Who the UI should show as signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub authenticated: bool,
    /// Token subject; `None` when the token could not be decoded.
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserIdentity {
    /// Build the identity for a stored access token. A token that cannot be
    /// decoded still yields an authenticated identity with no user id.
    pub fn from_credentials(token: &AccessToken, email: Option<String>) -> Self {
        match decode_unverified_claims(token.as_str()) {
            Some(claims) => Self {
                authenticated: true,
                user_id: claims.sub,
                email,
                expires_at: claims.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
            },
            None => {
                debug!("Access token payload is not decodable, identity unknown");
                Self::unknown(email)
            }
        }
    }

    /// Authenticated, identity unknown.
    pub fn unknown(email: Option<String>) -> Self {
        Self {
            authenticated: true,
            user_id: None,
            email,
            expires_at: None,
        }
    }

    /// Label for the signed-in user: email, then user id, then a placeholder.
    pub fn display_name(&self) -> &str {
        self.email
            .as_deref()
            .or(self.user_id.as_deref())
            .unwrap_or("Signed in")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: &str) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(payload)
        )
    }

    #[test]
    fn test_decodes_subject_and_expiry() {
        let token = AccessToken::new(jwt(r#"{"sub":"42","exp":1700000000,"type":"access"}"#));
        let identity = UserIdentity::from_credentials(&token, Some("alice@example.com".into()));

        assert!(identity.authenticated);
        assert_eq!(identity.user_id.as_deref(), Some("42"));
        assert_eq!(identity.expires_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(identity.display_name(), "alice@example.com");
    }

    #[test]
    fn test_numeric_subject() {
        let claims = decode_unverified_claims(&jwt(r#"{"sub":7}"#)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("7"));
        assert_eq!(claims.token_type, None);
    }

    #[test]
    fn test_malformed_token_falls_back_to_unknown() {
        for raw in ["not-a-jwt", "a.b", "a.%%%.c", "a.b.c.d", ""] {
            let identity = UserIdentity::from_credentials(&AccessToken::new(raw), None);
            assert_eq!(identity, UserIdentity::unknown(None), "token {:?}", raw);
        }

        let not_json = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        let identity = UserIdentity::from_credentials(&AccessToken::new(not_json), None);
        assert!(identity.authenticated);
        assert_eq!(identity.user_id, None);
        assert_eq!(identity.display_name(), "Signed in");
    }

    #[test]
    fn test_padded_payload_is_accepted() {
        let payload = format!("{}==", URL_SAFE_NO_PAD.encode(r#"{"sub":"9"}"#));
        let claims = decode_unverified_claims(&format!("h.{}.s", payload)).unwrap();
        assert_eq!(claims.sub.as_deref(), Some("9"));
    }
}
