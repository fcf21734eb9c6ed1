//! Service tokens.
//!
//! The orchestrator authenticates to capability servers with a short-lived
//! HMAC-SHA256 signed token minted at process start (or per request in
//! hardened deployments).  The token identifies the orchestrator as the
//! caller, distinct from the original end user whose identity travels in
//! the RBAC context instead.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Claim set carried by a service token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTokenClaims {
    /// Issuing service name (e.g. `"orchestrator"`).
    pub iss: String,
    /// Subject; same as the issuer for service-to-service tokens.
    pub sub: String,
    /// Issued-at, seconds since the epoch.
    pub iat: i64,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Mint a compact HS256 token for `service`, valid for `ttl_secs` seconds.
#[must_use]
pub fn mint_service_token(service: &str, secret: &[u8], ttl_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = ServiceTokenClaims {
        iss: service.to_owned(),
        sub: service.to_owned(),
        iat: now,
        exp: now + ttl_secs,
    };

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&claims).expect("service token claims always serialize"),
    );
    let signing_input = format!("{header}.{payload}");

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let signature = hmac::sign(&key, signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(signature.as_ref());

    format!("{signing_input}.{signature}")
}

/// Verify an HS256 service token and return its claims.
///
/// # Errors
///
/// Returns [`AuthError::InvalidServiceToken`] on structural or signature
/// problems and [`AuthError::ServiceTokenExpired`] when `exp` has passed.
pub fn verify_service_token(token: &str, secret: &[u8]) -> Result<ServiceTokenClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    let [header, payload, signature] = parts.as_slice() else {
        return Err(AuthError::InvalidServiceToken {
            reason: "expected three dot-separated segments".into(),
        });
    };

    let signing_input = format!("{header}.{payload}");
    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|e| AuthError::InvalidServiceToken {
            reason: format!("signature segment is not base64url: {e}"),
        })?;

    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, signing_input.as_bytes(), &signature).map_err(|_| {
        AuthError::InvalidServiceToken {
            reason: "signature mismatch".into(),
        }
    })?;

    let payload = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::InvalidServiceToken {
            reason: format!("payload segment is not base64url: {e}"),
        })?;
    let claims: ServiceTokenClaims = serde_json::from_slice(&payload)?;

    if claims.exp <= Utc::now().timestamp() {
        return Err(AuthError::ServiceTokenExpired {
            expired_at: claims.exp,
        });
    }

    Ok(claims)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-key-material";

    #[test]
    fn mint_and_verify() {
        let token = mint_service_token("orchestrator", SECRET, 60);
        let claims = verify_service_token(&token, SECRET).unwrap();
        assert_eq!(claims.iss, "orchestrator");
        assert_eq!(claims.sub, "orchestrator");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint_service_token("orchestrator", SECRET, 60);
        let err = verify_service_token(&token, b"different-secret").unwrap_err();
        assert!(matches!(err, AuthError::InvalidServiceToken { .. }));
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = mint_service_token("orchestrator", SECRET, -10);
        let err = verify_service_token(&token, SECRET).unwrap_err();
        assert!(matches!(err, AuthError::ServiceTokenExpired { .. }));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = mint_service_token("orchestrator", SECRET, 60);
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            br#"{"iss":"intruder","sub":"intruder","iat":0,"exp":99999999999}"#,
        );
        parts[1] = &forged;
        let forged_token = parts.join(".");

        let err = verify_service_token(&forged_token, SECRET).unwrap_err();
        assert!(matches!(err, AuthError::InvalidServiceToken { .. }));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let err = verify_service_token("only-one-segment", SECRET).unwrap_err();
        assert!(matches!(err, AuthError::InvalidServiceToken { .. }));
    }
}
