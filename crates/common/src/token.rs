//! HMAC-SHA256 session tokens.
//!
//! A token is `base64url(payload) + "." + base64url(signature)`, unpadded.
//! `payload` is the canonical JSON encoding of [`Claims`]. Validation never
//! short-circuits on the signature bytes so a single-bit flip takes the same
//! time to reject as a completely wrong token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Default validity for a minted session token.
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub session_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A validated token's claims, returned by [`TokenService::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone, Copy)]
pub enum TokenError {
    #[error("token is blank")]
    Blank,
    #[error("token is malformed")]
    Malformed,
    #[error("token is not valid base64")]
    BadBase64,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token payload could not be parsed")]
    BadPayload,
}

/// Mints and validates HMAC-signed, session-scoped bearer tokens.
#[derive(Debug)]
pub struct TokenService {
    secret: Vec<u8>,
}

impl TokenService {
    /// Construct a service from a master secret. Rejects a blank secret.
    pub fn new(secret: impl Into<String>) -> Result<Self, TokenError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(TokenError::Blank);
        }
        Ok(Self {
            secret: secret.into_bytes(),
        })
    }

    pub fn mint(&self, session_id: &str, validity: Duration) -> String {
        let now = Utc::now();
        let expires = now + chrono::Duration::from_std(validity).unwrap_or(chrono::Duration::zero());
        let claims = Claims {
            session_id: session_id.to_string(),
            issued_at: now.timestamp_millis(),
            expires_at: expires.timestamp_millis(),
        };
        let payload = serde_json::to_vec(&claims).expect("claims always serialize");
        let sig = self.sign(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    pub fn validate(&self, token: &str) -> Result<SessionToken, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Blank);
        }
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if payload_b64.is_empty() || sig_b64.is_empty() || sig_b64.contains('.') {
            return Err(TokenError::Malformed);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenError::BadBase64)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::BadBase64)?;

        let expected = self.sign(&payload);
        if !constant_time_eq(&expected, &sig) {
            return Err(TokenError::BadSignature);
        }

        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| TokenError::BadPayload)?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(claims.expires_at)
            .ok_or(TokenError::BadPayload)?;
        let issued_at = DateTime::<Utc>::from_timestamp_millis(claims.issued_at)
            .ok_or(TokenError::BadPayload)?;

        if Utc::now() > expires_at {
            return Err(TokenError::Expired);
        }

        Ok(SessionToken {
            session_id: claims.session_id,
            issued_at,
            expires_at,
        })
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Constant-time byte comparison: always walks the full length of `a`,
/// never returning early on the first mismatching byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
