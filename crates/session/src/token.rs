// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session token issuance/validation (§4.2, §6): an HMAC-SHA256-signed
//! `{sid, wid, tenant, iat, exp}` payload, transported as two base64url
//! segments joined by a dot.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::SessionError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPayload {
    pub sid: String,
    pub wid: String,
    pub tenant: String,
    pub iat: u64,
    pub exp: u64,
}

fn sign(secret: &[u8], payload_bytes: &[u8]) -> Vec<u8> {
    // HMAC construction is infallible for any key length per the `hmac` crate's contract.
    #[allow(clippy::expect_used)]
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload_bytes);
    mac.finalize().into_bytes().to_vec()
}

/// Constant-time comparison, so a forged-token timing attack can't binary
/// search the signature byte by byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

pub fn issue(secret: &[u8], session_id: &str, worker_instance_id: &str, tenant: &str, ttl_seconds: u64, now: u64) -> (String, u64) {
    let exp = now + ttl_seconds;
    let payload = TokenPayload {
        sid: session_id.to_string(),
        wid: worker_instance_id.to_string(),
        tenant: tenant.to_string(),
        iat: now,
        exp,
    };
    // serde_json with sorted keys isn't guaranteed by default, but the
    // struct's field order is fixed and serde_json preserves declaration
    // order, which is sufficient for our own issue/validate round trip.
    // `TokenPayload` has no fallible field types, so serialization cannot fail.
    #[allow(clippy::expect_used)]
    let payload_bytes = serde_json::to_vec(&payload).expect("TokenPayload always serializes");
    let sig = sign(secret, &payload_bytes);
    let token = format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload_bytes), URL_SAFE_NO_PAD.encode(&sig));
    (token, exp)
}

pub fn validate(
    token: &str,
    secret: &[u8],
    session_id: &str,
    worker_instance_id: &str,
    tenant: &str,
    now: u64,
) -> Result<TokenPayload, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::InvalidToken)?;
    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| SessionError::InvalidToken)?;
    let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| SessionError::InvalidToken)?;

    let expected_sig = sign(secret, &payload_bytes);
    if !constant_time_eq(&sig, &expected_sig) {
        return Err(SessionError::InvalidToken);
    }

    let payload: TokenPayload =
        serde_json::from_slice(&payload_bytes).map_err(|_| SessionError::InvalidToken)?;

    if payload.sid != session_id || payload.wid != worker_instance_id || payload.tenant != tenant {
        return Err(SessionError::InvalidToken);
    }
    if payload.exp < now {
        return Err(SessionError::InvalidToken);
    }
    Ok(payload)
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
