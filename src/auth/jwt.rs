//! Best-effort JWT claim inspection.
//!
//! Tokens found in tab storage are usually JWTs; the `exp` claim bounds
//! how long they may be cached. Anything that does not decode is simply
//! not a JWT and falls back to the fixed TTL.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;

/// Extract the `exp` claim (Unix seconds) from a JWT, if the token is one.
pub fn decode_exp(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    match claims.get("exp")? {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        _ => None,
    }
}
