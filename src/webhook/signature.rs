use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Computes the base64 HMAC-SHA256 digest the vendor attaches to
/// deliveries: over `timestamp + "." + body` when a timestamp is present,
/// over the raw body otherwise.
pub fn sign(secret: &str, body: &[u8], timestamp: Option<&str>) -> String {
    // Hmac accepts keys of any length; the error arm is unreachable.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    if let Some(ts) = timestamp {
        mac.update(ts.as_bytes());
        mac.update(b".");
    }
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}

/// Accepts either digest construction, against one secret, in constant
/// time.
pub fn verify(secret: &str, body: &[u8], timestamp: Option<&str>, provided_b64: &str) -> bool {
    let Ok(provided) = BASE64.decode(provided_b64.trim()) else {
        return false;
    };

    let mut candidates = vec![sign(secret, body, None)];
    if timestamp.is_some() {
        candidates.push(sign(secret, body, timestamp));
    }

    candidates.iter().any(|candidate| {
        BASE64
            .decode(candidate)
            .map(|bytes| bool::from(bytes.as_slice().ct_eq(provided.as_slice())))
            .unwrap_or(false)
    })
}

/// Pulls the signature out of either header form:
/// `X-LS-Signature: <base64>` or
/// `X-Signature: signature=<base64>, algorithm=HMAC-SHA256`.
pub fn extract_signature(
    ls_signature: Option<&str>,
    x_signature: Option<&str>,
) -> Option<String> {
    if let Some(raw) = ls_signature {
        let raw = raw.trim();
        if !raw.is_empty() {
            return Some(raw.to_string());
        }
    }

    let raw = x_signature?.trim();
    for part in raw.split(',') {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("signature=") {
            let value = value.trim_matches('"').trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
