//! HMAC-SHA384 request signing for Buda.com.
//!
//! Signature message: `"{METHOD} {path} {base64(body)} {nonce}"`, the
//! body segment omitted for body-less requests. Nonce is the current
//! time in microseconds.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha384;

type HmacSha384 = Hmac<Sha384>;

/// Microsecond-timestamp nonce.
pub fn generate_nonce() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    micros.to_string()
}

/// Hex-encoded HMAC-SHA384 signature over the canonical message.
pub fn sign_request(
    api_secret: &str,
    method: &str,
    path: &str,
    nonce: &str,
    body: Option<&str>,
) -> String {
    let message = match body {
        Some(body) => format!("{method} {path} {} {nonce}", BASE64.encode(body)),
        None => format!("{method} {path} {nonce}"),
    };
    // HMAC accepts keys of any length.
    let mut mac = HmacSha384::new_from_slice(api_secret.as_bytes())
        .expect("HMAC key of any length is valid");
    mac.update(message.as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";
    const NONCE: &str = "1700000000000000";

    #[test]
    fn test_signature_with_body_matches_reference() {
        // Reference vector produced with the documented algorithm.
        let sig = sign_request(
            SECRET,
            "POST",
            "/api/v2/markets/btc-clp/orders",
            NONCE,
            Some(r#"{"order":{"type":"Bid"}}"#),
        );
        assert_eq!(
            sig,
            "433dc427e8b30c5d936fac753ae14853e85dc1a06401cccb062808483fae7cb6b99fe39c44971cb82f7b748d6411300c"
        );
    }

    #[test]
    fn test_signature_without_body_matches_reference() {
        let sig = sign_request(SECRET, "GET", "/api/v2/balances/clp", NONCE, None);
        assert_eq!(
            sig,
            "34a394e880fe9ca08f0be80b70c4290a2e4cd9bb495601411b2b452791dfba9faf06f8acad180fafb8cd96d09687d65e"
        );
    }

    #[test]
    fn test_body_changes_signature() {
        let a = sign_request(SECRET, "POST", "/p", NONCE, Some("a"));
        let b = sign_request(SECRET, "POST", "/p", NONCE, Some("b"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_nonce_is_monotonic_enough() {
        let a: u128 = generate_nonce().parse().unwrap();
        let b: u128 = generate_nonce().parse().unwrap();
        assert!(b >= a);
    }
}
