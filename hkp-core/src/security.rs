//! Integrity tags, canonicalization and request authentication.
//!
//! Implements:
//! - JCS canonicalization (RFC 8785)
//! - Integrity tags: first 12 hex of SHA256(JCS(fields))
//! - Ed25519 signatures over round requests
//! - Replay protection
//!
//! Integrity tags are checksums, not proofs: anyone holding the fields can
//! recompute them.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::error::{HkpError, HkpResult};
use crate::message::RoundRequest;

/// Digest scheme used for tokens, obfuscated values and integrity tags.
pub const DIGEST_ALGORITHM: &str = "sha256/jcs/v1";

/// Length of an integrity tag in hex characters.
pub const INTEGRITY_TAG_LEN: usize = 12;

/// Default replay window in milliseconds.
pub const DEFAULT_REPLAY_WINDOW_MS: i64 = 5000;

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compute the integrity tag of a field mapping.
///
/// Key order of the source mapping is irrelevant.
pub fn integrity_tag<'a, I>(fields: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let map: serde_json::Map<String, serde_json::Value> = fields
        .into_iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();
    let canonical = canonicalize_json(&serde_json::Value::Object(map));
    let mut digest = sha256_hex(&canonical);
    digest.truncate(INTEGRITY_TAG_LEN);
    digest
}

/// Recompute the tag of `fields` and compare it with `tag`.
pub fn verify_integrity<'a, I>(fields: I, tag: &str) -> bool
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    integrity_tag(fields) == tag
}

/// Whether `tag` has the shape of an integrity tag (12 lowercase hex).
pub fn is_integrity_tag(tag: &str) -> bool {
    tag.len() == INTEGRITY_TAG_LEN
        && tag
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

/// Check for replay attack.
///
/// Rejects messages where |T_now - T_sender| > window_ms (default 5000ms).
pub fn check_replay(message_timestamp: DateTime<Utc>, window_ms: Option<i64>) -> HkpResult<()> {
    let window = window_ms.unwrap_or(DEFAULT_REPLAY_WINDOW_MS);
    let diff = Utc::now().signed_duration_since(message_timestamp);

    if diff.abs() > Duration::milliseconds(window) {
        return Err(HkpError::ReplayDetected {
            timestamp: message_timestamp.to_rfc3339(),
        });
    }

    Ok(())
}

fn quote(s: &str) -> String {
    serde_json::Value::from(s).to_string()
}

/// JCS (RFC 8785) JSON Canonicalization.
///
/// 1. Object keys sorted lexicographically
/// 2. No whitespace
/// 3. Numbers in shortest form
/// 4. Strings escaped per RFC 8785
pub fn canonicalize_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                format!("{}", f)
            } else {
                n.to_string()
            }
        }
        serde_json::Value::String(s) => quote(s),
        serde_json::Value::Array(arr) => {
            let elements: Vec<String> = arr.iter().map(canonicalize_json).collect();
            format!("[{}]", elements.join(","))
        }
        serde_json::Value::Object(obj) => {
            let mut keys: Vec<_> = obj.keys().collect();
            keys.sort();
            let pairs: Vec<String> = keys
                .iter()
                .map(|k| format!("{}:{}", quote(k), canonicalize_json(&obj[k.as_str()])))
                .collect();
            format!("{{{}}}", pairs.join(","))
        }
    }
}

fn signing_payload(request: &RoundRequest) -> HkpResult<String> {
    let mut value = serde_json::to_value(request)?;
    if let serde_json::Value::Object(ref mut map) = value {
        map.remove("signature");
    }
    Ok(canonicalize_json(&value))
}

/// Sign a round request.
///
/// The signature covers the JCS form of the request without its
/// `signature` field and is returned base64-encoded.
pub fn sign_request(request: &RoundRequest, signing_key: &SigningKey) -> HkpResult<String> {
    let canonical = signing_payload(request)?;
    let signature: Signature = signing_key.sign(canonical.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()))
}

/// Verify a round request signature.
pub fn verify_request_signature(
    request: &RoundRequest,
    verifying_key: &VerifyingKey,
) -> HkpResult<()> {
    let signature_b64 = request
        .signature
        .as_ref()
        .ok_or_else(|| HkpError::Crypto("No signature present".to_string()))?;

    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| HkpError::Crypto(format!("Invalid base64: {}", e)))?;

    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| HkpError::Crypto(format!("Invalid signature format: {}", e)))?;

    let canonical = signing_payload(request)?;

    verifying_key
        .verify(canonical.as_bytes(), &signature)
        .map_err(|_| HkpError::SignatureInvalid)
}
