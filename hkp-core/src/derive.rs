//! Role-scoped token derivation.
//!
//! token = "HKP_" || hex(SHA256("{field}_{role}_{cipher_strength}"))[..8]
//!
//! Derivation is pure, so the recoverer rebuilds tokens instead of
//! receiving them.

use serde::{Deserialize, Serialize};

use crate::model::RoleLevel;
use crate::params::ParameterSet;
use crate::security::sha256_hex;

/// Fixed protocol marker prefixed to every token.
pub const TOKEN_MARKER: &str = "HKP_";

const TOKEN_DIGEST_LEN: usize = 8;

/// Opaque per-field token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical text of a strength: shortest round-trip digits, always with a
/// fractional part (`1.0`, not `1`).
pub fn canonical_strength(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') || !value.is_finite() {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Derive the token for `field_name` at `role_level` under `params`.
pub fn derive_token(field_name: &str, role_level: RoleLevel, params: &ParameterSet) -> Token {
    let base = format!(
        "{}_{}_{}",
        field_name,
        role_level.as_str(),
        canonical_strength(params.cipher_strength())
    );
    let digest = sha256_hex(&base);
    Token(format!("{}{}", TOKEN_MARKER, &digest[..TOKEN_DIGEST_LEN]))
}

/// Derive a token from an untyped role string (`L1`..`L5`, else `L4`).
pub fn derive_token_for_role(field_name: &str, role: &str, params: &ParameterSet) -> Token {
    derive_token(field_name, RoleLevel::parse_or_default(role), params)
}
