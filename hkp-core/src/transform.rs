//! One-way field transform and the placeholder lookup used on recovery.
//!
//! obfuscate(v, k) = PREFIX || "_" || hex(SHA256("{v}_{k}"))[..12]
//!
//! PREFIX is four random upper-case hex characters, so the transform has no
//! inverse. Recovery either checks a candidate against the digest part or
//! falls back to the [`FieldKind`] placeholder table.

use rand::Rng;

use crate::derive::Token;
use crate::security::sha256_hex;

const VALUE_DIGEST_LEN: usize = 12;

fn value_digest(value: &str, token: &Token) -> String {
    let mut digest = sha256_hex(&format!("{}_{}", value, token));
    digest.truncate(VALUE_DIGEST_LEN);
    digest
}

/// Obfuscate `value` under `token`.
pub fn obfuscate<R: Rng + ?Sized>(value: &str, token: &Token, rng: &mut R) -> String {
    let prefix: [u8; 2] = rng.gen();
    format!(
        "{}_{}",
        hex::encode_upper(prefix),
        value_digest(value, token)
    )
}

/// Digest part of an obfuscated value, if it has the expected shape.
pub fn digest_part(obfuscated: &str) -> Option<&str> {
    let (prefix, digest) = obfuscated.split_once('_')?;
    let well_formed = prefix.len() == 4
        && prefix.chars().all(|c| c.is_ascii_hexdigit())
        && digest.len() == VALUE_DIGEST_LEN
        && digest.chars().all(|c| c.is_ascii_hexdigit());
    well_formed.then_some(digest)
}

/// Whether `candidate` obfuscated under `token` yields the digest carried by
/// `obfuscated`. The random prefix is ignored.
pub fn digest_matches(candidate: &str, token: &Token, obfuscated: &str) -> bool {
    digest_part(obfuscated).is_some_and(|digest| digest == value_digest(candidate, token))
}

/// Heuristic lookup table standing in for decryption.
///
/// Resolved from the entity name alone; the obfuscated value carries no
/// recoverable plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Amount,
    AccountTo,
    AccountFrom,
    /// Account with no direction keyword.
    Account,
    Generic,
}

const ACCOUNT_KEYWORDS: [&str; 3] = ["account", "acct", "iban"];
const TO_KEYWORDS: [&str; 5] = ["to", "dest", "destination", "recipient", "beneficiary"];
const FROM_KEYWORDS: [&str; 4] = ["from", "source", "sender", "origin"];

/// Lower-cased words of an entity name, split at separators and at
/// camelCase boundaries (`toAccount` gives `to`, `account`).
fn name_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

impl FieldKind {
    /// Classify an entity name by keyword.
    pub fn classify(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("amount") {
            return Self::Amount;
        }
        if !is_account_like(name) {
            return Self::Generic;
        }

        let words = name_words(name);
        let has = |keywords: &[&str]| words.iter().any(|w| keywords.contains(&w.as_str()));
        if has(&FROM_KEYWORDS) {
            Self::AccountFrom
        } else if has(&TO_KEYWORDS) {
            Self::AccountTo
        } else {
            Self::Account
        }
    }

    /// Canonical placeholder emitted for this kind.
    pub fn placeholder(&self) -> &'static str {
        match self {
            Self::Amount => "75000 USD",
            Self::AccountTo => "7395-8845-2291",
            Self::AccountFrom => "1559-6623-4401",
            Self::Account => "1234-5678-9012-3456",
            Self::Generic => "default_value",
        }
    }
}

/// Whether an entity name looks like an amount.
pub fn is_amount_like(name: &str) -> bool {
    FieldKind::classify(name) == FieldKind::Amount
}

/// Whether an entity name mentions an account.
pub fn is_account_like(name: &str) -> bool {
    let lower = name.to_lowercase();
    ACCOUNT_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::derive_token;
    use crate::model::RoleLevel;
    use crate::params::ParameterSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn token() -> Token {
        derive_token("amount", RoleLevel::L4, &ParameterSet::default())
    }

    #[test]
    fn obfuscated_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let value = obfuscate("75000 USD", &token(), &mut rng);

        let (prefix, digest) = value.split_once('_').unwrap();
        assert_eq!(prefix.len(), 4);
        assert!(prefix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
        assert_eq!(digest.len(), 12);
        assert_eq!(digest_part(&value), Some(digest));
    }

    #[test]
    fn digest_is_stable_while_prefix_varies() {
        let mut rng = StdRng::seed_from_u64(1);
        let values: Vec<String> = (0..16)
            .map(|_| obfuscate("75000 USD", &token(), &mut rng))
            .collect();

        let digests: Vec<_> = values.iter().map(|v| digest_part(v).unwrap()).collect();
        assert!(digests.windows(2).all(|w| w[0] == w[1]));

        let prefixes: std::collections::HashSet<_> =
            values.iter().map(|v| v.split_once('_').unwrap().0).collect();
        assert!(prefixes.len() > 1);
    }

    #[test]
    fn same_seed_same_output() {
        let a = obfuscate("x", &token(), &mut StdRng::seed_from_u64(3));
        let b = obfuscate("x", &token(), &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn candidate_matching() {
        let mut rng = StdRng::seed_from_u64(11);
        let value = obfuscate("transfer", &token(), &mut rng);

        assert!(digest_matches("transfer", &token(), &value));
        assert!(!digest_matches("payment", &token(), &value));
        assert!(!digest_matches("transfer", &token(), "not-obfuscated"));
    }

    #[test]
    fn field_kind_lookup() {
        assert_eq!(FieldKind::classify("amount"), FieldKind::Amount);
        assert_eq!(FieldKind::classify("transfer_amount"), FieldKind::Amount);
        assert_eq!(FieldKind::classify("to_account"), FieldKind::AccountTo);
        assert_eq!(FieldKind::classify("recipient_iban"), FieldKind::AccountTo);
        assert_eq!(FieldKind::classify("from_account"), FieldKind::AccountFrom);
        assert_eq!(FieldKind::classify("source_acct"), FieldKind::AccountFrom);
        assert_eq!(FieldKind::classify("account"), FieldKind::Account);
        assert_eq!(FieldKind::classify("destination"), FieldKind::Generic);
        assert_eq!(FieldKind::classify("total"), FieldKind::Generic);

        assert_eq!(FieldKind::AccountTo.placeholder(), "7395-8845-2291");
        assert_eq!(FieldKind::Generic.placeholder(), "default_value");
    }

    #[test]
    fn camel_case_names_are_split() {
        assert_eq!(FieldKind::classify("toAccount"), FieldKind::AccountTo);
        assert_eq!(FieldKind::classify("fromAcct"), FieldKind::AccountFrom);
        assert_eq!(FieldKind::classify("RecipientIBAN"), FieldKind::AccountTo);
        assert_eq!(FieldKind::classify("accountTotal"), FieldKind::Account);
        assert_eq!(name_words("sourceAcct_2"), vec!["source", "acct", "2"]);
    }

    #[test]
    fn undirected_account_gets_account_placeholder() {
        assert_eq!(FieldKind::classify("Account"), FieldKind::Account);
        assert_eq!(FieldKind::classify("acct_number"), FieldKind::Account);
        assert_eq!(FieldKind::Account.placeholder(), "1234-5678-9012-3456");
    }

    #[test]
    fn amount_and_account_predicates() {
        assert!(is_amount_like("amount"));
        assert!(!is_amount_like("to_account"));
        assert!(is_account_like("to_account"));
        assert!(is_account_like("Account"));
        assert!(!is_account_like("destination"));
    }
}
