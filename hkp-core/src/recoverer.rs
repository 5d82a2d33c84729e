//! Recoverer: tagged bundle back to structured fields.
//!
//! The transform is one-way, so recovery is heuristic: the intent is matched
//! against a known vocabulary using re-derived tokens, and entity values are
//! [`FieldKind`] placeholders chosen from the entity name.

use std::collections::BTreeMap;

use crate::derive::derive_token;
use crate::error::{HkpError, HkpResult};
use crate::model::{RecoveredFields, RoleLevel, TaggedBundle, INTENT_TAG};
use crate::obfuscator::INTENT_FIELD;
use crate::params::ParameterSet;
use crate::security::{integrity_tag, verify_integrity};
use crate::transform::{digest_matches, FieldKind};

/// Intents recognized without further configuration.
pub const DEFAULT_INTENTS: [&str; 8] = [
    "transfer",
    "payment",
    "send",
    "send_email",
    "book_flight",
    "withdraw",
    "deposit",
    "query_balance",
];

/// Intent reported when no vocabulary entry matches.
pub const UNKNOWN_INTENT: &str = "unknown";

/// Execution status of every recovered bundle.
pub const QUEUED: &str = "queued";

/// Authorization grade for a role tag: `Level-<d>` when the tag ends in a
/// digit 1-5, `Level-4` otherwise.
pub fn auth_grade(role_tag: &str) -> String {
    format!("Level-{}", role_level_of(role_tag).digit())
}

/// Role level named by an authorization grade, `L4` when unreadable.
pub fn grade_level(auth_grade: &str) -> RoleLevel {
    role_level_of(auth_grade)
}

fn role_level_of(role_tag: &str) -> RoleLevel {
    role_tag
        .chars()
        .last()
        .and_then(RoleLevel::from_digit)
        .unwrap_or_default()
}

/// Bundle recoverer.
#[derive(Debug, Clone)]
pub struct Recoverer {
    params: ParameterSet,
    intents: Vec<String>,
}

impl Default for Recoverer {
    fn default() -> Self {
        Self::new(ParameterSet::default())
    }
}

impl Recoverer {
    /// Recoverer deriving tokens under `params`.
    pub fn new(params: ParameterSet) -> Self {
        Self {
            params,
            intents: DEFAULT_INTENTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Add intents to the known vocabulary.
    pub fn with_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for intent in intents {
            let intent = intent.into();
            if !self.intents.contains(&intent) {
                self.intents.push(intent);
            }
        }
        self
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    /// Check the bundle's integrity tag against its fields.
    pub fn verify(&self, bundle: &TaggedBundle) -> HkpResult<()> {
        if verify_integrity(&bundle.fields, &bundle.integrity_tag) {
            return Ok(());
        }
        let expected = integrity_tag(&bundle.fields);
        tracing::warn!(
            "Integrity verification failed: expected {}, found {}",
            expected,
            bundle.integrity_tag
        );
        Err(HkpError::Integrity {
            expected,
            found: bundle.integrity_tag.clone(),
        })
    }

    /// Verify and recover a bundle.
    ///
    /// Fails only when the integrity tag does not match the fields.
    pub fn recover(&self, bundle: &TaggedBundle) -> HkpResult<RecoveredFields> {
        tracing::info!("Starting recovery: role_tag={}", bundle.role_tag);
        self.verify(bundle)?;

        let role = role_level_of(&bundle.role_tag);

        let entities: BTreeMap<String, String> = bundle
            .entity_fields()
            .map(|(name, _)| {
                let kind = FieldKind::classify(name);
                tracing::trace!("Entity {} -> {:?}", name, kind);
                (name.to_string(), kind.placeholder().to_string())
            })
            .collect();

        let recovered = RecoveredFields {
            intent: self.recover_intent(bundle, role),
            entities,
            auth_grade: auth_grade(&bundle.role_tag),
            time_issued: bundle.time_tag.clone(),
            exec_status: QUEUED.to_string(),
        };
        tracing::debug!("Recoverer output: {:?}", recovered);
        Ok(recovered)
    }

    fn recover_intent(&self, bundle: &TaggedBundle, role: RoleLevel) -> String {
        let Some(obfuscated) = bundle.fields.get(INTENT_TAG) else {
            return UNKNOWN_INTENT.to_string();
        };

        let token = derive_token(INTENT_FIELD, role, &self.params);
        self.intents
            .iter()
            .find(|candidate| digest_matches(candidate, &token, obfuscated))
            .cloned()
            .unwrap_or_else(|| UNKNOWN_INTENT.to_string())
    }
}
