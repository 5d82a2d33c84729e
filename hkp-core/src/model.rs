//! Data model for the HKP loop.
//!
//! Every stage consumes and produces one of these value types. They are
//! immutable once built; each round creates fresh instances.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Intent field tag.
pub const INTENT_TAG: &str = "Ωα";
/// Bare entity namespace tag (one of the four canonical tags).
pub const ENTITY_NAMESPACE: &str = "βΞ";
/// Prefix for per-entity field tags, `βΞ_<name>`.
pub const ENTITY_PREFIX: &str = "βΞ_";
/// Protocol filler tag.
pub const PROTOCOL_TAG: &str = "$γΦ";
/// Node filler tag.
pub const NODE_TAG: &str = "Node_ζτ";
/// Prefix shared by every role marker, followed by the privilege digit.
pub const ROLE_MARKER_PREFIX: &str = "Role=Γ";
/// Highest-privilege role marker.
pub const HIGHEST_ROLE_MARKER: &str = "Role=Γ5";
/// Time marker tag.
pub const TIME_MARKER: &str = "Time=∆τ";
/// Signature marker some bundles carry as a field.
pub const SIGNATURE_MARKER: &str = "pop_signature";

/// The four canonical protocol tags, in weight order.
pub const CANONICAL_TAGS: [&str; 4] = [INTENT_TAG, ENTITY_NAMESPACE, PROTOCOL_TAG, NODE_TAG];

/// Targeted mimic of an amount entity.
pub const AMOUNT_MIMIC_TAG: &str = "βΞ_amount_mimic";
/// Targeted mimic of an account entity.
pub const ACCOUNT_MIMIC_TAG: &str = "βΞ_account_mimic";

/// Build the field tag for an entity name.
pub fn entity_tag(name: &str) -> String {
    format!("{}{}", ENTITY_PREFIX, name)
}

/// Role/authorization level L1..L5.
///
/// Parsing never fails: anything that is not `L1`..`L5` becomes `L4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoleLevel {
    L1,
    L2,
    L3,
    #[default]
    L4,
    L5,
}

impl RoleLevel {
    /// Parse a role level, falling back to the `L4` sentinel.
    pub fn parse_or_default(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "L1" => Self::L1,
            "L2" => Self::L2,
            "L3" => Self::L3,
            "L5" => Self::L5,
            _ => Self::L4,
        }
    }

    /// Map a privilege digit `1`..`5` to its level.
    pub fn from_digit(c: char) -> Option<Self> {
        match c {
            '1' => Some(Self::L1),
            '2' => Some(Self::L2),
            '3' => Some(Self::L3),
            '4' => Some(Self::L4),
            '5' => Some(Self::L5),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::L3 => "L3",
            Self::L4 => "L4",
            Self::L5 => "L5",
        }
    }

    /// Privilege digit, 1 (lowest) to 5 (highest).
    pub fn digit(&self) -> u8 {
        match self {
            Self::L1 => 1,
            Self::L2 => 2,
            Self::L3 => 3,
            Self::L4 => 4,
            Self::L5 => 5,
        }
    }

    /// Role tag issued for this level, e.g. `Γ4`.
    pub fn role_tag(&self) -> String {
        format!("Γ{}", self.digit())
    }
}

impl std::fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for RoleLevel {
    fn from(s: String) -> Self {
        Self::parse_or_default(&s)
    }
}

impl From<&str> for RoleLevel {
    fn from(s: &str) -> Self {
        Self::parse_or_default(s)
    }
}

impl From<RoleLevel> for String {
    fn from(level: RoleLevel) -> Self {
        level.as_str().to_string()
    }
}

fn default_status() -> String {
    "ready".to_string()
}

/// Structured instruction handed over by the upstream parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredInput {
    pub intent: String,
    #[serde(default)]
    pub entities: BTreeMap<String, String>,
    #[serde(default, alias = "auth_level")]
    pub role_level: RoleLevel,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl StructuredInput {
    /// Create an input with no entities.
    pub fn new(intent: impl Into<String>, role_level: RoleLevel) -> Self {
        Self {
            intent: intent.into(),
            entities: BTreeMap::new(),
            role_level,
            status: default_status(),
            timestamp: None,
        }
    }

    /// Add an entity.
    pub fn with_entity(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entities.insert(name.into(), value.into());
        self
    }

    /// Set the upstream timestamp.
    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }
}

/// Obfuscated, integrity-tagged bundle produced by the obfuscator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedBundle {
    pub fields: BTreeMap<String, String>,
    pub role_tag: String,
    pub integrity_tag: String,
    pub time_tag: String,
}

impl TaggedBundle {
    /// Entity fields as `(entity_name, obfuscated_value)`.
    pub fn entity_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(tag, value)| {
            tag.strip_prefix(ENTITY_PREFIX)
                .map(|name| (name, value.as_str()))
        })
    }
}

/// Fields reconstructed by the recoverer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveredFields {
    pub intent: String,
    pub entities: BTreeMap<String, String>,
    pub auth_grade: String,
    pub time_issued: String,
    pub exec_status: String,
}

/// Status of a mimic bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimicStatus {
    MimicAttempt,
}

/// Bundle-shaped adversarial probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MimicBundle {
    pub fields: BTreeMap<String, String>,
    pub status: MimicStatus,
}

impl MimicBundle {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            status: MimicStatus::MimicAttempt,
        }
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.get(tag).map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.fields.contains_key(tag)
    }
}

/// How well the protocol markers of a bundle remain detectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protection {
    Active,
    Partial,
    Inactive,
}

impl std::fmt::Display for Protection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Partial => write!(f, "partial"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Per-factor leakage breakdown, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LeakageFactors {
    pub entity_recovery: f64,
    pub structure_fidelity: f64,
    pub semantic_drift: f64,
    pub pattern_consistency: f64,
    pub field_mapping_accuracy: f64,
}

impl LeakageFactors {
    /// Factors as `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> {
        [
            ("entity_recovery", self.entity_recovery),
            ("structure_fidelity", self.structure_fidelity),
            ("semantic_drift", self.semantic_drift),
            ("pattern_consistency", self.pattern_consistency),
            ("field_mapping_accuracy", self.field_mapping_accuracy),
        ]
        .into_iter()
    }
}

/// Scored leakage of one mimic bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakageReport {
    pub score: f64,
    pub factors: LeakageFactors,
    pub protection: Protection,
}
