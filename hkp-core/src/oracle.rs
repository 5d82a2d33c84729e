//! External override gate.
//!
//! An [`Oracle`] may propose a replacement output for any stage. Proposals
//! are untrusted: each one is deserialized into the stage's output type and
//! structurally validated, and anything that fails is logged and dropped in
//! favor of the deterministic algorithm.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::calibrator::Calibration;
use crate::error::{HkpError, HkpResult};
use crate::model::{LeakageReport, MimicBundle, RecoveredFields, TaggedBundle};
use crate::security::is_integrity_tag;

/// Pipeline stage an override applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Obfuscate,
    Recover,
    Mimic,
    Score,
    Calibrate,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Obfuscate => write!(f, "obfuscate"),
            Self::Recover => write!(f, "recover"),
            Self::Mimic => write!(f, "mimic"),
            Self::Score => write!(f, "score"),
            Self::Calibrate => write!(f, "calibrate"),
        }
    }
}

/// Source of stage overrides.
///
/// Implementations range from a generative service client to a fixed table
/// of canned outputs in tests.
pub trait Oracle: Send + Sync {
    /// Propose an output for `stage` given the stage's input as JSON.
    fn propose(&self, stage: Stage, payload: &serde_json::Value) -> Option<serde_json::Value>;
}

/// Oracle that never proposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

impl Oracle for NoOracle {
    fn propose(&self, _stage: Stage, _payload: &serde_json::Value) -> Option<serde_json::Value> {
        None
    }
}

/// A stage output that can stand in for the deterministic one.
pub trait Candidate: DeserializeOwned {
    /// Structural checks beyond deserialization.
    fn validate(&self) -> HkpResult<()>;
}

fn unit_interval(name: &str, value: f64) -> HkpResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(HkpError::Validation(format!(
            "{} out of range [0, 1]: {}",
            name, value
        )))
    }
}

fn non_empty(name: &str, value: &str) -> HkpResult<()> {
    if value.trim().is_empty() {
        Err(HkpError::Validation(format!("{} is empty", name)))
    } else {
        Ok(())
    }
}

impl Candidate for TaggedBundle {
    fn validate(&self) -> HkpResult<()> {
        if self.fields.is_empty() {
            return Err(HkpError::Validation("bundle has no fields".into()));
        }
        if !is_integrity_tag(&self.integrity_tag) {
            return Err(HkpError::Validation(format!(
                "integrity tag is not 12 hex characters: {:?}",
                self.integrity_tag
            )));
        }
        non_empty("role_tag", &self.role_tag)?;
        non_empty("time_tag", &self.time_tag)
    }
}

impl Candidate for RecoveredFields {
    fn validate(&self) -> HkpResult<()> {
        non_empty("intent", &self.intent)?;
        non_empty("auth_grade", &self.auth_grade)?;
        non_empty("exec_status", &self.exec_status)
    }
}

impl Candidate for MimicBundle {
    fn validate(&self) -> HkpResult<()> {
        if self.fields.is_empty() {
            return Err(HkpError::Validation("mimic bundle has no fields".into()));
        }
        Ok(())
    }
}

impl Candidate for LeakageReport {
    fn validate(&self) -> HkpResult<()> {
        unit_interval("score", self.score)?;
        for (name, value) in self.factors.iter() {
            unit_interval(name, value)?;
        }
        Ok(())
    }
}

impl Candidate for Calibration {
    fn validate(&self) -> HkpResult<()> {
        unit_interval("effectiveness.overall", self.effectiveness.overall)
    }
}

/// Parse and validate a raw proposal.
pub fn accept<T: Candidate>(raw: serde_json::Value) -> HkpResult<T> {
    let candidate: T = serde_json::from_value(raw)
        .map_err(|e| HkpError::Validation(format!("candidate does not parse: {}", e)))?;
    candidate.validate()?;
    Ok(candidate)
}

/// Ask `oracle` for an override of `stage`.
///
/// Returns `None` when nothing was proposed or the proposal was rejected;
/// the caller then runs the deterministic algorithm.
pub fn consult<T, P>(oracle: &dyn Oracle, stage: Stage, payload: &P) -> Option<T>
where
    T: Candidate,
    P: Serialize + ?Sized,
{
    let payload = match serde_json::to_value(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Could not serialize {} payload: {}", stage, e);
            return None;
        }
    };

    let raw = oracle.propose(stage, &payload)?;
    match accept::<T>(raw) {
        Ok(candidate) => {
            tracing::info!("Using override for {}", stage);
            Some(candidate)
        }
        Err(e) => {
            tracing::warn!("Override for {} rejected, using fallback: {}", stage, e);
            None
        }
    }
}
