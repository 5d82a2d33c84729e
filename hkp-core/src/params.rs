//! Transform parameters ("theta") and their bounds.

use serde::{Deserialize, Serialize};

/// Inclusive bounds of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp `value` into the bounds. NaN maps to the lower bound.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.max(self.min).min(self.max)
    }
}

pub const ENTROPY_BOUNDS: Bounds = Bounds::new(0.1, 1.0);
pub const CIPHER_STRENGTH_BOUNDS: Bounds = Bounds::new(0.3, 1.0);
pub const ROLE_DECAY_BOUNDS: Bounds = Bounds::new(0.1, 1.0);

/// A requested parameter value that had to be clamped.
///
/// Never raised as an error; reported and logged.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterRangeWarning {
    pub field: &'static str,
    pub requested: f64,
    pub applied: f64,
}

impl std::fmt::Display for ParameterRangeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} out of range: requested {}, applied {}",
            self.field, self.requested, self.applied
        )
    }
}

#[derive(Deserialize)]
struct RawParameterSet {
    entropy: f64,
    cipher_strength: f64,
    role_decay: f64,
}

impl From<RawParameterSet> for ParameterSet {
    fn from(raw: RawParameterSet) -> Self {
        ParameterSet::new(raw.entropy, raw.cipher_strength, raw.role_decay)
    }
}

/// Transform parameters. Always within bounds, whatever the source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawParameterSet")]
pub struct ParameterSet {
    entropy: f64,
    cipher_strength: f64,
    role_decay: f64,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            entropy: 0.5,
            cipher_strength: 0.8,
            role_decay: 0.5,
        }
    }
}

impl ParameterSet {
    /// Build a parameter set, clamping and logging out-of-range values.
    pub fn new(entropy: f64, cipher_strength: f64, role_decay: f64) -> Self {
        let (params, warnings) = Self::clamped(entropy, cipher_strength, role_decay);
        for warning in &warnings {
            tracing::warn!("Parameter clamped: {}", warning);
        }
        params
    }

    /// Build a parameter set and report every value that was clamped.
    pub fn clamped(
        entropy: f64,
        cipher_strength: f64,
        role_decay: f64,
    ) -> (Self, Vec<ParameterRangeWarning>) {
        let mut warnings = Vec::new();
        let mut apply = |field: &'static str, bounds: Bounds, requested: f64| {
            let applied = bounds.clamp(requested);
            if applied != requested {
                warnings.push(ParameterRangeWarning {
                    field,
                    requested,
                    applied,
                });
            }
            applied
        };

        let params = Self {
            entropy: apply("entropy", ENTROPY_BOUNDS, entropy),
            cipher_strength: apply("cipher_strength", CIPHER_STRENGTH_BOUNDS, cipher_strength),
            role_decay: apply("role_decay", ROLE_DECAY_BOUNDS, role_decay),
        };
        (params, warnings)
    }

    pub fn entropy(&self) -> f64 {
        self.entropy
    }

    pub fn cipher_strength(&self) -> f64 {
        self.cipher_strength
    }

    pub fn role_decay(&self) -> f64 {
        self.role_decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_seeds_round_one() {
        let params = ParameterSet::default();
        assert_eq!(params.entropy(), 0.5);
        assert_eq!(params.cipher_strength(), 0.8);
        assert_eq!(params.role_decay(), 0.5);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let (params, warnings) = ParameterSet::clamped(1.7, 0.1, -3.0);
        assert_eq!(params.entropy(), 1.0);
        assert_eq!(params.cipher_strength(), 0.3);
        assert_eq!(params.role_decay(), 0.1);
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[1].field, "cipher_strength");
        assert_eq!(warnings[1].requested, 0.1);
    }

    #[test]
    fn in_range_values_produce_no_warnings() {
        let (params, warnings) = ParameterSet::clamped(0.7, 0.9, 0.6);
        assert!(warnings.is_empty());
        assert_eq!(params, ParameterSet::new(0.7, 0.9, 0.6));
    }

    #[test]
    fn nan_maps_to_lower_bound() {
        let params = ParameterSet::new(f64::NAN, 0.8, 0.5);
        assert_eq!(params.entropy(), 0.1);
    }

    #[test]
    fn deserialization_clamps() {
        let params: ParameterSet =
            serde_json::from_str(r#"{"entropy":2.0,"cipher_strength":0.9,"role_decay":0.0}"#)
                .unwrap();
        assert_eq!(params.entropy(), 1.0);
        assert_eq!(params.cipher_strength(), 0.9);
        assert_eq!(params.role_decay(), 0.1);

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"entropy\":1.0"));
    }
}
