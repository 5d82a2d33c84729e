//! Calibration of the next round's parameters from a leakage report.
//!
//! - Mode: the score band the report falls in (strict `>` boundaries)
//! - Adjustment: base parameters shifted by a score-dependent delta
//! - Nudges: single-factor corrections on top of the adjustment

use serde::{Deserialize, Serialize};

use crate::model::{LeakageReport, Protection};
use crate::params::{ParameterSet, CIPHER_STRENGTH_BOUNDS, ENTROPY_BOUNDS, ROLE_DECAY_BOUNDS};

/// Calibration mode, ordered from least to most disruptive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMode {
    Maintain,
    FineTune,
    Recalibrate,
    AggressiveRecalibrate,
    EmergencyRecalibrate,
}

impl std::fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Maintain => "maintain",
            Self::FineTune => "fine_tune",
            Self::Recalibrate => "recalibrate",
            Self::AggressiveRecalibrate => "aggressive_recalibrate",
            Self::EmergencyRecalibrate => "emergency_recalibrate",
        };
        f.write_str(s)
    }
}

/// Score boundaries between modes. A score must exceed a boundary to enter
/// the band above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeThresholds {
    pub emergency: f64,
    pub aggressive: f64,
    pub recalibrate: f64,
    pub fine_tune: f64,
}

impl Default for ModeThresholds {
    fn default() -> Self {
        Self {
            emergency: 0.7,
            aggressive: 0.5,
            recalibrate: 0.3,
            fine_tune: 0.1,
        }
    }
}

impl ModeThresholds {
    pub fn mode_for(&self, score: f64) -> CalibrationMode {
        if score > self.emergency {
            CalibrationMode::EmergencyRecalibrate
        } else if score > self.aggressive {
            CalibrationMode::AggressiveRecalibrate
        } else if score > self.recalibrate {
            CalibrationMode::Recalibrate
        } else if score > self.fine_tune {
            CalibrationMode::FineTune
        } else {
            CalibrationMode::Maintain
        }
    }
}

/// Per-mechanism protection strength derived from the factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HkpEffectiveness {
    pub role_protection_strong: bool,
    pub time_protection_strong: bool,
    pub signature_strong: bool,
    /// Fraction of strong mechanisms.
    pub overall: f64,
}

impl HkpEffectiveness {
    pub fn from_report(report: &LeakageReport) -> Self {
        let f = &report.factors;
        let role_protection_strong = f.pattern_consistency < 0.5;
        let time_protection_strong = f.structure_fidelity < 0.6;
        let signature_strong = f.field_mapping_accuracy < 0.3;

        let strong = [role_protection_strong, time_protection_strong, signature_strong]
            .iter()
            .filter(|s| **s)
            .count();

        Self {
            role_protection_strong,
            time_protection_strong,
            signature_strong,
            overall: strong as f64 / 3.0,
        }
    }
}

/// Result of calibrating one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub params: ParameterSet,
    pub mode: CalibrationMode,
    pub feedback_required: bool,
    pub effectiveness: HkpEffectiveness,
}

impl Calibration {
    /// Whether another round would change nothing material.
    pub fn is_settled(&self) -> bool {
        self.mode <= CalibrationMode::FineTune && !self.feedback_required
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Parameter calibrator.
#[derive(Debug, Clone)]
pub struct Calibrator {
    pub base: ParameterSet,
    pub thresholds: ModeThresholds,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self {
            base: ParameterSet::default(),
            thresholds: ModeThresholds::default(),
        }
    }
}

impl Calibrator {
    /// Next parameter set for a report.
    pub fn next_params(&self, report: &LeakageReport) -> ParameterSet {
        let s = report.score;
        let (de, dc, dr) = if s > 0.5 {
            ((0.4 * s).min(0.3), (0.3 * s).min(0.2), (0.5 * s).min(0.3))
        } else {
            (
                ((0.5 - s) * 0.2).max(-0.1),
                ((0.5 - s) * 0.15).max(-0.1),
                ((0.5 - s) * 0.25).max(-0.1),
            )
        };

        let mut entropy = self.base.entropy() + de;
        let mut cipher_strength = self.base.cipher_strength() + dc;
        let mut role_decay = self.base.role_decay() + dr;

        let f = &report.factors;
        if f.entity_recovery > 0.3 {
            entropy += 0.1;
        }
        if f.structure_fidelity > 0.5 {
            cipher_strength += 0.1;
        }
        if f.semantic_drift < 0.4 {
            role_decay -= 0.1;
        }

        ParameterSet::new(
            round3(ENTROPY_BOUNDS.clamp(entropy)),
            round3(CIPHER_STRENGTH_BOUNDS.clamp(cipher_strength)),
            round3(ROLE_DECAY_BOUNDS.clamp(role_decay)),
        )
    }

    /// Calibrate from a report.
    pub fn calibrate(&self, report: &LeakageReport) -> Calibration {
        tracing::info!("Calibrating from leakage score {:.3}", report.score);

        let calibration = Calibration {
            params: self.next_params(report),
            mode: self.thresholds.mode_for(report.score),
            feedback_required: report.protection != Protection::Active,
            effectiveness: HkpEffectiveness::from_report(report),
        };
        tracing::debug!("Calibration: {:?}", calibration);
        calibration
    }
}
