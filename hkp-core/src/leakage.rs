//! Leakage scoring of mimic bundles.
//!
//! Implements the weighted leakage model:
//! - Factors: entity recovery, structure fidelity, semantic drift,
//!   pattern consistency, field mapping accuracy, each in [0, 1]
//! - Score: S = Σ w_i · f_i, with drift contributing (1 - drift)
//! - Protection: whether protocol markers remain detectable

use rand::Rng;

use crate::model::{
    LeakageFactors, LeakageReport, MimicBundle, Protection, ACCOUNT_MIMIC_TAG, AMOUNT_MIMIC_TAG,
    CANONICAL_TAGS, ENTITY_NAMESPACE, HIGHEST_ROLE_MARKER, INTENT_TAG, NODE_TAG, PROTOCOL_TAG,
    ROLE_MARKER_PREFIX, SIGNATURE_MARKER, TIME_MARKER,
};

/// Factor weights of the overall score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakageWeights {
    pub entity_recovery: f64,
    pub structure_fidelity: f64,
    pub semantic_drift: f64,
    pub pattern_consistency: f64,
    pub field_mapping_accuracy: f64,
}

impl Default for LeakageWeights {
    fn default() -> Self {
        Self {
            entity_recovery: 0.3,
            structure_fidelity: 0.25,
            semantic_drift: 0.2,
            pattern_consistency: 0.15,
            field_mapping_accuracy: 0.1,
        }
    }
}

/// Weight of each canonical tag's pattern check, in `CANONICAL_TAGS` order.
const PATTERN_WEIGHTS: [f64; 4] = [0.3, 0.3, 0.2, 0.2];

/// Contribution of each targeted mimic tag.
const TARGETED_TAG_WEIGHT: f64 = 0.4;

/// Markers whose presence makes a bundle recognizably protocol-shaped.
const PROTOCOL_MARKERS: [&str; 3] = [HIGHEST_ROLE_MARKER, TIME_MARKER, SIGNATURE_MARKER];

/// Combine factors into a score in [0, 1].
pub fn combine_factors(factors: &LeakageFactors, weights: &LeakageWeights) -> f64 {
    let score = weights.entity_recovery * factors.entity_recovery
        + weights.structure_fidelity * factors.structure_fidelity
        + weights.semantic_drift * (1.0 - factors.semantic_drift)
        + weights.pattern_consistency * factors.pattern_consistency
        + weights.field_mapping_accuracy * factors.field_mapping_accuracy;
    score.clamp(0.0, 1.0)
}

/// Fraction of the canonical tags present.
pub fn structure_fidelity(bundle: &MimicBundle) -> f64 {
    let present = CANONICAL_TAGS
        .iter()
        .filter(|tag| bundle.contains(tag))
        .count();
    present as f64 / CANONICAL_TAGS.len() as f64
}

/// Weighted prefix/pattern matches against each canonical tag's expected shape.
pub fn pattern_consistency(bundle: &MimicBundle) -> f64 {
    let checks = [
        bundle
            .get(INTENT_TAG)
            .is_some_and(|v| v.starts_with("ZYNQ") || v.starts_with("DYNX")),
        bundle.get(ENTITY_NAMESPACE).is_some_and(|v| v.contains("blk_")),
        bundle.get(PROTOCOL_TAG).is_some_and(|v| v.contains("AKR_")),
        bundle.get(NODE_TAG).is_some_and(|v| v.contains('E')),
    ];
    checks
        .iter()
        .zip(PATTERN_WEIGHTS)
        .filter(|(hit, _)| **hit)
        .map(|(_, w)| w)
        .sum()
}

/// 0.4 per targeted mimic tag present.
pub fn field_mapping_accuracy(bundle: &MimicBundle) -> f64 {
    let targeted = [AMOUNT_MIMIC_TAG, ACCOUNT_MIMIC_TAG];
    let hits = targeted.iter().filter(|tag| bundle.contains(tag)).count();
    (hits as f64 * TARGETED_TAG_WEIGHT).min(1.0)
}

/// Whether the bundle carries a role marker below the highest privilege.
pub fn has_forged_role_marker(bundle: &MimicBundle) -> bool {
    bundle.fields.keys().any(|tag| {
        tag.strip_prefix(ROLE_MARKER_PREFIX)
            .is_some_and(|digit| matches!(digit, "1" | "2" | "3" | "4"))
    })
}

/// Classify how detectable the protocol markers of a bundle are.
pub fn assess_protection(bundle: &MimicBundle) -> Protection {
    let protocol_marker = PROTOCOL_MARKERS.iter().any(|m| bundle.contains(m));
    let forged_role = has_forged_role_marker(bundle);
    let time_marker = bundle.contains(TIME_MARKER);

    if protocol_marker && forged_role && time_marker {
        Protection::Active
    } else if protocol_marker {
        Protection::Partial
    } else {
        Protection::Inactive
    }
}

/// Leakage scorer.
#[derive(Debug, Clone, Default)]
pub struct LeakageScorer {
    pub weights: LeakageWeights,
}

impl LeakageScorer {
    pub fn new(weights: LeakageWeights) -> Self {
        Self { weights }
    }

    /// Compute the factor breakdown of a mimic bundle.
    ///
    /// Entity recovery and semantic drift are sampled from `rng`.
    pub fn factors<R: Rng + ?Sized>(&self, bundle: &MimicBundle, rng: &mut R) -> LeakageFactors {
        let entity_recovery = if bundle.contains(INTENT_TAG) {
            rng.gen_range(0.1..0.4)
        } else {
            0.0
        };

        LeakageFactors {
            entity_recovery,
            structure_fidelity: structure_fidelity(bundle),
            semantic_drift: rng.gen_range(0.3..0.8),
            pattern_consistency: pattern_consistency(bundle),
            field_mapping_accuracy: field_mapping_accuracy(bundle),
        }
    }

    /// Score a mimic bundle.
    pub fn score<R: Rng + ?Sized>(&self, bundle: &MimicBundle, rng: &mut R) -> LeakageReport {
        tracing::info!("Analyzing {} mimic fields for leakage", bundle.fields.len());

        let factors = self.factors(bundle, rng);
        let report = LeakageReport {
            score: combine_factors(&factors, &self.weights),
            factors,
            protection: assess_protection(bundle),
        };
        tracing::debug!("Leakage report: {:?}", report);
        report
    }
}
