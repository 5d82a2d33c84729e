//! Adversarial mimic generation.
//!
//! Models an attacker who has learned the wire shape of a bundle (tag
//! names, value prefixes) but not the semantics: every value is random and
//! uncorrelated with the recovered fields.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::{
    MimicBundle, RecoveredFields, ACCOUNT_MIMIC_TAG, AMOUNT_MIMIC_TAG, ENTITY_NAMESPACE,
    INTENT_TAG, NODE_TAG, PROTOCOL_TAG, ROLE_MARKER_PREFIX, TIME_MARKER,
};
use crate::recoverer::grade_level;
use crate::transform::{is_account_like, is_amount_like};

/// Decoy tag with no real counterpart.
pub const VALUE_DECOY_TAG: &str = "ΨV";
/// Second decoy tag.
pub const LEVEL_DECOY_TAG: &str = "Σπ";

const NODE_DECOYS: [&str; 4] = ["E23_Kai", "E99_Lam", "E45_Mu", "E67_Nu"];

/// Value written under the forged role marker.
pub const MIMIC_ROLE_VALUE: &str = "mimic-derived";

fn random_group<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(1000..=9999)
}

/// Generate a mimic bundle for `fields`.
pub fn generate_mimic<R: Rng + ?Sized>(fields: &RecoveredFields, rng: &mut R) -> MimicBundle {
    tracing::info!("Running mimic probe for intent {}", fields.intent);

    let mut mimic = BTreeMap::new();

    mimic.insert(
        INTENT_TAG.to_string(),
        format!("ZYNQ_∆{}", rng.gen_range(10..=99)),
    );
    mimic.insert(
        ENTITY_NAMESPACE.to_string(),
        format!("blk_M{}Z{}", rng.gen_range(1..=9), rng.gen_range(1..=9)),
    );
    mimic.insert(
        PROTOCOL_TAG.to_string(),
        format!("AKR_Ξ{:02}", rng.gen_range(1..=99)),
    );
    let node = NODE_DECOYS.choose(rng).copied().unwrap_or(NODE_DECOYS[0]);
    mimic.insert(NODE_TAG.to_string(), node.to_string());

    mimic.insert(
        VALUE_DECOY_TAG.to_string(),
        format!("{}K", rng.gen_range(50..=100)),
    );
    mimic.insert(
        LEVEL_DECOY_TAG.to_string(),
        format!("Λ{}", rng.gen_range(1..=9)),
    );

    if fields.entities.keys().any(|k| is_amount_like(k)) {
        let fake_amount = rng.gen_range(1000..=99999);
        mimic.insert(
            AMOUNT_MIMIC_TAG.to_string(),
            format!("fake_{}_USD", fake_amount),
        );
    }

    if fields.entities.keys().any(|k| is_account_like(k)) {
        let fake_account = format!(
            "{}-{}-{}-{}",
            random_group(rng),
            random_group(rng),
            random_group(rng),
            random_group(rng)
        );
        mimic.insert(
            ACCOUNT_MIMIC_TAG.to_string(),
            format!("spoof_{}", fake_account),
        );
    }

    // valid syntax, never the highest privilege digit nor the issuer's own
    let own_digit = grade_level(&fields.auth_grade).digit();
    let forged: Vec<u8> = (1..=4).filter(|d| *d != own_digit).collect();
    let forged_digit = forged.choose(rng).copied().unwrap_or(3);
    mimic.insert(
        format!("{}{}", ROLE_MARKER_PREFIX, forged_digit),
        MIMIC_ROLE_VALUE.to_string(),
    );
    mimic.insert(
        TIME_MARKER.to_string(),
        format!(
            "2025-07-{:02}T{:02}:{:02}:00Z",
            rng.gen_range(1..=31),
            rng.gen_range(0..=23),
            rng.gen_range(0..=59)
        ),
    );

    let bundle = MimicBundle::new(mimic);
    tracing::debug!("Mimic output: {:?}", bundle);
    bundle
}

/// How much of the recovered structure an attacker could exploit.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExposureProfile {
    pub structure_exposure: f64,
    pub semantic_leakage: f64,
    pub pattern_predictability: f64,
}

const FINANCIAL_INTENTS: [&str; 3] = ["transfer", "payment", "send"];

/// Assess the exposure of recovered fields before mimicking them.
pub fn assess_exposure(fields: &RecoveredFields) -> ExposureProfile {
    let mut profile = ExposureProfile::default();

    if !fields.entities.is_empty() {
        profile.structure_exposure = (fields.entities.len() as f64 * 0.2).min(0.8);
    }

    // amounts are predictable; account numbers have a recognizable pattern
    if fields.entities.contains_key("amount") {
        profile.semantic_leakage = 0.6;
    }
    let mentions_account = fields
        .entities
        .iter()
        .any(|(k, v)| is_account_like(k) || v.to_lowercase().contains("account"));
    if mentions_account {
        profile.semantic_leakage = (profile.semantic_leakage + 0.3).min(1.0);
    }

    if FINANCIAL_INTENTS.contains(&fields.intent.as_str()) {
        profile.pattern_predictability = 0.7;
    }

    profile
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MimicStatus, CANONICAL_TAGS, HIGHEST_ROLE_MARKER};
    use chrono::DateTime;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn recovered(entities: &[(&str, &str)]) -> RecoveredFields {
        RecoveredFields {
            intent: "transfer".to_string(),
            entities: entities
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            auth_grade: "Level-4".to_string(),
            time_issued: "2025-07-29T10:30:00Z".to_string(),
            exec_status: "queued".to_string(),
        }
    }

    fn transfer_fields() -> RecoveredFields {
        recovered(&[
            ("amount", "75000 USD"),
            ("to_account", "7395-8845-2291"),
            ("from_account", "1559-6623-4401"),
        ])
    }

    #[test]
    fn mimic_has_wire_shape() {
        let mut rng = StdRng::seed_from_u64(5);
        let mimic = generate_mimic(&transfer_fields(), &mut rng);

        assert_eq!(mimic.status, MimicStatus::MimicAttempt);
        for tag in CANONICAL_TAGS {
            assert!(mimic.contains(tag), "missing {tag}");
        }
        assert!(mimic.contains(VALUE_DECOY_TAG));
        assert!(mimic.contains(LEVEL_DECOY_TAG));
        assert!(mimic.get(INTENT_TAG).unwrap().starts_with("ZYNQ_∆"));
        assert!(mimic.get(ENTITY_NAMESPACE).unwrap().starts_with("blk_M"));
        assert!(mimic.get(PROTOCOL_TAG).unwrap().starts_with("AKR_Ξ"));
        assert!(NODE_DECOYS.contains(&mimic.get(NODE_TAG).unwrap()));
    }

    #[test]
    fn forged_role_marker_is_never_highest() {
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..50 {
            let mimic = generate_mimic(&transfer_fields(), &mut rng);
            assert!(!mimic.contains(HIGHEST_ROLE_MARKER));

            let roles: Vec<_> = mimic
                .fields
                .iter()
                .filter(|(k, _)| k.starts_with(ROLE_MARKER_PREFIX))
                .collect();
            assert_eq!(roles.len(), 1);
            let digit = roles[0].0.trim_start_matches(ROLE_MARKER_PREFIX);
            assert!(["1", "2", "3", "4"].contains(&digit));
            assert_eq!(roles[0].1, MIMIC_ROLE_VALUE);
        }
    }

    #[test]
    fn forged_role_marker_differs_from_issuer_level() {
        let mut rng = StdRng::seed_from_u64(3);
        for grade in ["Level-1", "Level-2", "Level-3", "Level-4"] {
            let mut fields = transfer_fields();
            fields.auth_grade = grade.to_string();
            let own = format!("{}{}", ROLE_MARKER_PREFIX, &grade[grade.len() - 1..]);

            for _ in 0..30 {
                let mimic = generate_mimic(&fields, &mut rng);
                assert!(!mimic.contains(&own), "{grade} forged as its own level");
                assert!(!mimic.contains(HIGHEST_ROLE_MARKER));
            }
        }
    }

    #[test]
    fn time_marker_is_valid_timestamp() {
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..50 {
            let mimic = generate_mimic(&transfer_fields(), &mut rng);
            let time = mimic.get(TIME_MARKER).unwrap();
            assert!(DateTime::parse_from_rfc3339(time).is_ok(), "{time}");
        }
    }

    #[test]
    fn targeted_tags_follow_entities() {
        let mut rng = StdRng::seed_from_u64(6);

        let mimic = generate_mimic(&transfer_fields(), &mut rng);
        assert!(mimic.get(AMOUNT_MIMIC_TAG).unwrap().starts_with("fake_"));
        assert!(mimic.get(ACCOUNT_MIMIC_TAG).unwrap().starts_with("spoof_"));

        let mimic = generate_mimic(&recovered(&[("destination", "Paris")]), &mut rng);
        assert!(!mimic.contains(AMOUNT_MIMIC_TAG));
        assert!(!mimic.contains(ACCOUNT_MIMIC_TAG));

        let mimic = generate_mimic(&recovered(&[("account", "1234")]), &mut rng);
        assert!(!mimic.contains(AMOUNT_MIMIC_TAG));
        assert!(mimic.contains(ACCOUNT_MIMIC_TAG));
    }

    #[test]
    fn values_are_uncorrelated_with_input() {
        let mut rng = StdRng::seed_from_u64(99);
        let fields = transfer_fields();
        let mimic = generate_mimic(&fields, &mut rng);

        for value in fields.entities.values() {
            assert!(mimic.fields.values().all(|v| !v.contains(value.as_str())));
        }
    }

    #[test]
    fn same_seed_same_mimic() {
        let a = generate_mimic(&transfer_fields(), &mut StdRng::seed_from_u64(31));
        let b = generate_mimic(&transfer_fields(), &mut StdRng::seed_from_u64(31));
        assert_eq!(a, b);
    }

    #[test]
    fn exposure_profile() {
        let profile = assess_exposure(&transfer_fields());
        assert!((profile.structure_exposure - 0.6).abs() < 1e-9);
        assert!((profile.semantic_leakage - 0.9).abs() < 1e-9);
        assert_eq!(profile.pattern_predictability, 0.7);

        let mut quiet = recovered(&[]);
        quiet.intent = "book_flight".to_string();
        assert_eq!(assess_exposure(&quiet), ExposureProfile::default());

        let many: Vec<(String, String)> = (0..6).map(|i| (format!("k{i}"), "v".into())).collect();
        let refs: Vec<(&str, &str)> = many.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(assess_exposure(&recovered(&refs)).structure_exposure, 0.8);
    }
}
