//! One HKP round and the multi-round feedback loop.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::calibrator::{Calibration, Calibrator};
use crate::error::HkpResult;
use crate::leakage::LeakageScorer;
use crate::mimic::{assess_exposure, generate_mimic, ExposureProfile};
use crate::model::{LeakageReport, MimicBundle, RecoveredFields, StructuredInput, TaggedBundle};
use crate::obfuscator::obfuscate_input;
use crate::oracle::{consult, NoOracle, Oracle, Stage};
use crate::params::ParameterSet;
use crate::recoverer::Recoverer;
use crate::state::{RoundEvent, RoundTracker};

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Parameters of the first round.
    pub initial_params: ParameterSet,
    /// Upper bound on feedback rounds.
    pub max_rounds: u32,
    /// Seed for reproducible runs; OS entropy when absent.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            initial_params: ParameterSet::default(),
            max_rounds: 2,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_initial_params(mut self, params: ParameterSet) -> Self {
        self.initial_params = params;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Everything one round produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: u32,
    /// Parameters the round ran with.
    pub params: ParameterSet,
    pub bundle: TaggedBundle,
    pub recovered: RecoveredFields,
    pub exposure: ExposureProfile,
    pub mimic: MimicBundle,
    pub report: LeakageReport,
    pub calibration: Calibration,
}

#[derive(Serialize)]
struct ObfuscatePayload<'a> {
    input: &'a StructuredInput,
    params: ParameterSet,
}

/// The closed loop: obfuscate, recover, mimic, score, calibrate.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    oracle: Arc<dyn Oracle>,
    scorer: LeakageScorer,
    calibrator: Calibrator,
    extra_intents: Vec<String>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            oracle: Arc::new(NoOracle),
            scorer: LeakageScorer::default(),
            calibrator: Calibrator::default(),
            extra_intents: Vec::new(),
        }
    }

    /// Consult `oracle` for stage overrides.
    pub fn with_oracle(mut self, oracle: Arc<dyn Oracle>) -> Self {
        self.oracle = oracle;
        self
    }

    /// Extend the recoverer's intent vocabulary.
    pub fn with_intents<I, S>(mut self, intents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_intents.extend(intents.into_iter().map(Into::into));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// RNG for a run: seeded from the config when it carries a seed.
    pub fn rng(&self) -> StdRng {
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Run a single round under `params`.
    pub fn run_round<R: Rng + ?Sized>(
        &self,
        input: &StructuredInput,
        params: ParameterSet,
        rng: &mut R,
    ) -> HkpResult<RoundOutcome> {
        self.run_round_with(1, input, params, rng, &mut RoundTracker::new())
    }

    /// Run round number `round`, reporting stage progress to `tracker`.
    ///
    /// An integrity failure moves the tracker to `Failed` and is returned.
    pub fn run_round_with<R: Rng + ?Sized>(
        &self,
        round: u32,
        input: &StructuredInput,
        params: ParameterSet,
        rng: &mut R,
        tracker: &mut RoundTracker,
    ) -> HkpResult<RoundOutcome> {
        let oracle = self.oracle.as_ref();
        tracing::info!("Round {} starting for intent {:?}", round, input.intent);

        tracker.apply(RoundEvent::Started)?;
        let bundle = consult::<TaggedBundle, _>(
            oracle,
            Stage::Obfuscate,
            &ObfuscatePayload { input, params },
        )
        .unwrap_or_else(|| obfuscate_input(input, &params, rng));
        tracker.apply(RoundEvent::Obfuscated)?;

        let recoverer = Recoverer::new(params).with_intents(self.extra_intents.iter().cloned());
        if let Err(e) = recoverer.verify(&bundle) {
            tracker.apply(RoundEvent::Error(e.to_string()))?;
            return Err(e);
        }
        let recovered = match consult::<RecoveredFields, _>(oracle, Stage::Recover, &bundle) {
            Some(recovered) => recovered,
            None => recoverer.recover(&bundle)?,
        };
        tracker.apply(RoundEvent::Recovered)?;

        let exposure = assess_exposure(&recovered);
        let mimic = consult::<MimicBundle, _>(oracle, Stage::Mimic, &recovered)
            .unwrap_or_else(|| generate_mimic(&recovered, rng));
        tracker.apply(RoundEvent::Mimicked)?;

        let report = consult::<LeakageReport, _>(oracle, Stage::Score, &mimic)
            .unwrap_or_else(|| self.scorer.score(&mimic, rng));
        tracker.apply(RoundEvent::Scored)?;

        let calibration = consult::<Calibration, _>(oracle, Stage::Calibrate, &report)
            .unwrap_or_else(|| self.calibrator.calibrate(&report));
        tracker.apply(RoundEvent::Calibrated)?;

        tracing::info!(
            "Round {} done: score={:.3} mode={} protection={}",
            round,
            report.score,
            calibration.mode,
            report.protection
        );

        Ok(RoundOutcome {
            round,
            params,
            bundle,
            recovered,
            exposure,
            mimic,
            report,
            calibration,
        })
    }

    /// Run rounds until one settles or `max_rounds` is reached.
    ///
    /// Each round after the first runs with the previous round's
    /// calibrated parameters.
    pub fn run_feedback_loop<R: Rng + ?Sized>(
        &self,
        input: &StructuredInput,
        rng: &mut R,
    ) -> HkpResult<Vec<RoundOutcome>> {
        let mut params = self.config.initial_params;
        let mut outcomes = Vec::new();

        for round in 1..=self.config.max_rounds.max(1) {
            let outcome = self.run_round_with(round, input, params, rng, &mut RoundTracker::new())?;
            params = outcome.calibration.params;
            let settled = outcome.calibration.is_settled();
            outcomes.push(outcome);

            if settled {
                tracing::info!("Settled after round {}", round);
                break;
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrator::CalibrationMode;
    use crate::error::HkpError;
    use crate::model::{Protection, RoleLevel};
    use crate::state::RoundStage;
    use serde_json::json;

    fn transfer_input() -> StructuredInput {
        StructuredInput::new("transfer", RoleLevel::L4)
            .with_entity("amount", "75000 USD")
            .with_entity("to_account", "7395-8845-2291")
            .with_entity("from_account", "1559-6623-4401")
    }

    /// Answers a single stage with a fixed value.
    struct StageOracle {
        stage: Stage,
        value: serde_json::Value,
    }

    impl Oracle for StageOracle {
        fn propose(&self, stage: Stage, _payload: &serde_json::Value) -> Option<serde_json::Value> {
            (stage == self.stage).then(|| self.value.clone())
        }
    }

    fn with_stage(stage: Stage, value: serde_json::Value) -> Pipeline {
        Pipeline::default().with_oracle(Arc::new(StageOracle { stage, value }))
    }

    #[test]
    fn round_produces_every_stage_output() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut tracker = RoundTracker::new();
        let outcome = Pipeline::default()
            .run_round_with(1, &transfer_input(), ParameterSet::default(), &mut rng, &mut tracker)
            .unwrap();

        assert_eq!(tracker.stage(), RoundStage::Done);
        assert_eq!(outcome.recovered.intent, "transfer");
        assert_eq!(outcome.recovered.auth_grade, "Level-4");
        assert_eq!(outcome.report.protection, Protection::Active);
        assert!(!outcome.calibration.feedback_required);
        assert!((0.0..=1.0).contains(&outcome.report.score));
    }

    #[test]
    fn same_seed_same_round() {
        let pipeline = Pipeline::new(PipelineConfig::default().with_seed(9));
        let a = pipeline
            .run_round(&transfer_input(), ParameterSet::default(), &mut pipeline.rng())
            .unwrap();
        let b = pipeline
            .run_round(&transfer_input(), ParameterSet::default(), &mut pipeline.rng())
            .unwrap();

        assert_eq!(a.mimic, b.mimic);
        assert_eq!(a.report, b.report);
        for tag in ["$γΦ", "Node_ζτ", "Ωα"] {
            assert_eq!(a.bundle.fields[tag], b.bundle.fields[tag]);
        }
    }

    #[test]
    fn tampered_bundle_fails_round() {
        let forged = json!({
            "fields": { "Ωα": "AB12_0123456789ab", "Role=Γ5": "HKP-derived" },
            "role_tag": "Γ4",
            "integrity_tag": "000000000000",
            "time_tag": "2025-07-29T10:30:00Z"
        });
        let pipeline = with_stage(Stage::Obfuscate, forged);

        let mut tracker = RoundTracker::new();
        let mut rng = StdRng::seed_from_u64(1);
        let err = pipeline
            .run_round_with(1, &transfer_input(), ParameterSet::default(), &mut rng, &mut tracker)
            .unwrap_err();

        assert!(matches!(err, HkpError::Integrity { .. }));
        assert_eq!(tracker.stage(), RoundStage::Failed);
    }

    #[test]
    fn recover_override_runs_after_integrity_check() {
        let override_fields = json!({
            "intent": "payment",
            "entities": { "amount": "10 USD" },
            "auth_grade": "Level-2",
            "time_issued": "2025-07-29T10:30:00Z",
            "exec_status": "queued"
        });
        let pipeline = with_stage(Stage::Recover, override_fields);
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = pipeline
            .run_round(&transfer_input(), ParameterSet::default(), &mut rng)
            .unwrap();

        assert_eq!(outcome.recovered.intent, "payment");
        assert_eq!(outcome.recovered.auth_grade, "Level-2");
    }

    #[test]
    fn invalid_override_falls_back() {
        let pipeline = with_stage(Stage::Score, json!({ "score": 2.0 }));
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = pipeline
            .run_round(&transfer_input(), ParameterSet::default(), &mut rng)
            .unwrap();

        assert!(outcome.report.score <= 1.0);
        assert_eq!(outcome.report.protection, Protection::Active);
    }

    #[test]
    fn valid_score_override_drives_calibration() {
        let report = json!({
            "score": 0.65,
            "factors": {
                "entity_recovery": 0.2,
                "structure_fidelity": 0.5,
                "semantic_drift": 0.5,
                "pattern_consistency": 0.3,
                "field_mapping_accuracy": 0.0
            },
            "protection": "partial"
        });
        let pipeline = with_stage(Stage::Score, report);
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = pipeline
            .run_round(&transfer_input(), ParameterSet::default(), &mut rng)
            .unwrap();

        assert_eq!(outcome.report.score, 0.65);
        assert_eq!(outcome.calibration.mode, CalibrationMode::AggressiveRecalibrate);
        assert!(outcome.calibration.feedback_required);
    }

    #[test]
    fn feedback_loop_threads_params() {
        let pipeline = Pipeline::new(PipelineConfig::default().with_max_rounds(3));
        let mut rng = StdRng::seed_from_u64(11);
        let rounds = pipeline.run_feedback_loop(&transfer_input(), &mut rng).unwrap();

        assert!(!rounds.is_empty() && rounds.len() <= 3);
        assert_eq!(rounds[0].params, ParameterSet::default());
        for pair in rounds.windows(2) {
            assert_eq!(pair[1].params, pair[0].calibration.params);
            assert_eq!(pair[1].round, pair[0].round + 1);
        }
    }

    #[test]
    fn feedback_loop_stops_when_settled() {
        let settled = json!({
            "params": { "entropy": 0.5, "cipher_strength": 0.8, "role_decay": 0.5 },
            "mode": "maintain",
            "feedback_required": false,
            "effectiveness": {
                "role_protection_strong": true,
                "time_protection_strong": true,
                "signature_strong": true,
                "overall": 1.0
            }
        });
        let pipeline = with_stage(Stage::Calibrate, settled);
        let mut rng = StdRng::seed_from_u64(2);
        let rounds = pipeline.run_feedback_loop(&transfer_input(), &mut rng).unwrap();
        assert_eq!(rounds.len(), 1);
    }

    #[test]
    fn extra_intents_reach_the_recoverer() {
        let input = StructuredInput::new("rotate_keys", RoleLevel::L2);
        let mut rng = StdRng::seed_from_u64(6);

        let outcome = Pipeline::default()
            .run_round(&input, ParameterSet::default(), &mut rng)
            .unwrap();
        assert_eq!(outcome.recovered.intent, "unknown");

        let outcome = Pipeline::default()
            .with_intents(["rotate_keys"])
            .run_round(&input, ParameterSet::default(), &mut rng)
            .unwrap();
        assert_eq!(outcome.recovered.intent, "rotate_keys");
    }
}
