//! Wire messages exchanged between the round client and the round service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibrator::CalibrationMode;
use crate::error::FailureCode;
use crate::model::StructuredInput;
use crate::params::ParameterSet;
use crate::pipeline::RoundOutcome;

/// Request to run one round over a batch of inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRequest {
    pub protocol_version: String,
    pub request_id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub inputs: Vec<StructuredInput>,
    /// Parameters for this round. The session's calibrated params when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<ParameterSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl RoundRequest {
    /// Create the first request of a new session.
    pub fn new(client_id: impl Into<String>, inputs: Vec<StructuredInput>) -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION.to_string(),
            request_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            client_id: client_id.into(),
            inputs,
            params: None,
            seed: None,
            signature: None,
        }
    }

    /// Create the next request of the session `previous` belongs to.
    pub fn follow_up(
        previous: &RoundResponse,
        client_id: impl Into<String>,
        inputs: Vec<StructuredInput>,
    ) -> Self {
        Self {
            session_id: previous.session_id,
            ..Self::new(client_id, inputs)
        }
    }

    pub fn with_params(mut self, params: ParameterSet) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Outcome of one input of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RoundResult {
    Completed(Box<RoundOutcome>),
    Failed { code: FailureCode, reason: String },
}

impl RoundResult {
    pub fn outcome(&self) -> Option<&RoundOutcome> {
        match self {
            Self::Completed(outcome) => Some(outcome),
            Self::Failed { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Response to a [`RoundRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResponse {
    pub request_id: Uuid,
    pub in_response_to: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub round: u32,
    pub results: Vec<RoundResult>,
    pub next_params: ParameterSet,
    pub mode: CalibrationMode,
    pub feedback_required: bool,
}

impl RoundResponse {
    /// Build the response to `request` from per-input results.
    ///
    /// The calibration of the result with the highest leakage score decides
    /// the next parameters. With no completed result the request's params
    /// are kept and feedback is required.
    pub fn to_request(
        request: &RoundRequest,
        round: u32,
        fallback_params: ParameterSet,
        results: Vec<RoundResult>,
    ) -> Self {
        let worst = results
            .iter()
            .filter_map(RoundResult::outcome)
            .max_by(|a, b| a.report.score.total_cmp(&b.report.score));

        let (next_params, mode, feedback_required) = match worst {
            Some(outcome) => (
                outcome.calibration.params,
                outcome.calibration.mode,
                outcome.calibration.feedback_required,
            ),
            None => (fallback_params, CalibrationMode::Maintain, true),
        };

        Self {
            request_id: Uuid::new_v4(),
            in_response_to: request.request_id,
            session_id: request.session_id,
            timestamp: Utc::now(),
            round,
            results,
            next_params,
            mode,
            feedback_required,
        }
    }

    /// Highest leakage score among completed results.
    pub fn max_score(&self) -> Option<f64> {
        self.results
            .iter()
            .filter_map(RoundResult::outcome)
            .map(|o| o.report.score)
            .reduce(f64::max)
    }

    /// Whether the session needs no further rounds.
    pub fn is_settled(&self) -> bool {
        self.mode <= CalibrationMode::FineTune && !self.feedback_required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoleLevel;
    use crate::pipeline::Pipeline;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn transfer_input() -> StructuredInput {
        StructuredInput::new("transfer", RoleLevel::L4)
            .with_entity("amount", "75000 USD")
            .with_entity("to_account", "7395-8845-2291")
    }

    fn outcome(seed: u64) -> RoundOutcome {
        let pipeline = Pipeline::default();
        let mut rng = StdRng::seed_from_u64(seed);
        pipeline
            .run_round(&transfer_input(), ParameterSet::default(), &mut rng)
            .unwrap()
    }

    #[test]
    fn request_serialization() {
        let req = RoundRequest::new("client_1", vec![transfer_input()]).with_seed(7);

        let json = serde_json::to_string_pretty(&req).unwrap();
        assert!(json.contains("\"protocol_version\": \"0.1\""));
        assert!(json.contains("\"seed\": 7"));
        assert!(!json.contains("signature"));

        let parsed: RoundRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn follow_up_keeps_session() {
        let req = RoundRequest::new("client_1", vec![transfer_input()]);
        let resp = RoundResponse::to_request(&req, 1, ParameterSet::default(), vec![]);
        let next = RoundRequest::follow_up(&resp, "client_1", vec![transfer_input()]);

        assert_eq!(next.session_id, req.session_id);
        assert_ne!(next.request_id, req.request_id);
    }

    #[test]
    fn result_status_tag() {
        let failed = RoundResult::Failed {
            code: FailureCode::IntegrityError,
            reason: "tag mismatch".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["code"], "integrity_error");

        let completed = RoundResult::Completed(Box::new(outcome(1)));
        let json = serde_json::to_value(&completed).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json["report"]["score"].is_number());

        let parsed: RoundResult = serde_json::from_value(json).unwrap();
        let (a, b) = (parsed.outcome().unwrap(), completed.outcome().unwrap());
        assert_eq!(a.bundle, b.bundle);
        assert_eq!(a.mimic, b.mimic);
        assert_eq!(a.calibration.mode, b.calibration.mode);
    }

    #[test]
    fn worst_result_drives_next_params() {
        let outcomes: Vec<RoundOutcome> = (0..4).map(outcome).collect();
        let worst = outcomes
            .iter()
            .max_by(|a, b| a.report.score.total_cmp(&b.report.score))
            .unwrap()
            .clone();

        let mut results: Vec<RoundResult> = outcomes
            .into_iter()
            .map(|o| RoundResult::Completed(Box::new(o)))
            .collect();
        results.push(RoundResult::Failed {
            code: FailureCode::ValidationError,
            reason: "empty".to_string(),
        });

        let req = RoundRequest::new("client_1", vec![transfer_input()]);
        let resp = RoundResponse::to_request(&req, 2, ParameterSet::default(), results);

        assert_eq!(resp.in_response_to, req.request_id);
        assert_eq!(resp.session_id, req.session_id);
        assert_eq!(resp.round, 2);
        assert_eq!(resp.next_params, worst.calibration.params);
        assert_eq!(resp.mode, worst.calibration.mode);
        assert_eq!(resp.max_score(), Some(worst.report.score));
    }

    #[test]
    fn all_failed_keeps_params() {
        let req = RoundRequest::new("client_1", vec![transfer_input()]);
        let params = ParameterSet::new(0.6, 0.9, 0.4);
        let results = vec![RoundResult::Failed {
            code: FailureCode::IntegrityError,
            reason: "tag mismatch".to_string(),
        }];
        let resp = RoundResponse::to_request(&req, 1, params, results);

        assert_eq!(resp.next_params, params);
        assert!(resp.feedback_required);
        assert!(!resp.is_settled());
        assert_eq!(resp.max_score(), None);
    }
}
