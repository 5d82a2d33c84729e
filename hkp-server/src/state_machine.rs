//! Session state machine of the round service.

use hkp_core::state::transition;
use hkp_core::{
    check_replay, verify_request_signature, HkpError, HkpResult, ParameterSet, RoundRequest,
    RoundResponse, RoundResult, SessionEvent, SessionState, PROTOCOL_VERSION,
};
use uuid::Uuid;

use crate::config::ServiceConfig;

/// What a validated request should run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundPlan {
    pub round: u32,
    pub params: ParameterSet,
    pub seed: Option<u64>,
}

/// Session state machine managing the rounds of one connection.
pub struct SessionStateMachine {
    state: SessionState,
    config: ServiceConfig,
    session_id: Option<Uuid>,
    round: u32,
    next_params: ParameterSet,
}

impl SessionStateMachine {
    pub fn new(config: ServiceConfig) -> Self {
        let next_params = config.pipeline.initial_params;
        Self {
            state: SessionState::Received,
            config,
            session_id: None,
            round: 0,
            next_params,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Parameters the next round runs with unless the request overrides them.
    pub fn next_params(&self) -> ParameterSet {
        self.next_params
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Validate `request` and plan its round.
    pub fn begin(&mut self, request: &RoundRequest) -> HkpResult<RoundPlan> {
        if self.state == SessionState::Done {
            self.transition(SessionEvent::NextRequest)?;
        }
        self.transition(SessionEvent::RequestReceived)?;

        if let Err(e) = self.validate(request) {
            self.transition(SessionEvent::ValidationFailed(e.to_string()))?;
            return Err(e);
        }
        if self.session_id.is_none() {
            self.session_id = Some(request.session_id);
        }
        self.transition(SessionEvent::ValidationPassed)?;

        self.round += 1;
        let plan = RoundPlan {
            round: self.round,
            params: request.params.unwrap_or(self.next_params),
            seed: request.seed.or(self.config.pipeline.seed),
        };
        tracing::debug!("Planned round: {:?}", plan);
        Ok(plan)
    }

    fn validate(&self, request: &RoundRequest) -> HkpResult<()> {
        if request.protocol_version != PROTOCOL_VERSION {
            return Err(HkpError::Validation(format!(
                "Unsupported protocol version {}",
                request.protocol_version
            )));
        }

        check_replay(request.timestamp, Some(self.config.replay_window_ms))?;

        if let Some(key) = &self.config.trusted_client_key {
            verify_request_signature(request, key)?;
        }

        if let Some(sid) = self.session_id {
            if request.session_id != sid {
                return Err(HkpError::Validation("Session ID mismatch".to_string()));
            }
        }

        if request.inputs.is_empty() {
            return Err(HkpError::Validation("Request carries no inputs".to_string()));
        }
        if request.inputs.len() > self.config.max_batch {
            return Err(HkpError::Validation(format!(
                "Batch too large: {} > {}",
                request.inputs.len(),
                self.config.max_batch
            )));
        }

        Ok(())
    }

    /// Close the round and build its response.
    pub fn complete(
        &mut self,
        request: &RoundRequest,
        plan: &RoundPlan,
        results: Vec<RoundResult>,
    ) -> HkpResult<RoundResponse> {
        let response = RoundResponse::to_request(request, plan.round, plan.params, results);
        self.next_params = response.next_params;
        self.transition(SessionEvent::RoundCompleted)?;
        Ok(response)
    }

    /// Reset for a new session.
    pub fn reset(&mut self) {
        self.state = SessionState::Received;
        self.session_id = None;
        self.round = 0;
        self.next_params = self.config.pipeline.initial_params;
    }

    fn transition(&mut self, event: SessionEvent) -> HkpResult<()> {
        let next = self.state.on(&event).ok_or_else(|| {
            HkpError::Protocol(format!(
                "Invalid transition from {:?} on {:?}",
                self.state, event
            ))
        })?;
        if let SessionEvent::Error(msg) | SessionEvent::ValidationFailed(msg) = &event {
            tracing::error!("Session failed: {}", msg);
        }
        transition(&mut self.state, next, SessionState::can_transition_to).map(|_| ())
    }
}
