//! Client state machine for a feedback session.

use hkp_core::state::transition;
use hkp_core::{
    CalibrationMode, ClientEvent, ClientState, FailureCode, HkpError, HkpResult, ParameterSet,
    RoundRequest, RoundResponse, RoundResult,
};

/// Client state machine managing the rounds of one session.
pub struct ClientStateMachine {
    state: ClientState,
    session_id: Option<uuid::Uuid>,
    last_response: Option<RoundResponse>,
}

impl ClientStateMachine {
    pub fn new() -> Self {
        Self {
            state: ClientState::Init,
            session_id: None,
            last_response: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session_id(&self) -> Option<uuid::Uuid> {
        self.session_id
    }

    pub fn last_response(&self) -> Option<&RoundResponse> {
        self.last_response.as_ref()
    }

    /// Handle sending a request.
    pub fn on_request_sent(&mut self, request: &RoundRequest) -> HkpResult<()> {
        if self.state == ClientState::Init {
            self.session_id = Some(request.session_id);
        }
        self.transition(ClientEvent::RequestSent)
    }

    /// Handle a response; `rounds_left` is how many more rounds may be sent.
    pub fn on_response_received(
        &mut self,
        response: RoundResponse,
        rounds_left: u32,
    ) -> HkpResult<NextAction> {
        self.last_response = Some(response.clone());

        if !response.results.iter().any(RoundResult::is_completed) {
            self.transition(ClientEvent::ResponseFailed)?;
            let (code, reason) = first_failure(&response);
            return Ok(NextAction::Failed { code, reason });
        }

        if response.is_settled() {
            self.transition(ClientEvent::ResponseSettled)?;
            return Ok(NextAction::Converged(response));
        }

        self.transition(ClientEvent::ResponseRecalibrate)?;
        if rounds_left == 0 {
            self.on_rounds_exhausted()?;
            return Ok(NextAction::Exhausted(response));
        }

        Ok(NextAction::Recalibrate {
            params: response.next_params,
            mode: response.mode,
        })
    }

    /// Stop recalibrating without sending another round.
    pub fn on_rounds_exhausted(&mut self) -> HkpResult<()> {
        self.transition(ClientEvent::RoundsExhausted)
    }

    /// Reset for a new session.
    pub fn reset(&mut self) {
        self.state = ClientState::Init;
        self.session_id = None;
        self.last_response = None;
    }

    fn transition(&mut self, event: ClientEvent) -> HkpResult<()> {
        let next = self.state.on(&event).ok_or_else(|| {
            HkpError::Protocol(format!(
                "Invalid transition from {:?} on {:?}",
                self.state, event
            ))
        })?;
        transition(&mut self.state, next, ClientState::can_transition_to).map(|_| ())
    }
}

impl Default for ClientStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

fn first_failure(response: &RoundResponse) -> (FailureCode, String) {
    response
        .results
        .iter()
        .find_map(|r| match r {
            RoundResult::Failed { code, reason } => Some((*code, reason.clone())),
            RoundResult::Completed(_) => None,
        })
        .unwrap_or_else(|| (FailureCode::Internal, "Response carries no results".to_string()))
}

/// What the client should do next after receiving a response.
#[derive(Debug)]
pub enum NextAction {
    /// Send another round with these parameters.
    Recalibrate {
        params: ParameterSet,
        mode: CalibrationMode,
    },
    /// Leakage settled.
    Converged(RoundResponse),
    /// Still recalibrating but no rounds left.
    Exhausted(RoundResponse),
    /// No input of the round completed.
    Failed { code: FailureCode, reason: String },
}
