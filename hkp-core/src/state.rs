//! State automata for rounds, service sessions and clients.

use serde::{Deserialize, Serialize};

use crate::error::{HkpError, HkpResult};

/// Progress of a single pipeline round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStage {
    /// Round created, no stage run yet.
    Pending,
    Obfuscating,
    Recovering,
    Mimicking,
    Scoring,
    Calibrating,
    /// Terminal state - calibration produced.
    Done,
    /// Terminal state - integrity failure or invalid transition.
    Failed,
}

impl RoundStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Get valid transitions from current state.
    pub fn valid_transitions(&self) -> &'static [RoundStage] {
        match self {
            Self::Pending => &[Self::Obfuscating, Self::Failed],
            Self::Obfuscating => &[Self::Recovering, Self::Failed],
            Self::Recovering => &[Self::Mimicking, Self::Failed],
            Self::Mimicking => &[Self::Scoring, Self::Failed],
            Self::Scoring => &[Self::Calibrating, Self::Failed],
            Self::Calibrating => &[Self::Done, Self::Failed],
            Self::Done => &[],
            Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: RoundStage) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Events that drive round progress.
#[derive(Debug, Clone)]
pub enum RoundEvent {
    Started,
    Obfuscated,
    Recovered,
    Mimicked,
    Scored,
    Calibrated,
    Error(String),
}

/// Tracks one round through its stages.
#[derive(Debug, Clone)]
pub struct RoundTracker {
    stage: RoundStage,
}

impl Default for RoundTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundTracker {
    pub fn new() -> Self {
        Self {
            stage: RoundStage::Pending,
        }
    }

    pub fn stage(&self) -> RoundStage {
        self.stage
    }

    /// Apply an event, failing on transitions the automaton does not allow.
    pub fn apply(&mut self, event: RoundEvent) -> HkpResult<RoundStage> {
        let next = match (&self.stage, &event) {
            (RoundStage::Pending, RoundEvent::Started) => RoundStage::Obfuscating,
            (RoundStage::Obfuscating, RoundEvent::Obfuscated) => RoundStage::Recovering,
            (RoundStage::Recovering, RoundEvent::Recovered) => RoundStage::Mimicking,
            (RoundStage::Mimicking, RoundEvent::Mimicked) => RoundStage::Scoring,
            (RoundStage::Scoring, RoundEvent::Scored) => RoundStage::Calibrating,
            (RoundStage::Calibrating, RoundEvent::Calibrated) => RoundStage::Done,
            (stage, RoundEvent::Error(msg)) if !stage.is_terminal() => {
                tracing::error!("Round failed while {:?}: {}", stage, msg);
                RoundStage::Failed
            }
            _ => {
                return Err(HkpError::Protocol(format!(
                    "Invalid round transition from {:?} on {:?}",
                    self.stage, event
                )));
            }
        };
        transition(&mut self.stage, next, RoundStage::can_transition_to)
    }
}

/// Service-side session automaton, one per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// Waiting for (or holding) a request.
    Received,
    /// Replay, signature and batch checks.
    Validating,
    /// Pipeline rounds in progress.
    Running,
    /// Round answered; the next request may continue the session.
    Done,
    /// Terminal state - request refused or session broken.
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn valid_transitions(&self) -> &'static [SessionState] {
        match self {
            Self::Received => &[Self::Validating, Self::Failed],
            Self::Validating => &[Self::Running, Self::Failed],
            Self::Running => &[Self::Done, Self::Failed],
            Self::Done => &[Self::Received, Self::Failed],
            Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: SessionState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Events that drive session transitions.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RequestReceived,
    ValidationPassed,
    ValidationFailed(String),
    RoundCompleted,
    /// Follow-up request on a session whose last round is done.
    NextRequest,
    Error(String),
}

impl SessionState {
    /// Successor state for `event`, if the automaton defines one.
    pub fn on(&self, event: &SessionEvent) -> Option<SessionState> {
        match (self, event) {
            (Self::Received, SessionEvent::RequestReceived) => Some(Self::Validating),
            (Self::Validating, SessionEvent::ValidationPassed) => Some(Self::Running),
            (Self::Validating, SessionEvent::ValidationFailed(_)) => Some(Self::Failed),
            (Self::Running, SessionEvent::RoundCompleted) => Some(Self::Done),
            (Self::Done, SessionEvent::NextRequest) => Some(Self::Received),
            (s, SessionEvent::Error(_)) if !s.is_terminal() => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Client-side automaton for a feedback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    /// Initial state - preparing first request.
    Init,
    /// Request sent, awaiting response.
    Pending,
    /// Response asked for another round with new params.
    Calibrating,
    /// Terminal state - settled round received.
    Converged,
    /// Terminal state - round limit reached before settling.
    Exhausted,
    /// Error state.
    Failed,
}

impl ClientState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Exhausted | Self::Failed)
    }

    pub fn valid_transitions(&self) -> &'static [ClientState] {
        match self {
            Self::Init => &[Self::Pending, Self::Failed],
            Self::Pending => &[Self::Calibrating, Self::Converged, Self::Failed],
            Self::Calibrating => &[Self::Pending, Self::Exhausted, Self::Failed],
            Self::Converged => &[],
            Self::Exhausted => &[],
            Self::Failed => &[],
        }
    }

    pub fn can_transition_to(&self, target: ClientState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

/// Events that drive client transitions.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    RequestSent,
    ResponseSettled,
    ResponseRecalibrate,
    ResponseFailed,
    RoundsExhausted,
    Error(String),
}

impl ClientState {
    /// Successor state for `event`, if the automaton defines one.
    pub fn on(&self, event: &ClientEvent) -> Option<ClientState> {
        match (self, event) {
            (Self::Init, ClientEvent::RequestSent) => Some(Self::Pending),
            (Self::Pending, ClientEvent::ResponseSettled) => Some(Self::Converged),
            (Self::Pending, ClientEvent::ResponseRecalibrate) => Some(Self::Calibrating),
            (Self::Pending, ClientEvent::ResponseFailed) => Some(Self::Failed),
            (Self::Calibrating, ClientEvent::RequestSent) => Some(Self::Pending),
            (Self::Calibrating, ClientEvent::RoundsExhausted) => Some(Self::Exhausted),
            (s, ClientEvent::Error(_)) if !s.is_terminal() => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Move `state` to `next` when `allowed` permits it.
pub fn transition<S, F>(state: &mut S, next: S, allowed: F) -> HkpResult<S>
where
    S: Copy + std::fmt::Debug,
    F: Fn(&S, S) -> bool,
{
    if allowed(&*state, next) {
        tracing::debug!("State transition: {:?} -> {:?}", state, next);
        *state = next;
        Ok(next)
    } else {
        Err(HkpError::Protocol(format!(
            "Invalid state transition: {:?} -> {:?}",
            state, next
        )))
    }
}
