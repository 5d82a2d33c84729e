//! HKP client SDK: drives feedback sessions against a round service.
//!
//! # Example
//!
//! ```no_run
//! use hkp_client::HkpClient;
//! use hkp_core::{RoleLevel, StructuredInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = HkpClient::connect("127.0.0.1:9000").await?;
//!
//!     let input = StructuredInput::new("transfer", RoleLevel::L4)
//!         .with_entity("amount", "75000 USD");
//!     let responses = client.run_feedback_loop(&input, 3).await?;
//!     println!("Rounds: {}", responses.len());
//!
//!     Ok(())
//! }
//! ```

mod connection;
mod state_machine;

pub use connection::{Connection, ConnectionConfig};
pub use state_machine::{ClientStateMachine, NextAction};

use std::net::SocketAddr;

use hkp_core::{
    sign_request, ClientState, HkpError, HkpResult, ParameterSet, RoundRequest, RoundResponse,
    SigningKey, StructuredInput,
};

/// High-level round service client.
pub struct HkpClient {
    connection: Connection,
    state_machine: ClientStateMachine,
    client_id: String,
    signing_key: Option<SigningKey>,
    seed: Option<u64>,
    last_response: Option<RoundResponse>,
}

impl HkpClient {
    /// Connect to a round service (plaintext).
    pub async fn connect(addr: impl AsRef<str>) -> HkpResult<Self> {
        let config = ConnectionConfig::plaintext(parse_addr(addr.as_ref())?);
        Ok(Self::from_connection(Connection::connect(&config).await?))
    }

    /// Connect to a round service with TLS, trusting the CAs in `ca_cert_path`.
    pub async fn connect_tls(
        addr: impl AsRef<str>,
        server_name: impl Into<String>,
        ca_cert_path: impl Into<std::path::PathBuf>,
    ) -> HkpResult<Self> {
        let config = ConnectionConfig::tls(parse_addr(addr.as_ref())?, server_name, ca_cert_path);
        Ok(Self::from_connection(Connection::connect(&config).await?))
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self {
            connection,
            state_machine: ClientStateMachine::new(),
            client_id: format!("client_{}", uuid::Uuid::new_v4()),
            signing_key: None,
            seed: None,
            last_response: None,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sign every request with `key`.
    pub fn with_signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// Ask the service for seeded, reproducible rounds.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn state(&self) -> ClientState {
        self.state_machine.state()
    }

    /// Run one round over a batch of inputs and return the raw response.
    ///
    /// Rounds on the same client share a session, so the service feeds each
    /// round's calibration into the next one.
    pub async fn submit(&mut self, inputs: Vec<StructuredInput>) -> HkpResult<RoundResponse> {
        let request = self.build_request(inputs, None)?;
        self.exchange(&request).await
    }

    /// Run rounds for `input` until leakage settles or `max_rounds` is spent.
    ///
    /// A round in which nothing completed ends the session with
    /// [`HkpError::Refused`].
    pub async fn run_feedback_loop(
        &mut self,
        input: &StructuredInput,
        max_rounds: u32,
    ) -> HkpResult<Vec<RoundResponse>> {
        let max_rounds = max_rounds.max(1);
        self.state_machine.reset();

        let mut params = None;
        let mut responses = Vec::new();

        for round in 1..=max_rounds {
            let request = self.build_request(vec![input.clone()], params)?;
            self.state_machine.on_request_sent(&request)?;
            let response = self.exchange(&request).await?;
            tracing::info!(
                "Round {}: score {:?}, mode {}",
                response.round,
                response.max_score(),
                response.mode
            );
            responses.push(response.clone());

            match self.state_machine.on_response_received(response, max_rounds - round)? {
                NextAction::Recalibrate { params: next, .. } => params = Some(next),
                NextAction::Converged(_) | NextAction::Exhausted(_) => break,
                NextAction::Failed { code, reason } => {
                    self.last_response = None;
                    return Err(HkpError::Refused { code, reason });
                }
            }
        }

        Ok(responses)
    }

    fn build_request(
        &self,
        inputs: Vec<StructuredInput>,
        params: Option<ParameterSet>,
    ) -> HkpResult<RoundRequest> {
        let mut request = match &self.last_response {
            Some(previous) => RoundRequest::follow_up(previous, self.client_id.clone(), inputs),
            None => RoundRequest::new(self.client_id.clone(), inputs),
        };
        if let Some(params) = params {
            request = request.with_params(params);
        }
        if let Some(seed) = self.seed {
            request = request.with_seed(seed);
        }
        if let Some(key) = &self.signing_key {
            request.signature = Some(sign_request(&request, key)?);
        }
        Ok(request)
    }

    async fn exchange(&mut self, request: &RoundRequest) -> HkpResult<RoundResponse> {
        let response = self.connection.send_request(request).await?;
        self.last_response = Some(response.clone());
        Ok(response)
    }
}

fn parse_addr(addr: &str) -> HkpResult<SocketAddr> {
    addr.parse()
        .map_err(|e| HkpError::Transport(format!("Invalid address: {}", e)))
}
