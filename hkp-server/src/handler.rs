//! TCP/TLS connection handler for the round service.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use chrono::Utc;
use hkp_core::{
    CalibrationMode, FailureCode, HkpError, HkpResult, Pipeline, RoundRequest, RoundResponse,
    RoundResult, RoundTracker, StructuredInput,
};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::overrides::OverrideRegistry;
use crate::state_machine::{RoundPlan, SessionStateMachine};

/// Round service.
pub struct Server {
    config: ServiceConfig,
    pipeline: Pipeline,
    tls_acceptor: Option<TlsAcceptor>,
}

impl Server {
    /// Create a new server.
    pub fn new(config: ServiceConfig, overrides: OverrideRegistry) -> HkpResult<Self> {
        let tls_acceptor = if let Some(ref tls_config) = config.tls {
            Some(Self::create_tls_acceptor(tls_config)?)
        } else {
            None
        };

        let pipeline = Pipeline::new(config.pipeline.clone()).with_oracle(Arc::new(overrides));

        Ok(Self {
            config,
            pipeline,
            tls_acceptor,
        })
    }

    /// Create TLS acceptor from config.
    fn create_tls_acceptor(tls_config: &crate::config::TlsConfig) -> HkpResult<TlsAcceptor> {
        use rustls_pemfile::{certs, private_key};
        use std::fs::File;
        use std::io::BufReader;

        let cert_file = File::open(&tls_config.cert_path)
            .map_err(|e| HkpError::Transport(format!("Failed to open cert: {}", e)))?;
        let key_file = File::open(&tls_config.key_path)
            .map_err(|e| HkpError::Transport(format!("Failed to open key: {}", e)))?;

        let certs: Vec<_> = certs(&mut BufReader::new(cert_file))
            .filter_map(|r| r.ok())
            .collect();

        let key = private_key(&mut BufReader::new(key_file))
            .map_err(|e| HkpError::Transport(format!("Failed to read key: {}", e)))?
            .ok_or_else(|| HkpError::Transport("No private key found".to_string()))?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| HkpError::Transport(format!("TLS config error: {}", e)))?;

        Ok(TlsAcceptor::from(Arc::new(config)))
    }

    /// Run the server.
    pub async fn run(self) -> HkpResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| HkpError::Transport(format!("Failed to bind: {}", e)))?;

        tracing::info!("HKP round service listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> HkpResult<()> {
        loop {
            let (stream, addr) = listener
                .accept()
                .await
                .map_err(|e| HkpError::Transport(format!("Accept failed: {}", e)))?;

            tracing::debug!("Connection from {}", addr);

            let pipeline = self.pipeline.clone();
            let config = self.config.clone();
            let tls_acceptor = self.tls_acceptor.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, config, pipeline, tls_acceptor).await
                {
                    tracing::error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }

    /// Handle a single connection.
    async fn handle_connection(
        stream: TcpStream,
        config: ServiceConfig,
        pipeline: Pipeline,
        tls_acceptor: Option<TlsAcceptor>,
    ) -> HkpResult<()> {
        if let Some(acceptor) = tls_acceptor {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| HkpError::Transport(format!("TLS handshake failed: {}", e)))?;
            Self::handle_stream(tls_stream, config, pipeline).await
        } else {
            Self::handle_stream(stream, config, pipeline).await
        }
    }

    /// Handle the frame stream of one connection.
    async fn handle_stream<S>(
        mut stream: S,
        config: ServiceConfig,
        pipeline: Pipeline,
    ) -> HkpResult<()>
    where
        S: AsyncReadExt + AsyncWriteExt + Unpin,
    {
        let mut session = SessionStateMachine::new(config.clone());
        let mut buf = [0u8; 4];

        loop {
            // Read length prefix (4 bytes, big-endian)
            match with_timeout(config.read_timeout, stream.read_exact(&mut buf), "Read").await? {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    tracing::debug!("Client disconnected");
                    break;
                }
                Err(e) => return Err(HkpError::Transport(format!("Read error: {}", e))),
            }

            let len = u32::from_be_bytes(buf) as usize;
            if len > config.max_message_size {
                return Err(HkpError::Validation(format!(
                    "Message too large: {} > {}",
                    len, config.max_message_size
                )));
            }

            let mut msg_buf = vec![0u8; len];
            with_timeout(config.read_timeout, stream.read_exact(&mut msg_buf), "Read")
                .await?
                .map_err(|e| HkpError::Transport(format!("Read error: {}", e)))?;

            let request: RoundRequest = match serde_json::from_slice(&msg_buf) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!("Malformed request: {}", e);
                    let refusal = create_malformed_refusal(&msg_buf, &session, &e);
                    with_timeout(
                        config.write_timeout,
                        send_response(&mut stream, &refusal),
                        "Write",
                    )
                    .await??;
                    continue;
                }
            };
            tracing::debug!("Received request: {}", request.request_id);

            let response = match session.begin(&request) {
                Ok(plan) => {
                    let results = run_batch(&pipeline, &plan, &request.inputs).await;
                    session.complete(&request, &plan, results)?
                }
                Err(e) => {
                    tracing::error!("Request refused: {}", e);
                    let refusal = create_refusal(&request, &session, &e);
                    session.reset();
                    refusal
                }
            };

            with_timeout(
                config.write_timeout,
                send_response(&mut stream, &response),
                "Write",
            )
            .await??;
        }

        Ok(())
    }
}

async fn with_timeout<F, T>(limit: Duration, fut: F, what: &str) -> HkpResult<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| HkpError::Transport(format!("{} timed out after {:?}", what, limit)))
}

/// Run every input of a batch as its own blocking task.
///
/// With a seed, input `i` uses `seed + i`; results keep input order.
pub async fn run_batch(
    pipeline: &Pipeline,
    plan: &RoundPlan,
    inputs: &[StructuredInput],
) -> Vec<RoundResult> {
    let handles: Vec<_> = inputs
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, input)| {
            let pipeline = pipeline.clone();
            let plan = *plan;
            tokio::task::spawn_blocking(move || {
                let mut rng = match plan.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(i as u64)),
                    None => StdRng::from_entropy(),
                };
                let mut tracker = RoundTracker::new();
                pipeline.run_round_with(plan.round, &input, plan.params, &mut rng, &mut tracker)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let result = match handle.await {
            Ok(Ok(outcome)) => RoundResult::Completed(Box::new(outcome)),
            Ok(Err(e)) => {
                tracing::error!("Round failed: {}", e);
                RoundResult::Failed {
                    code: e.code(),
                    reason: e.to_string(),
                }
            }
            Err(e) => RoundResult::Failed {
                code: FailureCode::Internal,
                reason: format!("Round task failed: {}", e),
            },
        };
        results.push(result);
    }
    results
}

/// Send a response frame.
async fn send_response<S>(stream: &mut S, response: &RoundResponse) -> HkpResult<()>
where
    S: AsyncWriteExt + Unpin,
{
    let json = serde_json::to_vec(response)?;
    let len = json.len() as u32;

    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| HkpError::Transport(format!("Write error: {}", e)))?;
    stream
        .write_all(&json)
        .await
        .map_err(|e| HkpError::Transport(format!("Write error: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| HkpError::Transport(format!("Flush error: {}", e)))?;

    Ok(())
}

/// Response refusing `request` as a whole.
fn create_refusal(
    request: &RoundRequest,
    session: &SessionStateMachine,
    error: &HkpError,
) -> RoundResponse {
    let failed = RoundResult::Failed {
        code: error.code(),
        reason: error.to_string(),
    };
    RoundResponse::to_request(request, session.round(), session.next_params(), vec![failed])
}

/// Response refusing a frame that is not a [`RoundRequest`].
///
/// Ids are echoed when the frame is JSON carrying them, nil otherwise.
fn create_malformed_refusal(
    body: &[u8],
    session: &SessionStateMachine,
    error: &serde_json::Error,
) -> RoundResponse {
    let raw: Option<serde_json::Value> = serde_json::from_slice(body).ok();
    let id = |key: &str| {
        raw.as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::nil)
    };

    RoundResponse {
        request_id: Uuid::new_v4(),
        in_response_to: id("request_id"),
        session_id: id("session_id"),
        timestamp: Utc::now(),
        round: session.round(),
        results: vec![RoundResult::Failed {
            code: FailureCode::MalformedRequest,
            reason: format!("Malformed request: {}", error),
        }],
        next_params: session.next_params(),
        mode: CalibrationMode::Maintain,
        feedback_required: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hkp_core::{ParameterSet, RoleLevel, TaggedBundle};
    use serde_json::json;

    fn transfer_input() -> StructuredInput {
        StructuredInput::new("transfer", RoleLevel::L4)
            .with_entity("amount", "75000 USD")
            .with_entity("to_account", "7395-8845-2291")
    }

    fn plan(seed: Option<u64>) -> RoundPlan {
        RoundPlan {
            round: 1,
            params: ParameterSet::default(),
            seed,
        }
    }

    #[tokio::test]
    async fn batch_results_keep_input_order() {
        let inputs = vec![
            transfer_input(),
            StructuredInput::new("book_flight", RoleLevel::L2).with_entity("destination", "Paris"),
        ];
        let results = run_batch(&Pipeline::default(), &plan(Some(3)), &inputs).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome().unwrap().recovered.intent, "transfer");
        assert_eq!(results[1].outcome().unwrap().recovered.intent, "book_flight");
        assert_eq!(results[1].outcome().unwrap().recovered.auth_grade, "Level-2");
    }

    #[tokio::test]
    async fn seeded_batches_are_reproducible() {
        let inputs = vec![transfer_input(), transfer_input()];
        let a = run_batch(&Pipeline::default(), &plan(Some(11)), &inputs).await;
        let b = run_batch(&Pipeline::default(), &plan(Some(11)), &inputs).await;

        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.outcome().unwrap().mimic, y.outcome().unwrap().mimic);
            assert_eq!(x.outcome().unwrap().report, y.outcome().unwrap().report);
        }
        // distinct per-input streams
        assert_ne!(a[0].outcome().unwrap().mimic, a[1].outcome().unwrap().mimic);
    }

    #[tokio::test]
    async fn integrity_failure_is_reported_per_input() {
        let forged: TaggedBundle = serde_json::from_value(json!({
            "fields": { "Ωα": "AB12_0123456789ab" },
            "role_tag": "Γ4",
            "integrity_tag": "000000000000",
            "time_tag": "2025-07-29T10:30:00Z"
        }))
        .unwrap();
        let mut overrides = OverrideRegistry::new();
        overrides.register_fixed(hkp_core::Stage::Obfuscate, serde_json::to_value(forged).unwrap());
        let pipeline = Pipeline::default().with_oracle(Arc::new(overrides));

        let results = run_batch(&pipeline, &plan(None), &[transfer_input()]).await;
        match &results[0] {
            RoundResult::Failed { code, .. } => assert_eq!(*code, FailureCode::IntegrityError),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    async fn write_frame<S: AsyncWriteExt + Unpin>(stream: &mut S, body: &[u8]) {
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    async fn read_response<S: AsyncReadExt + Unpin>(stream: &mut S) -> RoundResponse {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[tokio::test]
    async fn malformed_frame_is_refused_and_session_continues() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(Server::handle_stream(
            server,
            ServiceConfig::default(),
            Pipeline::default(),
        ));

        write_frame(&mut client, br#"{"not":"a request"}"#).await;
        let refusal = read_response(&mut client).await;
        assert_eq!(refusal.in_response_to, Uuid::nil());
        match &refusal.results[..] {
            [RoundResult::Failed { code, .. }] => assert_eq!(*code, FailureCode::MalformedRequest),
            other => panic!("expected one failure, got {:?}", other),
        }

        let request = RoundRequest::new("client_1", vec![transfer_input()]).with_seed(2);
        write_frame(&mut client, &serde_json::to_vec(&request).unwrap()).await;
        let response = read_response(&mut client).await;
        assert_eq!(response.in_response_to, request.request_id);
        assert!(response.results[0].is_completed());

        drop(client);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn malformed_frame_echoes_known_ids() {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(Server::handle_stream(
            server,
            ServiceConfig::default(),
            Pipeline::default(),
        ));

        let request_id = Uuid::new_v4();
        let body = json!({ "request_id": request_id.to_string(), "inputs": "oops" });
        write_frame(&mut client, &serde_json::to_vec(&body).unwrap()).await;

        let refusal = read_response(&mut client).await;
        assert_eq!(refusal.in_response_to, request_id);
        assert!(refusal.feedback_required);
    }

    #[tokio::test]
    async fn idle_connection_times_out() {
        let (_client, server) = tokio::io::duplex(1024);
        let config = ServiceConfig {
            read_timeout: Duration::from_millis(50),
            ..ServiceConfig::default()
        };

        let result = Server::handle_stream(server, config, Pipeline::default()).await;
        match result {
            Err(HkpError::Transport(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn serves_rounds_over_tls() {
        use rustls::pki_types::ServerName;
        use std::path::PathBuf;

        let testdata = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../testdata/tls");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServiceConfig::with_addr(addr)
            .with_tls(testdata.join("server.pem"), testdata.join("server.key"));
        let server = Server::new(config, OverrideRegistry::new()).unwrap();
        tokio::spawn(server.serve(listener));

        let ca_pem = std::fs::read(testdata.join("ca.pem")).unwrap();
        let mut roots = rustls::RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut std::io::BufReader::new(&ca_pem[..])) {
            roots.add(cert.unwrap()).unwrap();
        }
        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(client_config));
        let name = ServerName::try_from("localhost").unwrap();
        let mut stream = connector
            .connect(name, TcpStream::connect(addr).await.unwrap())
            .await
            .unwrap();

        let request = RoundRequest::new("client_1", vec![transfer_input()]).with_seed(5);
        write_frame(&mut stream, &serde_json::to_vec(&request).unwrap()).await;
        stream.flush().await.unwrap();
        let response = read_response(&mut stream).await;

        assert_eq!(response.in_response_to, request.request_id);
        assert!(response.results[0].is_completed());
    }

    #[tokio::test]
    async fn serves_rounds_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(ServiceConfig::with_addr(addr), OverrideRegistry::new()).unwrap();
        tokio::spawn(server.serve(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = RoundRequest::new("client_1", vec![transfer_input()]).with_seed(5);
        let body = serde_json::to_vec(&request).unwrap();
        stream.write_all(&(body.len() as u32).to_be_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();

        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut buf = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut buf).await.unwrap();
        let response: RoundResponse = serde_json::from_slice(&buf).unwrap();

        assert_eq!(response.in_response_to, request.request_id);
        assert_eq!(response.round, 1);
        assert!(response.results[0].is_completed());
    }
}
