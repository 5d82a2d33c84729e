//! HKP round service: runs leakage simulation rounds for remote callers.

mod config;
mod handler;
mod overrides;
mod state_machine;

pub use config::{ServiceConfig, TlsConfig};
pub use handler::Server;
pub use overrides::OverrideRegistry;
pub use state_machine::SessionStateMachine;

use std::net::SocketAddr;

use hkp_core::{HkpError, HkpResult};

#[tokio::main]
async fn main() -> HkpResult<()> {
    tracing_subscriber::fmt::init();

    let bind_addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9000".to_string())
        .parse()
        .map_err(|e| HkpError::Validation(format!("Invalid bind address: {}", e)))?;

    let mut config = ServiceConfig::with_addr(bind_addr);

    if let Ok(seed) = std::env::var("HKP_SEED") {
        let seed: u64 = seed
            .parse()
            .map_err(|e| HkpError::Validation(format!("Invalid HKP_SEED: {}", e)))?;
        config = config.with_seed(seed);
    }

    if let (Ok(cert), Ok(key)) = (std::env::var("HKP_TLS_CERT"), std::env::var("HKP_TLS_KEY")) {
        config = config.with_tls(cert.into(), key.into());
    }

    let overrides = match std::env::var("HKP_OVERRIDES") {
        Ok(path) => OverrideRegistry::from_json_file(path)?,
        Err(_) => OverrideRegistry::new(),
    };

    tracing::info!("Starting HKP round service on {}", bind_addr);
    if !overrides.is_empty() {
        tracing::info!("Stage overrides: {:?}", overrides.stages());
    }

    let server = Server::new(config, overrides)?;
    server.run().await
}
