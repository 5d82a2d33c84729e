//! Round service configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hkp_core::security::DEFAULT_REPLAY_WINDOW_MS;
use hkp_core::{ParameterSet, PipelineConfig, VerifyingKey};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Replay window in milliseconds.
    pub replay_window_ms: i64,
    /// TLS configuration (plain TCP when absent).
    pub tls: Option<TlsConfig>,
    /// Read timeout for a frame body.
    pub read_timeout: Duration,
    /// Write timeout for a response frame.
    pub write_timeout: Duration,
    /// Max frame size in bytes.
    pub max_message_size: usize,
    /// Max inputs per request.
    pub max_batch: usize,
    /// Round parameters and default seed.
    pub pipeline: PipelineConfig,
    /// When set, every request must be signed by this key.
    pub trusted_client_key: Option<VerifyingKey>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            replay_window_ms: DEFAULT_REPLAY_WINDOW_MS,
            tls: None,
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_message_size: 1024 * 1024, // 1MB
            max_batch: 64,
            pipeline: PipelineConfig::default(),
            trusted_client_key: None,
        }
    }
}

impl ServiceConfig {
    /// Create a config with a custom bind address.
    pub fn with_addr(addr: impl Into<SocketAddr>) -> Self {
        Self {
            bind_addr: addr.into(),
            ..Default::default()
        }
    }

    /// Enable TLS with certificate and key files.
    pub fn with_tls(mut self, cert_path: PathBuf, key_path: PathBuf) -> Self {
        self.tls = Some(TlsConfig {
            cert_path,
            key_path,
        });
        self
    }

    pub fn with_replay_window_ms(mut self, window_ms: i64) -> Self {
        self.replay_window_ms = window_ms;
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Parameters for the first round of every session.
    pub fn with_initial_params(mut self, params: ParameterSet) -> Self {
        self.pipeline = self.pipeline.with_initial_params(params);
        self
    }

    /// Seed used when a request carries none.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.pipeline = self.pipeline.with_seed(seed);
        self
    }

    /// Require requests signed by `key`.
    pub fn with_trusted_client_key(mut self, key: VerifyingKey) -> Self {
        self.trusted_client_key = Some(key);
        self
    }
}

/// TLS configuration.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,
    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}
