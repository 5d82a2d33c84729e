//! TCP/TLS connection to the round service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use rustls::pki_types::ServerName;

use hkp_core::{HkpError, HkpResult, RoundRequest, RoundResponse};

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub server_addr: SocketAddr,
    /// Server hostname for TLS (if different from IP).
    pub server_name: Option<String>,
    /// Whether to use TLS.
    pub use_tls: bool,
    /// PEM bundle of the CAs trusted to sign the server certificate.
    pub ca_cert_path: Option<PathBuf>,
    /// Max response frame size.
    pub max_message_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            server_name: None,
            use_tls: false,
            ca_cert_path: None,
            max_message_size: 1024 * 1024,
        }
    }
}

impl ConnectionConfig {
    /// Create config for plaintext connection.
    pub fn plaintext(addr: SocketAddr) -> Self {
        Self {
            server_addr: addr,
            use_tls: false,
            ..Default::default()
        }
    }

    /// Create config for TLS connection trusting the CAs in `ca_cert_path`.
    pub fn tls(
        addr: SocketAddr,
        server_name: impl Into<String>,
        ca_cert_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_addr: addr,
            server_name: Some(server_name.into()),
            use_tls: true,
            ca_cert_path: Some(ca_cert_path.into()),
            ..Default::default()
        }
    }
}

/// Connection to a round service.
pub enum Connection {
    Tcp(TcpStream, usize),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>, usize),
}

impl Connection {
    /// Connect to server.
    pub async fn connect(config: &ConnectionConfig) -> HkpResult<Self> {
        let stream = TcpStream::connect(&config.server_addr)
            .await
            .map_err(|e| HkpError::Transport(format!("Connection failed: {}", e)))?;

        if !config.use_tls {
            return Ok(Self::Tcp(stream, config.max_message_size));
        }

        let connector = Self::create_tls_connector(config)?;
        let server_name: ServerName<'static> = config
            .server_name
            .clone()
            .unwrap_or_else(|| "localhost".to_string())
            .try_into()
            .map_err(|_| HkpError::Transport("Invalid server name".to_string()))?;

        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| HkpError::Transport(format!("TLS handshake failed: {}", e)))?;

        Ok(Self::Tls(Box::new(tls_stream), config.max_message_size))
    }

    /// Create TLS connector trusting the configured CA bundle.
    fn create_tls_connector(config: &ConnectionConfig) -> HkpResult<TlsConnector> {
        use rustls_pemfile::certs;
        use std::fs::File;
        use std::io::BufReader;

        let ca_path = config
            .ca_cert_path
            .as_ref()
            .ok_or_else(|| HkpError::Transport("TLS requires a CA certificate".to_string()))?;
        let ca_file = File::open(ca_path)
            .map_err(|e| HkpError::Transport(format!("Failed to open CA cert: {}", e)))?;

        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs(&mut BufReader::new(ca_file)) {
            let cert =
                cert.map_err(|e| HkpError::Transport(format!("Failed to read CA cert: {}", e)))?;
            root_store
                .add(cert)
                .map_err(|e| HkpError::Transport(format!("Invalid CA cert: {}", e)))?;
        }
        if root_store.is_empty() {
            return Err(HkpError::Transport(format!(
                "No CA certificate in {}",
                ca_path.display()
            )));
        }

        let client_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(TlsConnector::from(Arc::new(client_config)))
    }

    /// Send a request and wait for the response to it.
    pub async fn send_request(&mut self, request: &RoundRequest) -> HkpResult<RoundResponse> {
        let response = match self {
            Self::Tcp(stream, max) => exchange(stream, request, *max).await?,
            Self::Tls(stream, max) => exchange(stream.as_mut(), request, *max).await?,
        };

        if response.in_response_to != request.request_id {
            return Err(HkpError::Protocol(format!(
                "Response answers {} instead of {}",
                response.in_response_to, request.request_id
            )));
        }
        Ok(response)
    }
}

/// Write one request frame and read one response frame.
async fn exchange<S>(stream: &mut S, request: &RoundRequest, max_size: usize) -> HkpResult<RoundResponse>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    let json = serde_json::to_vec(request)?;
    let len = u32::try_from(json.len())
        .map_err(|_| HkpError::Transport("Request too large".to_string()))?;

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

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| HkpError::Transport(format!("Read error: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(HkpError::Transport(format!(
            "Response too large: {} > {}",
            len, max_size
        )));
    }

    let mut msg_buf = vec![0u8; len];
    stream
        .read_exact(&mut msg_buf)
        .await
        .map_err(|e| HkpError::Transport(format!("Read error: {}", e)))?;

    let response: RoundResponse = serde_json::from_slice(&msg_buf)?;
    Ok(response)
}
