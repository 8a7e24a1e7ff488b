//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::Resumption;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, HandshakeKind};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use edge_frontend::tls::certs::{read_certificates, read_private_key, read_root_store};
use edge_frontend::{EndpointConfig, HttpServer, Protocol, ServerOptions, TlsCertConfig};

pub const REQUEST: &[u8] = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";

pub fn cert_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/certs")
        .join(name)
}

pub fn options() -> ServerOptions {
    let mut options = ServerOptions::default();
    options.threads = 2;
    options.shutdown_timeout = Duration::from_secs(1);
    options
}

pub fn plain_endpoint() -> EndpointConfig {
    EndpointConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)), Protocol::Http)
}

pub fn secure_endpoint() -> EndpointConfig {
    plain_endpoint().with_certificate(TlsCertConfig::new(
        cert_path("test_cert1.pem"),
        cert_path("test_key1.pem"),
    ))
}

/// Bind and start a server, panicking on failure. Returns the server and the
/// port of its first address.
pub fn start_server(options: ServerOptions, endpoints: Vec<EndpointConfig>) -> (HttpServer, u16) {
    let server = HttpServer::new(options);
    server.bind(endpoints).expect("bind failed");

    let mut failure = None;
    server.start(|| {}, |e| failure = Some(e));
    if let Some(e) = failure {
        panic!("start failed: {e}");
    }

    let port = server.addresses()[0].address.port();
    (server, port)
}

/// Client-side view of one TLS exchange.
#[derive(Debug)]
pub struct TlsOutcome {
    pub resumed: bool,
    /// SHA-256 of the leaf certificate the server presented.
    pub certificate_digest: Option<String>,
    /// Raw HTTP response, `None` when the server sent nothing.
    pub response: Option<String>,
}

/// Builder for the test TLS client.
pub struct TlsClient {
    client_cert: Option<(&'static str, &'static str)>,
    resumption: bool,
}

impl TlsClient {
    pub fn new() -> Self {
        Self {
            client_cert: None,
            resumption: true,
        }
    }

    pub fn with_client_cert(mut self, cert: &'static str, key: &'static str) -> Self {
        self.client_cert = Some((cert, key));
        self
    }

    pub fn without_resumption(mut self) -> Self {
        self.resumption = false;
        self
    }

    /// A client config whose session cache is shared by every connection made
    /// with it.
    pub fn build(self) -> Arc<ClientConfig> {
        let roots = read_root_store(&cert_path("ca_cert.pem")).unwrap();
        let builder = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots);

        let mut config = match self.client_cert {
            Some((cert, key)) => builder
                .with_client_auth_cert(
                    read_certificates(&cert_path(cert)).unwrap(),
                    read_private_key(&cert_path(key)).unwrap(),
                )
                .unwrap(),
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        if !self.resumption {
            config.resumption = Resumption::disabled();
        }
        Arc::new(config)
    }
}

/// Connect, send one request and read until the server closes.
pub async fn tls_request(config: Arc<ClientConfig>, port: u16) -> std::io::Result<TlsOutcome> {
    let stream = TcpStream::connect(("127.0.0.1", port)).await?;
    let connector = TlsConnector::from(config);
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut stream = connector.connect(server_name, stream).await?;

    let (resumed, certificate_digest) = {
        let (_, conn) = stream.get_ref();
        let digest = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|leaf| hex::encode(Sha256::digest(leaf.as_ref())));
        (conn.handshake_kind() == Some(HandshakeKind::Resumed), digest)
    };

    let response = match stream.write_all(REQUEST).await {
        Ok(()) => read_response(&mut stream).await,
        Err(_) => None,
    };

    Ok(TlsOutcome {
        resumed,
        certificate_digest,
        response,
    })
}

/// Send one plaintext request over raw TCP.
pub async fn plain_request(port: u16) -> Option<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.ok()?;
    stream.write_all(REQUEST).await.ok()?;
    read_response(&mut stream).await
}

/// Read until EOF, an error, or a 5 second timeout. Resets and missing
/// close_notify count as end of stream.
async fn read_response<S>(stream: &mut S) -> Option<String>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
            Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
        }
    }

    if response.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(&response).into_owned())
    }
}

pub fn status(response: &str) -> Option<u16> {
    response.split_whitespace().nth(1)?.parse().ok()
}

pub fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    let head = response.split("\r\n\r\n").next()?;
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Request ids plus the client identity handler.
pub fn hello_chain() -> Arc<edge_frontend::handler::HandlerChain> {
    use edge_frontend::handler::{ClientIdentity, RequestHandlerChain, RequestIdFilter};

    RequestHandlerChain::new()
        .add_filter(RequestIdFilter)
        .handler(ClientIdentity)
}
