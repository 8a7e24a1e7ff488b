//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the frontend.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration for the frontend.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FrontendConfig {
    /// Worker pool, limits and timeouts.
    pub server: ServerSettings,

    /// Endpoints to bind, in order. The first endpoint also receives any
    /// adopted sockets.
    pub endpoints: Vec<EndpointConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server-wide settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Number of acceptor worker threads.
    pub worker_threads: usize,

    /// Maximum concurrent connections across all workers (backpressure).
    pub max_connections: usize,

    /// Backlog passed to `listen(2)`.
    pub listen_backlog: i32,

    /// Time allowed for the first byte and the TLS handshake, in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Time `stop()` waits for open connections to drain, in seconds.
    pub shutdown_timeout_secs: u64,

    /// How many entries of a seed set's `previous` list remain valid for
    /// ticket decryption.
    pub ticket_seed_generations: usize,

    /// Lifetime hint sent with new session tickets, in seconds.
    pub ticket_lifetime_secs: u32,

    /// Maximum request body size accepted by the stock body limit filter.
    pub max_body_size: usize,

    /// Reload credentials automatically when certificate files change.
    pub watch_credentials: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_connections: 10_000,
            listen_backlog: 1024,
            handshake_timeout_ms: 5_000,
            shutdown_timeout_secs: 5,
            ticket_seed_generations: 1,
            ticket_lifetime_secs: 86_400,
            max_body_size: 2 * 1024 * 1024, // 2MB
            watch_credentials: false,
        }
    }
}

/// Application protocol spoken on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP/1.1 and HTTP/2, negotiated by ALPN or connection preface.
    #[default]
    Http,
    /// HTTP/1.x only.
    Http1,
    /// HTTP/2 only.
    Http2,
}

impl Protocol {
    /// ALPN identifiers advertised for this protocol, most preferred first.
    pub fn alpn_protocols(&self) -> Vec<Vec<u8>> {
        match self {
            Protocol::Http => vec![b"h2".to_vec(), b"http/1.1".to_vec()],
            Protocol::Http1 => vec![b"http/1.1".to_vec()],
            Protocol::Http2 => vec![b"h2".to_vec()],
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "http"),
            Protocol::Http1 => write!(f, "http1"),
            Protocol::Http2 => write!(f, "http2"),
        }
    }
}

/// Client certificate policy for a secure endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientVerification {
    /// Never request a client certificate.
    #[default]
    None,
    /// Request a certificate; verify it when presented, accept its absence.
    Optional,
    /// Require a valid client certificate.
    Required,
}

/// One bind address plus its protocol and security configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Bind address. Port 0 asks the kernel for an ephemeral port.
    pub address: SocketAddr,

    /// Protocol marker.
    #[serde(default)]
    pub protocol: Protocol,

    /// Certificates served on this endpoint. Non-empty means secure.
    #[serde(default)]
    pub certificates: Vec<TlsCertConfig>,

    /// Session ticket seeds. Without them an ephemeral seed is generated.
    #[serde(default)]
    pub ticket_seeds: Option<TicketSeedSet>,

    /// Serve connections that do not start a TLS handshake as plaintext.
    #[serde(default)]
    pub allow_insecure_on_secure_port: bool,

    /// Treat unusable certificate material as fatal instead of degrading the
    /// endpoint to plaintext.
    #[serde(default = "default_strict_tls")]
    pub strict_tls: bool,

    /// Client certificate policy.
    #[serde(default)]
    pub client_verification: ClientVerification,

    /// PEM bundle of CAs trusted for client certificates.
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
}

fn default_strict_tls() -> bool {
    true
}

impl EndpointConfig {
    /// A plaintext endpoint with defaults for everything else.
    pub fn new(address: SocketAddr, protocol: Protocol) -> Self {
        Self {
            address,
            protocol,
            certificates: Vec::new(),
            ticket_seeds: None,
            allow_insecure_on_secure_port: false,
            strict_tls: true,
            client_verification: ClientVerification::None,
            client_ca_path: None,
        }
    }

    /// Append a certificate to the endpoint, making it secure.
    pub fn with_certificate(mut self, certificate: TlsCertConfig) -> Self {
        self.certificates.push(certificate);
        self
    }

    pub fn with_ticket_seeds(mut self, seeds: TicketSeedSet) -> Self {
        self.ticket_seeds = Some(seeds);
        self
    }

    /// Whether the endpoint is configured for TLS.
    pub fn is_secure(&self) -> bool {
        !self.certificates.is_empty()
    }

    /// Certificate used when no server name matches: the one marked default,
    /// otherwise the first.
    pub fn default_certificate(&self) -> Option<&TlsCertConfig> {
        self.certificates
            .iter()
            .find(|c| c.is_default)
            .or_else(|| self.certificates.first())
    }

    /// Every file this endpoint reads credentials from.
    pub fn credential_paths(&self) -> Vec<&Path> {
        let mut paths: Vec<&Path> = Vec::new();
        for cert in &self.certificates {
            paths.push(&cert.cert_path);
            paths.push(&cert.key_path);
        }
        if let Some(ca) = &self.client_ca_path {
            paths.push(ca);
        }
        paths.dedup();
        paths
    }
}

/// A certificate chain and private key served by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsCertConfig {
    /// PEM file holding the certificate chain, leaf first.
    pub cert_path: PathBuf,

    /// PEM file holding the private key. May be the same file as the chain.
    pub key_path: PathBuf,

    /// Selected when the client's server name matches no certificate.
    #[serde(default)]
    pub is_default: bool,
}

impl TlsCertConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            is_default: false,
        }
    }

    /// Mark this certificate as the endpoint default.
    pub fn marked_default(mut self) -> Self {
        self.is_default = true;
        self
    }
}

/// Hex-encoded secrets protecting session tickets.
///
/// New tickets are sealed under the first `current` seed. Decryption tries
/// every `current` seed, then `previous` seeds, most recent first.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TicketSeedSet {
    pub current: Vec<String>,
    pub previous: Vec<String>,
}

impl TicketSeedSet {
    pub fn new(current: Vec<String>) -> Self {
        Self {
            current,
            previous: Vec::new(),
        }
    }

    pub fn with_previous(mut self, previous: Vec<String>) -> Self {
        self.previous = previous;
        self
    }
}

// Seeds are secrets; only their counts are printed.
impl fmt::Debug for TicketSeedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketSeedSet")
            .field("current", &self.current.len())
            .field("previous", &self.previous.len())
            .finish()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
