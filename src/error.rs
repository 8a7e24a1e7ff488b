//! Error taxonomy for the server lifecycle and connection handling.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::lifecycle::ServerState;
use crate::net::listener::ListenerError;
use crate::security::AdmissionRejected;
use crate::tls::TlsError;

/// Errors surfaced by [`HttpServer`](crate::lifecycle::HttpServer) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid endpoint configuration: {}", join(.0))]
    InvalidEndpoints(Vec<ValidationError>),

    #[error("bind failed: {0}")]
    Bind(#[from] ListenerError),

    #[error("failed to load certificates for {endpoint}: {source}")]
    CertificateLoad {
        endpoint: SocketAddr,
        #[source]
        source: TlsError,
    },

    #[error("credential update failed for {endpoint}: {source}")]
    CredentialUpdate {
        endpoint: SocketAddr,
        #[source]
        source: TlsError,
    },

    #[error("ticket seed update failed for {endpoint}: {source}")]
    TicketSeeds {
        endpoint: SocketAddr,
        #[source]
        source: TlsError,
    },

    #[error("worker {worker} failed to start: {source}")]
    Worker {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ServerState,
    },

    #[error("server failed earlier: {0}")]
    PreviousFailure(String),

    #[error("no secure endpoint configured at {0}")]
    UnknownEndpoint(SocketAddr),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why a single connection ended abnormally. Logged, never surfaced to the
/// server's callers.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("plaintext connection on secure endpoint")]
    PlaintextRefused,

    #[error(transparent)]
    Rejected(#[from] AdmissionRejected),

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP connection error: {0}")]
    Http(Box<dyn std::error::Error + Send + Sync>),
}

impl ConnectionError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            ConnectionError::Handshake(_) => "handshake",
            ConnectionError::HandshakeTimeout => "handshake_timeout",
            ConnectionError::PlaintextRefused => "plaintext",
            ConnectionError::Rejected(_) => "admission",
            ConnectionError::Io(_) => "io",
            ConnectionError::Http(_) => "http",
        }
    }
}
