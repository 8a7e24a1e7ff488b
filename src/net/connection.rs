//! Connection lifecycle tracking and transport metadata.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track open connections so shutdown can drain them
//! - Describe each accepted connection to admission and request handlers

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::CertificateDer;
use rustls::server::ServerConnection;
use rustls::HandshakeKind;

use crate::observability::metrics;
use crate::tls::identity;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open connections across all workers for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(active);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current open connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all connections are closed or `limit` elapses.
    /// Returns whether the drain completed.
    pub async fn wait_for_drain(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        while self.active_count.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(active);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Security layer negotiated on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureTransport {
    Plaintext,
    Tls,
}

/// Everything known about an accepted connection once its handshake is done.
#[derive(Debug, Clone)]
pub struct TransportInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub secure: SecureTransport,
    /// Negotiated ALPN protocol.
    pub alpn: Option<String>,
    /// Server name the client asked for.
    pub sni: Option<String>,
    pub tls_version: Option<String>,
    pub cipher_suite: Option<String>,
    /// The handshake resumed an earlier session.
    pub resumed: bool,
    /// Client certificate chain, leaf first.
    pub peer_certificates: Option<Vec<CertificateDer<'static>>>,
    /// Version of the TLS snapshot the handshake ran against.
    pub tls_snapshot_version: Option<u64>,
    pub accepted_at: Instant,
    pub handshake_duration: Option<Duration>,
}

impl TransportInfo {
    pub fn plaintext(
        id: ConnectionId,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        accepted_at: Instant,
    ) -> Self {
        Self {
            id,
            peer_addr,
            local_addr,
            secure: SecureTransport::Plaintext,
            alpn: None,
            sni: None,
            tls_version: None,
            cipher_suite: None,
            resumed: false,
            peer_certificates: None,
            tls_snapshot_version: None,
            accepted_at,
            handshake_duration: None,
        }
    }

    /// Describe a connection that completed a TLS handshake.
    pub fn tls(
        id: ConnectionId,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        accepted_at: Instant,
        conn: &ServerConnection,
        snapshot_version: u64,
    ) -> Self {
        Self {
            secure: SecureTransport::Tls,
            alpn: conn
                .alpn_protocol()
                .map(|p| String::from_utf8_lossy(p).into_owned()),
            sni: conn.server_name().map(str::to_owned),
            tls_version: conn.protocol_version().map(|v| format!("{:?}", v)),
            cipher_suite: conn
                .negotiated_cipher_suite()
                .map(|s| format!("{:?}", s.suite())),
            resumed: conn.handshake_kind() == Some(HandshakeKind::Resumed),
            peer_certificates: conn.peer_certificates().map(|c| c.to_vec()),
            tls_snapshot_version: Some(snapshot_version),
            handshake_duration: Some(accepted_at.elapsed()),
            ..Self::plaintext(id, peer_addr, local_addr, accepted_at)
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure == SecureTransport::Tls
    }

    /// Leaf client certificate, if one was presented and verified.
    pub fn peer_certificate(&self) -> Option<&CertificateDer<'static>> {
        self.peer_certificates.as_ref().and_then(|chain| chain.first())
    }

    /// Common name of the client certificate.
    pub fn peer_common_name(&self) -> Option<String> {
        self.peer_certificate().and_then(identity::common_name)
    }
}
