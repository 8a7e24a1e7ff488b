//! Per-connection accept path.
//!
//! # Responsibilities
//! - Accept connections on a worker's listeners until told to stop
//! - Detect TLS on secure endpoints by peeking at the first byte
//! - Run the handshake against the snapshot current at handshake start
//! - Apply the admission filter, then hand off to the HTTP layer
//!
//! # Design Decisions
//! - Handshake failures and rejections close the connection and are only
//!   logged; they never affect other connections or the listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use crate::config::schema::EndpointConfig;
use crate::error::ConnectionError;
use crate::handler::chain::HandlerChain;
use crate::handler::server::serve_connection;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::connection::{ConnectionId, ConnectionTracker, TransportInfo};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::observability::metrics;
use crate::security::ConnectionFilter;
use crate::tls::TlsContextManager;

/// First byte of a TLS handshake record.
const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Runtime state of one configured endpoint.
pub struct EndpointRuntime {
    pub index: usize,
    pub config: EndpointConfig,
    /// Present when the endpoint serves TLS.
    pub tls: Option<Arc<TlsContextManager>>,
}

/// State shared by every connection of a server.
pub struct ServeContext {
    pub chain: Arc<HandlerChain>,
    pub connection_filter: Option<ConnectionFilter>,
    pub tracker: ConnectionTracker,
    pub connection_limit: Arc<Semaphore>,
    pub handshake_timeout: Duration,
}

enum Sniffed {
    Tls,
    Plaintext,
    Closed,
}

/// Accept on `listener` until `stop` flips. Connections receive a
/// subscription to `draining`.
pub async fn accept_loop(
    listener: Listener,
    endpoint: Arc<EndpointRuntime>,
    ctx: Arc<ServeContext>,
    mut stop: watch::Receiver<bool>,
    draining: Shutdown,
) {
    let local_addr = listener.local_addr();
    let endpoint_label = local_addr.to_string();
    tracing::debug!(address = %local_addr, "Accept loop started");

    loop {
        let accepted = tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr, permit)) => {
                metrics::record_connection_accepted(&endpoint_label);
                tokio::spawn(handle_connection(
                    stream,
                    peer_addr,
                    permit,
                    Arc::clone(&endpoint),
                    Arc::clone(&ctx),
                    draining.subscribe(),
                ));
            }
            Err(ListenerError::Closed) => break,
            Err(e) => {
                // Usually EMFILE or a reset before accept; keep serving.
                tracing::warn!(address = %local_addr, error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }

    tracing::debug!(address = %local_addr, "Accept loop stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    permit: ConnectionPermit,
    endpoint: Arc<EndpointRuntime>,
    ctx: Arc<ServeContext>,
    shutdown: watch::Receiver<bool>,
) {
    let _permit = permit;
    let guard = ctx.tracker.track();
    let id = guard.id();
    let accepted_at = Instant::now();
    let local_addr = stream.local_addr().unwrap_or(endpoint.config.address);
    let _ = stream.set_nodelay(true);

    let result = match &endpoint.tls {
        None => {
            let transport = TransportInfo::plaintext(id, peer_addr, local_addr, accepted_at);
            serve_admitted(stream, transport, &endpoint, &ctx, shutdown).await
        }
        Some(tls) => match sniff(&stream, ctx.handshake_timeout).await {
            Ok(Sniffed::Tls) => {
                serve_tls(stream, id, peer_addr, local_addr, accepted_at, tls, &endpoint, &ctx, shutdown)
                    .await
            }
            Ok(Sniffed::Plaintext) if endpoint.config.allow_insecure_on_secure_port => {
                let transport = TransportInfo::plaintext(id, peer_addr, local_addr, accepted_at);
                serve_admitted(stream, transport, &endpoint, &ctx, shutdown).await
            }
            Ok(Sniffed::Plaintext) => Err(ConnectionError::PlaintextRefused),
            Ok(Sniffed::Closed) => Ok(()),
            Err(e) => Err(e),
        },
    };

    if let Err(e) = result {
        log_connection_error(id, peer_addr, &e);
    }
}

async fn sniff(stream: &TcpStream, wait: Duration) -> Result<Sniffed, ConnectionError> {
    let mut first = [0u8; 1];
    match timeout(wait, stream.peek(&mut first)).await {
        Err(_) => Err(ConnectionError::HandshakeTimeout),
        Ok(Err(e)) => Err(ConnectionError::Io(e)),
        Ok(Ok(0)) => Ok(Sniffed::Closed),
        Ok(Ok(_)) if first[0] == TLS_HANDSHAKE_RECORD => Ok(Sniffed::Tls),
        Ok(Ok(_)) => Ok(Sniffed::Plaintext),
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_tls(
    stream: TcpStream,
    id: ConnectionId,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
    accepted_at: Instant,
    tls: &TlsContextManager,
    endpoint: &EndpointRuntime,
    ctx: &ServeContext,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    // Pin the snapshot for the whole handshake; later swaps do not affect it.
    let snapshot = tls.snapshot();
    let acceptor = TlsAcceptor::from(Arc::clone(&snapshot.server_config));

    let stream = match timeout(ctx.handshake_timeout, acceptor.accept(stream)).await {
        Err(_) => return Err(ConnectionError::HandshakeTimeout),
        Ok(Err(e)) => return Err(ConnectionError::Handshake(e)),
        Ok(Ok(stream)) => stream,
    };

    let transport = {
        let (_, conn) = stream.get_ref();
        TransportInfo::tls(id, peer_addr, local_addr, accepted_at, conn, snapshot.version)
    };
    drop(snapshot);

    metrics::record_handshake(transport.resumed);
    tracing::debug!(
        connection_id = %id,
        peer_addr = %peer_addr,
        alpn = ?transport.alpn,
        sni = ?transport.sni,
        resumed = transport.resumed,
        snapshot_version = ?transport.tls_snapshot_version,
        "TLS handshake complete"
    );

    serve_admitted(stream, transport, endpoint, ctx, shutdown).await
}

async fn serve_admitted<I>(
    io: I,
    transport: TransportInfo,
    endpoint: &EndpointRuntime,
    ctx: &ServeContext,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError>
where
    I: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    if let Some(filter) = &ctx.connection_filter {
        filter(&transport)?;
    }

    serve_connection(
        io,
        Arc::new(transport),
        endpoint.config.protocol,
        Arc::clone(&ctx.chain),
        shutdown,
    )
    .await
}

fn log_connection_error(id: ConnectionId, peer_addr: SocketAddr, error: &ConnectionError) {
    metrics::record_connection_error(error.reason());
    match error {
        ConnectionError::Rejected(_) | ConnectionError::PlaintextRefused => {
            tracing::info!(connection_id = %id, peer_addr = %peer_addr, error = %error, "Connection refused")
        }
        _ => tracing::debug!(connection_id = %id, peer_addr = %peer_addr, error = %error, "Connection ended with error"),
    }
}
