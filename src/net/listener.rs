//! Bind manager and bounded TCP listeners.
//!
//! # Responsibilities
//! - Create and bind one socket per endpoint, or adopt sockets handed over
//!   by the caller
//! - Defer `listen(2)` until every endpoint is bound, so a failing start
//!   never leaves a half-listening set behind
//! - Accept incoming TCP connections per worker
//! - Enforce max_connections limit via semaphore

use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::schema::EndpointConfig;

/// Error type for listener operations.
#[derive(Debug)]
pub enum ListenerError {
    /// Failed to create or bind a socket.
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to start listening on a bound socket.
    Listen {
        address: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to take over a caller-provided socket.
    Adopt(std::io::Error),
    /// Failed to accept connection.
    Accept(std::io::Error),
    /// The connection limit semaphore was closed.
    Closed,
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::Bind { address, source } => {
                write!(f, "Failed to bind {}: {}", address, source)
            }
            ListenerError::Listen { address, source } => {
                write!(f, "Failed to listen on {}: {}", address, source)
            }
            ListenerError::Adopt(e) => write!(f, "Failed to adopt socket: {}", e),
            ListenerError::Accept(e) => write!(f, "Failed to accept: {}", e),
            ListenerError::Closed => write!(f, "Listener closed"),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Bind { source, .. } | ListenerError::Listen { source, .. } => {
                Some(source)
            }
            ListenerError::Adopt(e) | ListenerError::Accept(e) => Some(e),
            ListenerError::Closed => None,
        }
    }
}

/// A bound socket and the endpoint it serves.
#[derive(Debug)]
pub struct BoundSocket {
    socket: Socket,
    local_addr: SocketAddr,
    endpoint: usize,
    adopted: bool,
}

impl BoundSocket {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Index of the endpoint this socket belongs to.
    pub fn endpoint(&self) -> usize {
        self.endpoint
    }

    /// Whether the socket was provided by the caller.
    pub fn is_adopted(&self) -> bool {
        self.adopted
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// All sockets of one server, in endpoint order.
#[derive(Debug, Default)]
pub struct ListenerSet {
    sockets: Vec<BoundSocket>,
    listening: bool,
}

impl ListenerSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bind every endpoint without listening.
    ///
    /// `existing` sockets are adopted for the first endpoint in the given
    /// order, and that endpoint's own address is not bound.
    pub fn bind(endpoints: &[EndpointConfig], existing: Vec<OwnedFd>) -> Result<Self, ListenerError> {
        let mut sockets = Vec::with_capacity(endpoints.len() + existing.len());
        let adopting = !existing.is_empty();

        for fd in existing {
            let socket = Socket::from(fd);
            let local_addr = socket
                .local_addr()
                .map_err(ListenerError::Adopt)?
                .as_socket()
                .ok_or_else(|| {
                    ListenerError::Adopt(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "adopted socket is not an inet socket",
                    ))
                })?;
            socket.set_nonblocking(true).map_err(ListenerError::Adopt)?;

            tracing::info!(address = %local_addr, fd = socket.as_raw_fd(), "Adopted existing socket");
            sockets.push(BoundSocket {
                socket,
                local_addr,
                endpoint: 0,
                adopted: true,
            });
        }

        for (index, endpoint) in endpoints.iter().enumerate() {
            if adopting && index == 0 {
                continue;
            }
            let socket = bind_socket(endpoint.address).map_err(|source| ListenerError::Bind {
                address: endpoint.address,
                source,
            })?;
            let local_addr = socket
                .local_addr()
                .ok()
                .and_then(|a| a.as_socket())
                .unwrap_or(endpoint.address);

            tracing::info!(address = %local_addr, protocol = %endpoint.protocol, "Endpoint bound");
            sockets.push(BoundSocket {
                socket,
                local_addr,
                endpoint: index,
                adopted: false,
            });
        }

        Ok(Self {
            sockets,
            listening: false,
        })
    }

    /// Start listening on every socket.
    pub fn listen(&mut self, backlog: i32) -> Result<(), ListenerError> {
        for bound in &self.sockets {
            bound
                .socket
                .listen(backlog)
                .map_err(|source| ListenerError::Listen {
                    address: bound.local_addr,
                    source,
                })?;
        }
        self.listening = true;
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Descriptor of the first listening socket.
    pub fn listen_socket(&self) -> Option<RawFd> {
        if !self.listening {
            return None;
        }
        self.sockets.first().map(BoundSocket::raw_fd)
    }

    pub fn sockets(&self) -> &[BoundSocket] {
        &self.sockets
    }

    /// Duplicate every socket for one worker.
    pub fn clone_listeners(&self) -> Result<Vec<(usize, std::net::TcpListener)>, ListenerError> {
        self.sockets
            .iter()
            .map(|bound| {
                let socket = bound.socket.try_clone().map_err(|source| ListenerError::Listen {
                    address: bound.local_addr,
                    source,
                })?;
                Ok((bound.endpoint, std::net::TcpListener::from(socket)))
            })
            .collect()
    }

    /// Close every socket.
    pub fn close(&mut self) {
        if !self.sockets.is_empty() {
            tracing::debug!(sockets = self.sockets.len(), "Closing listening sockets");
        }
        self.sockets.clear();
        self.listening = false;
    }
}

fn bind_socket(address: SocketAddr) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if address.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;
    Ok(socket)
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections will wait until a slot becomes available.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections, shared by all workers.
    connection_limit: Arc<Semaphore>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Register a worker's duplicate of a listening socket with the current
    /// runtime.
    pub fn from_std(
        listener: std::net::TcpListener,
        connection_limit: Arc<Semaphore>,
    ) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::Adopt)?;
        let inner = TcpListener::from_std(listener).map_err(ListenerError::Adopt)?;
        Ok(Self {
            inner,
            connection_limit,
            local_addr,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        // Then accept the connection
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            local_addr = %self.local_addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Protocol;

    fn endpoint(address: &str) -> EndpointConfig {
        EndpointConfig::new(address.parse().unwrap(), Protocol::Http)
    }

    #[test]
    fn test_bind_defers_listen() {
        let mut set = ListenerSet::bind(&[endpoint("127.0.0.1:0"), endpoint("127.0.0.1:0")], Vec::new())
            .unwrap();
        assert_eq!(set.sockets().len(), 2);
        assert_ne!(set.sockets()[0].local_addr().port(), 0);
        assert!(set.listen_socket().is_none());

        // Bound but not listening: connections are refused.
        let addr = set.sockets()[0].local_addr();
        assert!(std::net::TcpStream::connect(addr).is_err());

        set.listen(16).unwrap();
        assert_eq!(set.listen_socket(), Some(set.sockets()[0].raw_fd()));
        assert!(std::net::TcpStream::connect(addr).is_ok());

        set.close();
        assert!(set.listen_socket().is_none());
        assert!(set.sockets().is_empty());
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = taken.local_addr().unwrap();

        let err = ListenerSet::bind(&[endpoint(&address.to_string())], Vec::new()).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[test]
    fn test_adopts_existing_sockets_for_first_endpoint() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let second = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let first_fd = first.as_raw_fd();
        let first_addr = first.local_addr().unwrap();

        let mut set = ListenerSet::bind(
            &[endpoint("127.0.0.1:0"), endpoint("127.0.0.1:0")],
            vec![OwnedFd::from(first), OwnedFd::from(second)],
        )
        .unwrap();

        // Two adopted sockets for endpoint 0, one fresh socket for endpoint 1.
        assert_eq!(set.sockets().len(), 3);
        assert!(set.sockets()[0].is_adopted());
        assert_eq!(set.sockets()[0].local_addr(), first_addr);
        assert_eq!(set.sockets()[1].endpoint(), 0);
        assert_eq!(set.sockets()[2].endpoint(), 1);

        set.listen(16).unwrap();
        assert_eq!(set.listen_socket(), Some(first_fd));
    }

    #[tokio::test]
    async fn test_listener_enforces_limit() {
        let mut set = ListenerSet::bind(&[endpoint("127.0.0.1:0")], Vec::new()).unwrap();
        set.listen(16).unwrap();
        let (_, std_listener) = set.clone_listeners().unwrap().remove(0);

        let limit = Arc::new(Semaphore::new(1));
        let listener = Listener::from_std(std_listener, Arc::clone(&limit)).unwrap();
        let addr = listener.local_addr();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        drop(permit);
        assert_eq!(listener.available_permits(), 1);
    }
}
