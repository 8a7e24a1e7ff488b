//! Server lifecycle controller.
//!
//! # Responsibilities
//! - Own endpoints, listening sockets, TLS contexts and workers
//! - Drive the state machine: bind, start, stop listening, stop
//! - Apply credential and ticket seed updates to every secure endpoint
//!
//! # State Machine
//! ```text
//! Unbound ──bind──▶ Bound ──start──▶ Running ──stop_listening──▶ StoppingListeners
//!    │                │                 │                               │
//!    │                └────────────── stop ─────────────────────────────┴──▶ Stopped
//!    └──(bind/start failure)──▶ Failed ──stop──▶ Stopped
//! ```
//!
//! # Design Decisions
//! - One mutex serializes lifecycle operations; callbacks run after it is
//!   released
//! - TLS updates only read the endpoint list under the lock, then rebuild
//!   snapshots without holding it

use std::fmt;
use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Semaphore;

use crate::config::schema::{EndpointConfig, Protocol, TicketSeedSet};
use crate::config::validation::validate_endpoints;
use crate::error::ServerError;
use crate::lifecycle::options::ServerOptions;
use crate::lifecycle::worker::AcceptorWorker;
use crate::net::acceptor::{EndpointRuntime, ServeContext};
use crate::net::connection::ConnectionTracker;
use crate::net::listener::ListenerSet;
use crate::tls::{TicketPolicy, TlsContextManager};

/// Lifecycle state of an [`HttpServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unbound,
    Bound,
    Running,
    StoppingListeners,
    Stopped,
    Failed,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Unbound => "unbound",
            ServerState::Bound => "bound",
            ServerState::Running => "running",
            ServerState::StoppingListeners => "stopping listeners",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A bound address as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAddress {
    pub address: SocketAddr,
    pub protocol: Protocol,
    /// Whether the endpoint serves TLS. False for endpoints configured with
    /// certificates that degraded to plaintext.
    pub secure: bool,
}

struct ServerInner {
    state: ServerState,
    endpoints: Vec<Arc<EndpointRuntime>>,
    listeners: ListenerSet,
    addresses: Vec<ServerAddress>,
    workers: Vec<AcceptorWorker>,
    failure: Option<String>,
    existing_sockets: Vec<OwnedFd>,
}

/// An HTTP(S) server with explicit bind/start/stop control.
pub struct HttpServer {
    threads: usize,
    listen_backlog: i32,
    shutdown_timeout: std::time::Duration,
    ticket_policy: TicketPolicy,
    ctx: Arc<ServeContext>,
    inner: Mutex<ServerInner>,
}

impl HttpServer {
    pub fn new(mut options: ServerOptions) -> Self {
        let existing_sockets = options.take_existing_sockets();
        let ctx = Arc::new(ServeContext {
            chain: Arc::clone(&options.handler_chain),
            connection_filter: options.connection_filter.clone(),
            tracker: ConnectionTracker::new(),
            connection_limit: Arc::new(Semaphore::new(options.max_connections.max(1))),
            handshake_timeout: options.handshake_timeout,
        });

        Self {
            threads: options.threads.max(1),
            listen_backlog: options.listen_backlog,
            shutdown_timeout: options.shutdown_timeout,
            ticket_policy: options.ticket_policy(),
            ctx,
            inner: Mutex::new(ServerInner {
                state: ServerState::Unbound,
                endpoints: Vec::new(),
                listeners: ListenerSet::empty(),
                addresses: Vec::new(),
                workers: Vec::new(),
                failure: None,
                existing_sockets,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    /// Bind every endpoint without listening. A failure is returned and also
    /// reported by the next `start()`.
    pub fn bind(&self, endpoints: Vec<EndpointConfig>) -> Result<(), ServerError> {
        let mut inner = self.lock();
        if inner.state != ServerState::Unbound {
            return Err(ServerError::InvalidState {
                operation: "bind",
                state: inner.state,
            });
        }
        self.bind_locked(&mut inner, endpoints)
    }

    fn bind_locked(
        &self,
        inner: &mut ServerInner,
        mut endpoints: Vec<EndpointConfig>,
    ) -> Result<(), ServerError> {
        let result = self.bind_endpoints(inner, &mut endpoints);
        match &result {
            Ok(()) => inner.state = ServerState::Bound,
            Err(e) => {
                tracing::error!(error = %e, "Bind failed");
                inner.state = ServerState::Failed;
                inner.failure = Some(e.to_string());
            }
        }
        result
    }

    fn bind_endpoints(
        &self,
        inner: &mut ServerInner,
        endpoints: &mut Vec<EndpointConfig>,
    ) -> Result<(), ServerError> {
        validate_endpoints(endpoints).map_err(ServerError::InvalidEndpoints)?;

        if endpoints.is_empty() && !inner.existing_sockets.is_empty() {
            // Adopted sockets still need an endpoint to describe them.
            endpoints.push(EndpointConfig::new(
                SocketAddr::from(([0, 0, 0, 0], 0)),
                Protocol::Http,
            ));
        }

        let mut runtimes = Vec::with_capacity(endpoints.len());
        for (index, config) in endpoints.iter().enumerate() {
            let tls = if config.is_secure() {
                match TlsContextManager::new(config, self.ticket_policy) {
                    Ok(manager) => Some(Arc::new(manager)),
                    Err(source) if config.strict_tls => {
                        return Err(ServerError::CertificateLoad {
                            endpoint: config.address,
                            source,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(
                            endpoint = %config.address,
                            error = %e,
                            "Certificates unusable, serving endpoint as plaintext"
                        );
                        None
                    }
                }
            } else {
                None
            };
            runtimes.push(Arc::new(EndpointRuntime {
                index,
                config: config.clone(),
                tls,
            }));
        }

        let existing = std::mem::take(&mut inner.existing_sockets);
        let listeners = ListenerSet::bind(endpoints, existing)?;

        inner.addresses = listeners
            .sockets()
            .iter()
            .map(|socket| {
                let endpoint = &runtimes[socket.endpoint()];
                ServerAddress {
                    address: socket.local_addr(),
                    protocol: endpoint.config.protocol,
                    secure: endpoint.tls.is_some(),
                }
            })
            .collect();
        inner.listeners = listeners;
        inner.endpoints = runtimes;
        Ok(())
    }

    /// Listen on every bound socket and start the workers. Binds first when
    /// called on an unbound server. Exactly one callback runs before this
    /// returns.
    pub fn start<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(),
        F: FnOnce(ServerError),
    {
        match self.start_workers() {
            Ok(()) => on_success(),
            Err(e) => {
                tracing::error!(error = %e, "Server failed to start");
                on_failure(e)
            }
        }
    }

    fn start_workers(&self) -> Result<(), ServerError> {
        let mut inner = self.lock();
        match inner.state {
            ServerState::Unbound => self.bind_locked(&mut inner, Vec::new())?,
            ServerState::Bound => {}
            ServerState::Failed => {
                let failure = inner.failure.clone().unwrap_or_else(|| "unknown".to_string());
                return Err(ServerError::PreviousFailure(failure));
            }
            state => {
                return Err(ServerError::InvalidState {
                    operation: "start",
                    state,
                })
            }
        }

        let result = self.spawn_workers(&mut inner);
        match &result {
            Ok(()) => {
                inner.state = ServerState::Running;
                tracing::info!(
                    workers = inner.workers.len(),
                    addresses = ?inner.addresses.iter().map(|a| a.address).collect::<Vec<_>>(),
                    "Server started"
                );
            }
            Err(e) => {
                for worker in std::mem::take(&mut inner.workers) {
                    worker.join();
                }
                inner.listeners.close();
                inner.state = ServerState::Failed;
                inner.failure = Some(e.to_string());
            }
        }
        result
    }

    fn spawn_workers(&self, inner: &mut ServerInner) -> Result<(), ServerError> {
        inner.listeners.listen(self.listen_backlog)?;

        let (ready_tx, ready_rx) = std_mpsc::channel();
        for id in 0..self.threads {
            let listeners = inner
                .listeners
                .clone_listeners()?
                .into_iter()
                .map(|(endpoint, listener)| (Arc::clone(&inner.endpoints[endpoint]), listener))
                .collect();
            let worker = AcceptorWorker::spawn(
                id,
                listeners,
                Arc::clone(&self.ctx),
                self.shutdown_timeout,
                ready_tx.clone(),
            )?;
            inner.workers.push(worker);
        }
        drop(ready_tx);

        for _ in 0..inner.workers.len() {
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    return Err(ServerError::Worker {
                        worker: inner.workers.len(),
                        source: std::io::Error::other("worker exited before becoming ready"),
                    })
                }
            }
        }
        Ok(())
    }

    /// Stop accepting new connections. Existing connections keep being
    /// served until `stop()`.
    pub fn stop_listening(&self) {
        let mut inner = self.lock();
        if inner.state != ServerState::Running {
            tracing::debug!(state = %inner.state, "stop_listening ignored");
            return;
        }

        for worker in &inner.workers {
            worker.stop_accepting();
        }
        inner.listeners.close();
        inner.state = ServerState::StoppingListeners;
        tracing::info!("Stopped listening");
    }

    /// Stop listening, drain connections and join all workers. Safe to call
    /// repeatedly and concurrently; later calls return once the first has
    /// finished.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state == ServerState::Stopped {
            return;
        }

        let workers = std::mem::take(&mut inner.workers);
        for worker in &workers {
            worker.begin_shutdown();
        }
        for worker in workers {
            worker.join();
        }

        inner.listeners.close();
        inner.existing_sockets.clear();
        inner.state = ServerState::Stopped;
        tracing::info!("Server stopped");
    }

    /// Descriptor of the first listening socket, `None` unless running.
    pub fn listen_socket(&self) -> Option<RawFd> {
        let inner = self.lock();
        if inner.state != ServerState::Running {
            return None;
        }
        inner.listeners.listen_socket()
    }

    /// Addresses bound by the last successful bind.
    pub fn addresses(&self) -> Vec<ServerAddress> {
        self.lock().addresses.clone()
    }

    fn secure_endpoints(&self) -> Vec<(SocketAddr, Arc<TlsContextManager>)> {
        self.lock()
            .endpoints
            .iter()
            .filter_map(|e| e.tls.as_ref().map(|tls| (e.config.address, Arc::clone(tls))))
            .collect()
    }

    /// Reload certificate, key and client CA files on every secure endpoint.
    /// Endpoints that fail keep serving their previous credentials.
    pub fn update_credentials(&self) -> Result<(), ServerError> {
        let mut first_error = None;
        for (endpoint, tls) in self.secure_endpoints() {
            if let Err(source) = tls.update_credentials() {
                first_error.get_or_insert(ServerError::CredentialUpdate { endpoint, source });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Replace the ticket seeds of the secure endpoint configured at
    /// `address`, leaving every other endpoint untouched.
    pub fn update_endpoint_ticket_seeds(
        &self,
        address: SocketAddr,
        seeds: TicketSeedSet,
    ) -> Result<(), ServerError> {
        let (endpoint, tls) = self
            .secure_endpoints()
            .into_iter()
            .find(|(endpoint, _)| *endpoint == address)
            .ok_or(ServerError::UnknownEndpoint(address))?;
        tls.update_ticket_seeds(seeds)
            .map(|_| ())
            .map_err(|source| ServerError::TicketSeeds { endpoint, source })
    }

    /// Replace the ticket seeds of every secure endpoint.
    pub fn update_ticket_seeds(&self, seeds: TicketSeedSet) -> Result<(), ServerError> {
        let mut first_error = None;
        for (endpoint, tls) in self.secure_endpoints() {
            if let Err(source) = tls.update_ticket_seeds(seeds.clone()) {
                first_error.get_or_insert(ServerError::TicketSeeds { endpoint, source });
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("state", &self.state())
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}
