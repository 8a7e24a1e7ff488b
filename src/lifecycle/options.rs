//! Server construction options.

use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::ServerSettings;
use crate::handler::chain::HandlerChain;
use crate::security::ConnectionFilter;
use crate::tls::TicketPolicy;

/// Everything an [`HttpServer`](crate::lifecycle::HttpServer) needs besides
/// its endpoints.
pub struct ServerOptions {
    /// Acceptor worker threads.
    pub threads: usize,
    /// Request handling pipeline shared by all workers.
    pub handler_chain: Arc<HandlerChain>,
    /// Admission predicate run once per connection.
    pub connection_filter: Option<ConnectionFilter>,
    /// Maximum concurrent connections across all workers.
    pub max_connections: usize,
    pub listen_backlog: i32,
    /// Budget for the first byte and the TLS handshake.
    pub handshake_timeout: Duration,
    /// Budget for draining open connections on stop.
    pub shutdown_timeout: Duration,
    pub ticket_seed_generations: usize,
    pub ticket_lifetime: Duration,
    existing_sockets: Vec<OwnedFd>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl ServerOptions {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            threads: settings.worker_threads.max(1),
            handler_chain: Arc::new(HandlerChain::default()),
            connection_filter: None,
            max_connections: settings.max_connections.max(1),
            listen_backlog: settings.listen_backlog,
            handshake_timeout: Duration::from_millis(settings.handshake_timeout_ms),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
            ticket_seed_generations: settings.ticket_seed_generations,
            ticket_lifetime: Duration::from_secs(u64::from(settings.ticket_lifetime_secs)),
            existing_sockets: Vec::new(),
        }
    }

    /// Serve the first endpoint on an already bound socket instead of binding
    /// its address.
    pub fn use_existing_socket(&mut self, socket: impl Into<OwnedFd>) {
        self.existing_sockets.push(socket.into());
    }

    /// Serve the first endpoint on several already bound sockets. The first
    /// of them is reported by `listen_socket()`.
    pub fn use_existing_sockets<I>(&mut self, sockets: I)
    where
        I: IntoIterator,
        I::Item: Into<OwnedFd>,
    {
        self.existing_sockets
            .extend(sockets.into_iter().map(Into::into));
    }

    pub(crate) fn take_existing_sockets(&mut self) -> Vec<OwnedFd> {
        std::mem::take(&mut self.existing_sockets)
    }

    pub(crate) fn ticket_policy(&self) -> TicketPolicy {
        TicketPolicy {
            generations: self.ticket_seed_generations,
            lifetime: self.ticket_lifetime,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("threads", &self.threads)
            .field("handler_chain", &self.handler_chain)
            .field("connection_filter", &self.connection_filter.is_some())
            .field("max_connections", &self.max_connections)
            .field("listen_backlog", &self.listen_backlog)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("ticket_seed_generations", &self.ticket_seed_generations)
            .field("ticket_lifetime", &self.ticket_lifetime)
            .field("existing_sockets", &self.existing_sockets.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = ServerSettings {
            worker_threads: 0,
            handshake_timeout_ms: 250,
            ..ServerSettings::default()
        };
        let options = ServerOptions::from_settings(&settings);
        assert_eq!(options.threads, 1);
        assert_eq!(options.handshake_timeout, Duration::from_millis(250));
        assert_eq!(options.ticket_policy().generations, 1);
    }

    #[test]
    fn test_existing_sockets_are_taken_once() {
        let mut options = ServerOptions::default();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        options.use_existing_socket(listener);

        assert_eq!(options.take_existing_sockets().len(), 1);
        assert!(options.take_existing_sockets().is_empty());
    }
}
