//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! EndpointConfig list
//!     → listener.rs (bind all, then listen all; adopt inherited sockets)
//!     → per worker: Listener (accept loop, connection limits)
//!     → acceptor.rs (TLS sniff + handshake, admission)
//!     → connection.rs (lifecycle tracking, TransportInfo)
//!     → Hand off to the handler chain
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Secure endpoints may also serve plaintext when configured to

pub mod acceptor;
pub mod connection;
pub mod listener;

pub use connection::{ConnectionId, ConnectionTracker, SecureTransport, TransportInfo};
pub use listener::{ListenerError, ListenerSet};
