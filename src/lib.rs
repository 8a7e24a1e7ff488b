//! Listener and TLS lifecycle core for an HTTP(S) frontend.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client
//!     │
//!     ▼
//!   net::listener ──▶ net::acceptor ──▶ security ──▶ handler
//!   (bind, listen)    (TLS sniff,       (admission)  (filter chain,
//!                      handshake)                     terminal handler)
//!                          ▲
//!                          │ one snapshot per handshake
//!                     tls::context ◀── update_credentials / update_ticket_seeds
//!
//!   lifecycle: bind → start → stop_listening → stop
//!   cross-cutting: config, observability (tracing, metrics)
//! ```

pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod tls;

pub use config::schema::{
    ClientVerification, EndpointConfig, FrontendConfig, Protocol, TicketSeedSet, TlsCertConfig,
};
pub use error::ServerError;
pub use lifecycle::{HttpServer, ServerAddress, ServerOptions, ServerState};
