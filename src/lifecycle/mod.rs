//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Bind (server.rs):
//!     Validate endpoints → Load TLS contexts → Bind sockets (no listen)
//!
//! Start (server.rs, worker.rs):
//!     Listen all → Spawn workers → Wait for every worker to report ready
//!
//! Shutdown (server.rs, worker.rs, shutdown.rs):
//!     Stop accepting → Drain connections → Join workers
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop()
//!     SIGHUP → update_credentials() + update_ticket_seeds()
//! ```
//!
//! # Design Decisions
//! - Ordered startup: endpoints bound and TLS loaded before any listen
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has timeout: remaining connections are closed after the deadline

pub mod options;
pub mod server;
pub mod shutdown;
pub mod signals;
pub(crate) mod worker;

pub use options::ServerOptions;
pub use server::{HttpServer, ServerAddress, ServerState};
pub use shutdown::Shutdown;
pub use signals::{Signal, Signals};
