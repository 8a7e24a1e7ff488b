//! TLS context subsystem.
//!
//! # Data Flow
//! ```text
//! EndpointConfig (certificates, client CA, ticket seeds)
//!     → certs.rs (PEM loading, SNI certificate selection)
//!     → tickets.rs (seed-derived session ticket keys)
//!     → context.rs (immutable TlsSnapshot published via ArcSwap)
//!     → acceptor takes one snapshot per handshake
//!
//! On credential or seed update:
//!     context.rs rebuilds a complete snapshot off the hot path
//!     → atomic swap; in-flight handshakes keep the snapshot they started with
//! ```
//!
//! # Design Decisions
//! - Snapshots are never mutated; an update either publishes a whole new
//!   snapshot or leaves the previous one serving
//! - The crypto provider is passed explicitly rather than installed
//!   process-wide

pub mod certs;
pub mod context;
pub mod identity;
pub mod tickets;

use std::path::PathBuf;

use thiserror::Error;

pub use certs::{CertStore, SniResolver};
pub use context::{TicketPolicy, TlsContextManager, TlsSnapshot};
pub use identity::{common_name, subject_names};
pub use tickets::SeedTicketer;

/// Errors raised while building TLS state.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("unusable private key in {path}: {source}")]
    InvalidKey {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("no certificates configured")]
    NoCertificateConfigured,

    #[error("client verification needs a client CA path")]
    MissingClientCa,

    #[error("invalid client CA certificate in {path}: {source}")]
    ClientCa {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("failed to build client verifier: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),

    #[error("ticket seed set has no current seed")]
    NoCurrentSeed,

    #[error("ticket seed is not valid hex: {0}")]
    InvalidSeed(#[from] hex::FromHexError),

    #[error("ticket key derivation failed")]
    KeyDerivation,

    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}
