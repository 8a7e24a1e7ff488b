//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection:
//!     → TLS handshake (client certificate verified against the client CA)
//!     → admission.rs (ConnectionFilter inspects TransportInfo)
//!     → admitted: handed to the HTTP codec
//!     → rejected: closed without a response
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any admission failure
//! - No trust in client input

pub mod admission;

pub use admission::{connection_filter, AdmissionRejected, ConnectionFilter, RequireClientCommonName};
