//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FrontendConfig (validated, immutable)
//!     → ServerOptions + endpoints handed to HttpServer
//!
//! On credential change:
//!     watcher.rs detects a certificate/key/CA file change
//!     → HttpServer::update_credentials()
//!     → each secure endpoint publishes a new TLS snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ClientVerification, EndpointConfig, FrontendConfig, ObservabilityConfig, Protocol,
    ServerSettings, TicketSeedSet, TlsCertConfig,
};
pub use validation::{validate_config, validate_endpoints, ValidationError};
pub use watcher::CredentialWatcher;
