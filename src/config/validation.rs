//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (workers > 0, connection limit > 0)
//! - Check endpoint consistency (TLS options only on secure endpoints)
//! - Detect duplicate bind addresses
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FrontendConfig → Result<(), Vec<ValidationError>>
//! - Endpoint rules are also applied by `HttpServer::bind`, so endpoints
//!   built in code get the same checks as endpoints read from a file

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{ClientVerification, EndpointConfig, FrontendConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("server.worker_threads must be greater than zero")]
    ZeroWorkers,

    #[error("server.max_connections must be greater than zero")]
    ZeroConnections,

    #[error("endpoint {address}: {count} certificates are marked default, at most one is allowed")]
    MultipleDefaults { address: SocketAddr, count: usize },

    #[error("endpoint {address}: client verification needs at least one certificate")]
    ClientVerificationWithoutTls { address: SocketAddr },

    #[error("endpoint {address}: client verification needs client_ca_path")]
    MissingClientCa { address: SocketAddr },

    #[error("endpoint {address}: allow_insecure_on_secure_port set on a plaintext endpoint")]
    InsecureWithoutTls { address: SocketAddr },

    #[error("endpoint {address}: ticket seeds set on a plaintext endpoint")]
    SeedsWithoutTls { address: SocketAddr },

    #[error("endpoint {address}: ticket seed set has no current seed")]
    NoCurrentSeed { address: SocketAddr },

    #[error("endpoint {address}: ticket seed is not valid hex")]
    InvalidSeed { address: SocketAddr },

    #[error("endpoint {address} is configured more than once")]
    DuplicateAddress { address: SocketAddr },
}

/// Validate a whole configuration file.
pub fn validate_config(config: &FrontendConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }
    if config.server.worker_threads == 0 {
        errors.push(ValidationError::ZeroWorkers);
    }
    if config.server.max_connections == 0 {
        errors.push(ValidationError::ZeroConnections);
    }

    if let Err(endpoint_errors) = validate_endpoints(&config.endpoints) {
        errors.extend(endpoint_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a set of endpoints. An empty set is valid.
pub fn validate_endpoints(endpoints: &[EndpointConfig]) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for endpoint in endpoints {
        // Ephemeral ports never collide with each other.
        if endpoint.address.port() != 0 && !seen.insert(endpoint.address) {
            errors.push(ValidationError::DuplicateAddress {
                address: endpoint.address,
            });
        }
        validate_endpoint(endpoint, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_endpoint(endpoint: &EndpointConfig, errors: &mut Vec<ValidationError>) {
    let address = endpoint.address;

    let defaults = endpoint.certificates.iter().filter(|c| c.is_default).count();
    if defaults > 1 {
        errors.push(ValidationError::MultipleDefaults {
            address,
            count: defaults,
        });
    }

    if endpoint.client_verification != ClientVerification::None {
        if !endpoint.is_secure() {
            errors.push(ValidationError::ClientVerificationWithoutTls { address });
        }
        if endpoint.client_ca_path.is_none() {
            errors.push(ValidationError::MissingClientCa { address });
        }
    }

    if endpoint.allow_insecure_on_secure_port && !endpoint.is_secure() {
        errors.push(ValidationError::InsecureWithoutTls { address });
    }

    if let Some(seeds) = &endpoint.ticket_seeds {
        if !endpoint.is_secure() {
            errors.push(ValidationError::SeedsWithoutTls { address });
        }
        if seeds.current.is_empty() {
            errors.push(ValidationError::NoCurrentSeed { address });
        }
        if seeds
            .current
            .iter()
            .chain(seeds.previous.iter())
            .any(|seed| hex::decode(seed).is_err())
        {
            errors.push(ValidationError::InvalidSeed { address });
        }
    }
}
