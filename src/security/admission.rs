//! Connection admission.
//!
//! # Responsibilities
//! - Decide, once per connection, whether it may send requests
//! - Run after the TLS handshake so client certificates can be inspected
//!
//! # Design Decisions
//! - A rejected connection is closed without any HTTP response
//! - Filters are plain closures over `TransportInfo`

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::net::connection::TransportInfo;

/// A connection was refused by the admission filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connection rejected: {reason}")]
pub struct AdmissionRejected {
    reason: String,
}

impl AdmissionRejected {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Admission predicate applied to every accepted connection.
pub type ConnectionFilter =
    Arc<dyn Fn(&TransportInfo) -> Result<(), AdmissionRejected> + Send + Sync>;

/// Wrap a closure as a [`ConnectionFilter`].
pub fn connection_filter<F>(filter: F) -> ConnectionFilter
where
    F: Fn(&TransportInfo) -> Result<(), AdmissionRejected> + Send + Sync + 'static,
{
    Arc::new(filter)
}

/// Admits only TLS connections whose client certificate common name is in
/// an allow list.
#[derive(Debug, Clone)]
pub struct RequireClientCommonName {
    allowed: HashSet<String>,
}

impl RequireClientCommonName {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn check(&self, transport: &TransportInfo) -> Result<(), AdmissionRejected> {
        if !transport.is_secure() {
            return Err(AdmissionRejected::new("plaintext connection"));
        }
        let common_name = transport
            .peer_common_name()
            .ok_or_else(|| AdmissionRejected::new("no client certificate"))?;

        if self.allowed.contains(&common_name) {
            Ok(())
        } else {
            Err(AdmissionRejected::new(format!(
                "client certificate CN {common_name} not allowed"
            )))
        }
    }

    pub fn into_filter(self) -> ConnectionFilter {
        connection_filter(move |transport| self.check(transport))
    }
}
