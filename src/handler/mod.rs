//! Request handler chain subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted connection (TransportInfo)
//!     → server.rs (hyper HTTP/1.1 + HTTP/2 codec, graceful drain)
//!     → transaction.rs (one handler instance per request, event dispatch)
//!     → chain.rs (filter 0 wraps filter 1 wraps ... wraps the terminal handler)
//!     → response.rs (Downstream collects the response)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Handlers are owned by their transaction and consumed by exactly one
//!   terminal callback, so "complete" and "error" cannot both happen
//! - Filters decide per event whether to forward inward or answer directly

pub mod chain;
pub mod filters;
pub mod handlers;
pub mod response;
pub mod server;
pub mod transaction;

use bytes::Bytes;
use http::header::{CONNECTION, UPGRADE};
use http::request::Parts;
use http::HeaderMap;
use thiserror::Error;

pub use chain::{FilterFactory, HandlerChain, HandlerFactory, RequestHandlerChain};
pub use filters::{BodyLimitFilter, Passthrough, RequestIdFilter, X_REQUEST_ID};
pub use handlers::{ClientIdentity, NotFound, X_CLIENT_CN};
pub use response::{Downstream, ResponseBuilder};

/// Why a transaction ended without completing normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("error reading request body: {0}")]
    Ingress(String),

    #[error("no response produced by end of message")]
    NoResponse,

    #[error("transaction aborted")]
    Aborted,
}

/// Protocol a client asked to switch to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeProtocol {
    Websocket,
    Other(String),
}

impl UpgradeProtocol {
    /// The protocol named by `Upgrade`, when `Connection` carries the
    /// `upgrade` token.
    pub fn requested(headers: &HeaderMap) -> Option<Self> {
        let wants_upgrade = headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !wants_upgrade {
            return None;
        }

        let protocol = headers.get(UPGRADE)?.to_str().ok()?.trim();
        if protocol.eq_ignore_ascii_case("websocket") {
            Some(UpgradeProtocol::Websocket)
        } else {
            Some(UpgradeProtocol::Other(protocol.to_string()))
        }
    }
}

/// Per-request event sink.
///
/// Ingress events arrive in order: `on_request`, optionally `on_upgrade`,
/// zero or more `on_body`, then `on_eom`. Exactly one of `request_complete`
/// or `on_error` is called last, consuming the handler.
pub trait RequestHandler: Send {
    fn on_request(&mut self, head: Parts, downstream: &mut Downstream);

    fn on_body(&mut self, _chunk: Bytes, _downstream: &mut Downstream) {}

    fn on_upgrade(&mut self, _protocol: UpgradeProtocol, _downstream: &mut Downstream) {}

    fn on_eom(&mut self, downstream: &mut Downstream);

    fn request_complete(self: Box<Self>) {}

    fn on_error(self: Box<Self>, _error: HandlerError) {}
}

#[cfg(test)]
pub(crate) fn test_downstream() -> Downstream {
    use crate::net::connection::{ConnectionId, TransportInfo};

    let addr = "127.0.0.1:1".parse().unwrap();
    Downstream::new(std::sync::Arc::new(TransportInfo::plaintext(
        ConnectionId::new(),
        addr,
        addr,
        std::time::Instant::now(),
    )))
}
