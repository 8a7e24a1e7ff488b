//! One request/response exchange.
//!
//! # Responsibilities
//! - Instantiate the handler chain for each request
//! - Feed ingress events in order, stopping once a response exists
//! - Release the handler with exactly one terminal callback, including when
//!   the connection goes away mid-request

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::request::Parts;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;

use crate::handler::chain::HandlerChain;
use crate::handler::response::status_response;
use crate::handler::{Downstream, HandlerError, RequestHandler, UpgradeProtocol};
use crate::net::connection::TransportInfo;
use crate::observability::metrics;

/// Owns the handler for one request until a terminal callback consumes it.
pub struct Transaction {
    handler: Option<Box<dyn RequestHandler>>,
}

impl Transaction {
    pub fn new(handler: Box<dyn RequestHandler>) -> Self {
        Self {
            handler: Some(handler),
        }
    }

    pub fn on_request(&mut self, head: Parts, downstream: &mut Downstream) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_request(head, downstream);
        }
    }

    pub fn on_upgrade(&mut self, protocol: UpgradeProtocol, downstream: &mut Downstream) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_upgrade(protocol, downstream);
        }
    }

    pub fn on_body(&mut self, chunk: Bytes, downstream: &mut Downstream) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_body(chunk, downstream);
        }
    }

    pub fn on_eom(&mut self, downstream: &mut Downstream) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_eom(downstream);
        }
    }

    /// Release the handler after a successful exchange.
    pub fn complete(mut self) {
        if let Some(handler) = self.handler.take() {
            handler.request_complete();
        }
    }

    /// Release the handler after a failed exchange.
    pub fn fail(mut self, error: HandlerError) {
        if let Some(handler) = self.handler.take() {
            handler.on_error(error);
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        // Reached when the connection closes while the request is in flight.
        if let Some(handler) = self.handler.take() {
            handler.on_error(HandlerError::Aborted);
        }
    }
}

/// Run one request through the chain and produce its response.
pub async fn dispatch(
    chain: Arc<HandlerChain>,
    transport: Arc<TransportInfo>,
    request: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let start = Instant::now();
    let connection_id = transport.id;
    let (head, mut body) = request.into_parts();

    tracing::debug!(
        connection_id = %connection_id,
        method = %head.method,
        path = %head.uri.path(),
        "Dispatching request"
    );

    let upgrade = UpgradeProtocol::requested(&head.headers);
    let mut transaction = Transaction::new(chain.build(&head));
    let mut downstream = Downstream::new(transport);

    transaction.on_request(head, &mut downstream);

    if let Some(protocol) = upgrade {
        if !downstream.has_responded() {
            transaction.on_upgrade(protocol, &mut downstream);
        }
    }

    while !downstream.has_responded() {
        match body.frame().await {
            None => break,
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    if !data.is_empty() {
                        transaction.on_body(data, &mut downstream);
                    }
                }
            }
            Some(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Request body error");
                transaction.fail(HandlerError::Ingress(e.to_string()));
                metrics::record_request(StatusCode::BAD_REQUEST.as_u16(), start);
                return Ok(status_response(StatusCode::BAD_REQUEST));
            }
        }
    }

    if !downstream.has_responded() {
        transaction.on_eom(&mut downstream);
    }

    let response = match downstream.into_response() {
        Some(response) => {
            transaction.complete();
            response
        }
        None => {
            tracing::warn!(connection_id = %connection_id, "Handler produced no response");
            transaction.fail(HandlerError::NoResponse);
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };

    metrics::record_request(response.status().as_u16(), start);
    Ok(response)
}
