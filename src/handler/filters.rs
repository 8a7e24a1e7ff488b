//! Stock filters.

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::request::Parts;
use http::{HeaderValue, StatusCode};
use uuid::Uuid;

use crate::handler::chain::FilterFactory;
use crate::handler::response::ResponseBuilder;
use crate::handler::{Downstream, HandlerError, RequestHandler, UpgradeProtocol};

/// Header name for request ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Forwards every event unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl FilterFactory for Passthrough {
    fn wrap(&self, inner: Box<dyn RequestHandler>, _head: &Parts) -> Box<dyn RequestHandler> {
        Box::new(PassthroughFilter { inner })
    }
}

struct PassthroughFilter {
    inner: Box<dyn RequestHandler>,
}

impl RequestHandler for PassthroughFilter {
    fn on_request(&mut self, head: Parts, downstream: &mut Downstream) {
        self.inner.on_request(head, downstream);
    }

    fn on_body(&mut self, chunk: Bytes, downstream: &mut Downstream) {
        self.inner.on_body(chunk, downstream);
    }

    fn on_upgrade(&mut self, protocol: UpgradeProtocol, downstream: &mut Downstream) {
        self.inner.on_upgrade(protocol, downstream);
    }

    fn on_eom(&mut self, downstream: &mut Downstream) {
        self.inner.on_eom(downstream);
    }

    fn request_complete(self: Box<Self>) {
        self.inner.request_complete();
    }

    fn on_error(self: Box<Self>, error: HandlerError) {
        self.inner.on_error(error);
    }
}

/// Adds a UUID v4 `x-request-id` header when the client did not send one.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdFilter;

impl FilterFactory for RequestIdFilter {
    fn wrap(&self, inner: Box<dyn RequestHandler>, _head: &Parts) -> Box<dyn RequestHandler> {
        Box::new(RequestIdHandler { inner })
    }
}

struct RequestIdHandler {
    inner: Box<dyn RequestHandler>,
}

impl RequestHandler for RequestIdHandler {
    fn on_request(&mut self, mut head: Parts, downstream: &mut Downstream) {
        if !head.headers.contains_key(X_REQUEST_ID) {
            let id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                head.headers.insert(X_REQUEST_ID, value);
            }
        }
        self.inner.on_request(head, downstream);
    }

    fn on_body(&mut self, chunk: Bytes, downstream: &mut Downstream) {
        self.inner.on_body(chunk, downstream);
    }

    fn on_upgrade(&mut self, protocol: UpgradeProtocol, downstream: &mut Downstream) {
        self.inner.on_upgrade(protocol, downstream);
    }

    fn on_eom(&mut self, downstream: &mut Downstream) {
        self.inner.on_eom(downstream);
    }

    fn request_complete(self: Box<Self>) {
        self.inner.request_complete();
    }

    fn on_error(self: Box<Self>, error: HandlerError) {
        self.inner.on_error(error);
    }
}

/// Answers 413 once a request body exceeds `max_bytes`, without
/// forwarding the excess.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimitFilter {
    max_bytes: usize,
}

impl BodyLimitFilter {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }
}

impl FilterFactory for BodyLimitFilter {
    fn wrap(&self, inner: Box<dyn RequestHandler>, _head: &Parts) -> Box<dyn RequestHandler> {
        Box::new(BodyLimitHandler {
            inner,
            max_bytes: self.max_bytes,
            received: 0,
            rejected: false,
        })
    }
}

struct BodyLimitHandler {
    inner: Box<dyn RequestHandler>,
    max_bytes: usize,
    received: usize,
    rejected: bool,
}

impl BodyLimitHandler {
    fn reject(&mut self, downstream: &mut Downstream) {
        self.rejected = true;
        tracing::debug!(
            connection_id = %downstream.transport().id,
            limit = self.max_bytes,
            "Request body too large"
        );
        ResponseBuilder::new(StatusCode::PAYLOAD_TOO_LARGE).send_with_eom(downstream);
    }
}

impl RequestHandler for BodyLimitHandler {
    fn on_request(&mut self, head: Parts, downstream: &mut Downstream) {
        let declared = head
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_bytes) {
            self.reject(downstream);
            return;
        }
        self.inner.on_request(head, downstream);
    }

    fn on_body(&mut self, chunk: Bytes, downstream: &mut Downstream) {
        if self.rejected {
            return;
        }
        self.received += chunk.len();
        if self.received > self.max_bytes {
            self.reject(downstream);
            return;
        }
        self.inner.on_body(chunk, downstream);
    }

    fn on_upgrade(&mut self, protocol: UpgradeProtocol, downstream: &mut Downstream) {
        if !self.rejected {
            self.inner.on_upgrade(protocol, downstream);
        }
    }

    fn on_eom(&mut self, downstream: &mut Downstream) {
        if !self.rejected {
            self.inner.on_eom(downstream);
        }
    }

    fn request_complete(self: Box<Self>) {
        self.inner.request_complete();
    }

    fn on_error(self: Box<Self>, error: HandlerError) {
        self.inner.on_error(error);
    }
}
