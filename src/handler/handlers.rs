//! Stock terminal handlers.

use http::request::Parts;
use http::{HeaderValue, StatusCode};

use crate::handler::chain::HandlerFactory;
use crate::handler::filters::X_REQUEST_ID;
use crate::handler::response::ResponseBuilder;
use crate::handler::{Downstream, RequestHandler};

/// Header carrying the client certificate common name.
pub const X_CLIENT_CN: &str = "x-client-cn";

/// Answers every request with 200 `hello`, reporting the client certificate
/// common name in `x-client-cn` (empty without a certificate).
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIdentity;

impl HandlerFactory for ClientIdentity {
    fn create(&self, _head: &Parts) -> Box<dyn RequestHandler> {
        Box::new(ClientIdentityHandler { request_id: None })
    }
}

struct ClientIdentityHandler {
    request_id: Option<HeaderValue>,
}

impl RequestHandler for ClientIdentityHandler {
    fn on_request(&mut self, head: Parts, _downstream: &mut Downstream) {
        self.request_id = head.headers.get(X_REQUEST_ID).cloned();
    }

    fn on_eom(&mut self, downstream: &mut Downstream) {
        let common_name = downstream.transport().peer_common_name().unwrap_or_default();

        let mut response = ResponseBuilder::new(StatusCode::OK).header(X_CLIENT_CN, common_name);
        if let Some(id) = self.request_id.take() {
            response = response.header(X_REQUEST_ID, id);
        }
        response.body("hello").send_with_eom(downstream);
    }
}

/// Answers every request with 404.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl HandlerFactory for NotFound {
    fn create(&self, _head: &Parts) -> Box<dyn RequestHandler> {
        Box::new(NotFoundHandler)
    }
}

struct NotFoundHandler;

impl RequestHandler for NotFoundHandler {
    fn on_request(&mut self, _head: Parts, _downstream: &mut Downstream) {}

    fn on_eom(&mut self, downstream: &mut Downstream) {
        ResponseBuilder::new(StatusCode::NOT_FOUND).send_with_eom(downstream);
    }
}
