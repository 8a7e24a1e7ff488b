//! Response collection.
//!
//! # Responsibilities
//! - Give handlers access to the connection they are serving
//! - Accept exactly one response per transaction
//! - Build responses without panicking on bad header input

use std::sync::Arc;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Response, StatusCode};
use http_body_util::Full;

use crate::net::connection::TransportInfo;

/// The response side of a transaction.
pub struct Downstream {
    transport: Arc<TransportInfo>,
    response: Option<Response<Full<Bytes>>>,
}

impl Downstream {
    pub fn new(transport: Arc<TransportInfo>) -> Self {
        Self {
            transport,
            response: None,
        }
    }

    /// The connection this request arrived on.
    pub fn transport(&self) -> &TransportInfo {
        &self.transport
    }

    pub fn has_responded(&self) -> bool {
        self.response.is_some()
    }

    /// Send the full response. Only the first response of a transaction is
    /// kept.
    pub fn send(&mut self, response: Response<Full<Bytes>>) {
        if self.response.is_some() {
            tracing::warn!(
                connection_id = %self.transport.id,
                status = response.status().as_u16(),
                "Response already sent, dropping duplicate"
            );
            return;
        }
        self.response = Some(response);
    }

    pub fn into_response(self) -> Option<Response<Full<Bytes>>> {
        self.response
    }
}

/// An empty response with the given status.
pub fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// Builder for complete (non-streaming) responses.
pub struct ResponseBuilder {
    inner: http::response::Builder,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            inner: Response::builder().status(status),
            body: Bytes::new(),
        }
    }

    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.inner = self.inner.header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Finish the response. Invalid header input yields a 500.
    pub fn build(self) -> Response<Full<Bytes>> {
        self.inner
            .body(Full::new(self.body))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid response, replying 500");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            })
    }

    /// Build and send the response in one step.
    pub fn send_with_eom(self, downstream: &mut Downstream) {
        downstream.send(self.build());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_downstream as downstream;

    #[test]
    fn test_first_response_wins() {
        let mut ds = downstream();
        assert!(!ds.has_responded());

        ResponseBuilder::new(StatusCode::OK).send_with_eom(&mut ds);
        ResponseBuilder::new(StatusCode::NOT_FOUND).send_with_eom(&mut ds);

        assert_eq!(ds.into_response().unwrap().status(), StatusCode::OK);
    }

    #[test]
    fn test_invalid_header_becomes_500() {
        let response = ResponseBuilder::new(StatusCode::OK)
            .header("x-bad", "line\nbreak")
            .build();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_headers_and_body() {
        let response = ResponseBuilder::new(StatusCode::CREATED)
            .header("x-client-cn", "testuser1")
            .body("hello")
            .build();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-client-cn"], "testuser1");
    }
}
