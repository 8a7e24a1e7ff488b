//! HTTP connection serving.
//!
//! # Responsibilities
//! - Run the HTTP/1.1 and HTTP/2 codec over an admitted connection
//! - Restrict the codec to the endpoint's protocol marker
//! - Drain gracefully when the worker starts shutting down

use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::config::schema::Protocol;
use crate::error::ConnectionError;
use crate::handler::chain::HandlerChain;
use crate::handler::transaction::dispatch;
use crate::net::connection::TransportInfo;

/// Serve requests on `io` until the client disconnects or `shutdown`
/// flips, in which case in-flight requests finish first.
pub async fn serve_connection<I>(
    io: I,
    transport: Arc<TransportInfo>,
    protocol: Protocol,
    chain: Arc<HandlerChain>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectionError>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connection_id = transport.id;
    let service = service_fn(move |request| {
        dispatch(Arc::clone(&chain), Arc::clone(&transport), request)
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder = match protocol {
        Protocol::Http => builder,
        Protocol::Http1 => builder.http1_only(),
        Protocol::Http2 => builder.http2_only(),
    };
    builder.http1().timer(TokioTimer::new());
    builder.http2().timer(TokioTimer::new());

    let connection = builder.serve_connection(TokioIo::new(io), service);
    tokio::pin!(connection);

    let result = if *shutdown.borrow() {
        connection.as_mut().graceful_shutdown();
        connection.await
    } else {
        tokio::select! {
            result = connection.as_mut() => result,
            _ = shutdown.changed() => {
                tracing::debug!(connection_id = %connection_id, "Draining connection");
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        }
    };

    result.map_err(ConnectionError::Http)
}
