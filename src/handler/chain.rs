//! Ordered filter chain ending in a terminal handler.
//!
//! Filter 0 is outermost: it sees every ingress event first and the
//! response decisions of everything inside it.

use std::fmt;
use std::sync::Arc;

use http::request::Parts;

use crate::handler::handlers::NotFound;
use crate::handler::RequestHandler;

/// Creates the filter instance for one request, wrapping the next handler.
pub trait FilterFactory: Send + Sync {
    fn wrap(&self, inner: Box<dyn RequestHandler>, head: &Parts) -> Box<dyn RequestHandler>;

    /// Called on each worker thread before it accepts connections.
    fn on_server_start(&self, _worker: usize) {}

    /// Called on each worker thread after it stopped serving.
    fn on_server_stop(&self) {}
}

/// Creates the terminal handler for one request.
pub trait HandlerFactory: Send + Sync {
    fn create(&self, head: &Parts) -> Box<dyn RequestHandler>;

    fn on_server_start(&self, _worker: usize) {}

    fn on_server_stop(&self) {}
}

/// Builder for a [`HandlerChain`].
#[derive(Default)]
pub struct RequestHandlerChain {
    filters: Vec<Arc<dyn FilterFactory>>,
}

impl RequestHandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter inside the filters added so far.
    pub fn add_filter<F: FilterFactory + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Finish the chain with its terminal handler.
    pub fn handler<H: HandlerFactory + 'static>(self, handler: H) -> Arc<HandlerChain> {
        Arc::new(HandlerChain {
            filters: self.filters,
            terminal: Arc::new(handler),
        })
    }
}

/// Immutable chain shared by all workers.
pub struct HandlerChain {
    filters: Vec<Arc<dyn FilterFactory>>,
    terminal: Arc<dyn HandlerFactory>,
}

impl HandlerChain {
    /// Instantiate the chain for one request.
    pub fn build(&self, head: &Parts) -> Box<dyn RequestHandler> {
        let terminal = self.terminal.create(head);
        self.filters
            .iter()
            .rev()
            .fold(terminal, |inner, filter| filter.wrap(inner, head))
    }

    /// Number of stages including the terminal handler.
    pub fn stages(&self) -> usize {
        self.filters.len() + 1
    }

    pub fn on_server_start(&self, worker: usize) {
        for filter in &self.filters {
            filter.on_server_start(worker);
        }
        self.terminal.on_server_start(worker);
    }

    pub fn on_server_stop(&self) {
        for filter in &self.filters {
            filter.on_server_stop();
        }
        self.terminal.on_server_stop();
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
            terminal: Arc::new(NotFound),
        }
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}
