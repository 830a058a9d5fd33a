//! Middleware chain
//!
//! Ordered before/after hooks around route dispatch. A before hook may end
//! the pipeline early by returning a ready-to-send response; that is ordinary
//! control flow, not an error, and the dispatcher uses the carried response
//! without consulting the router. Failures are separate: a failing before
//! hook aborts dispatch with an error, a failing after hook is logged and the
//! remaining after hooks still run.

pub mod cors;

pub use cors::{CorsConfig, CorsMiddleware};

use crate::http::{Request, Response};
use tracing::{debug, error};

/// Failure surfaced by a middleware hook or route handler
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// What a before hook decided
pub enum Outcome {
    /// Proceed to the next hook and then to routing.
    Continue,
    /// Skip the rest of the pipeline and send this response verbatim.
    ShortCircuit(Response),
}

/// A pre/post hook pair applied around route dispatch.
pub trait Middleware: Send + Sync {
    /// Runs before routing, in registration order.
    fn before(&self, request: &mut Request) -> Result<Outcome, MiddlewareError>;

    /// Runs after routing, in reverse registration order.
    fn after(&self, response: &mut Response) -> Result<(), MiddlewareError>;
}

/// Ordered middleware sequence
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        MiddlewareChain::default()
    }

    /// Append a middleware; order of addition is execution order.
    pub fn add(&mut self, middleware: Box<dyn Middleware>) {
        self.middlewares.push(middleware);
        debug!(total = self.middlewares.len(), "middleware added to chain");
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run the before hooks in order.
    ///
    /// Stops at the first short-circuit or failure; hooks after that point
    /// never see the request.
    pub fn process_before(&self, request: &mut Request) -> Result<Outcome, MiddlewareError> {
        for middleware in &self.middlewares {
            match middleware.before(request)? {
                Outcome::Continue => {}
                Outcome::ShortCircuit(response) => return Ok(Outcome::ShortCircuit(response)),
            }
        }
        Ok(Outcome::Continue)
    }

    /// Run the after hooks in reverse order, best effort.
    pub fn process_after(&self, response: &mut Response) {
        for middleware in self.middlewares.iter().rev() {
            if let Err(err) = middleware.after(response) {
                error!(%err, "after middleware failed");
            }
        }
    }
}
