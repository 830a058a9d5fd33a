//! CORS middleware
//!
//! A request is cross-origin when it carries a non-empty `Origin` header
//! whose value differs from the configured server origin. Cross-origin
//! preflights (`OPTIONS`) are answered directly from the before hook without
//! touching the router; ordinary cross-origin responses get their
//! `Access-Control-Allow-*` headers from the after hook.

use super::{Middleware, MiddlewareError, Outcome};
use crate::http::{Method, Request, Response, Status};
use tracing::{debug, warn};

/// CORS policy configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Permitted origins; `"*"` is a wildcard entry.
    pub allow_origins: Vec<String>,
    /// Methods advertised to the client
    pub allow_methods: Vec<String>,
    /// Request headers advertised to the client
    pub allow_headers: Vec<String>,
    /// This server's own origin, used to classify same-origin requests.
    pub server_origin: String,
    /// Whether `Access-Control-Allow-Credentials` is emitted
    pub allow_credentials: bool,
    /// `Access-Control-Max-Age` value in seconds
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allow_origins: vec!["*".to_string()],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
                .map(String::from)
                .to_vec(),
            allow_headers: ["Content-Type", "Authorization"].map(String::from).to_vec(),
            server_origin: String::new(),
            allow_credentials: false,
            max_age: 0,
        }
    }
}

/// Reference CORS middleware
pub struct CorsMiddleware {
    config: CorsConfig,
}

impl CorsMiddleware {
    pub fn new(config: CorsConfig) -> Self {
        CorsMiddleware { config }
    }

    fn is_cross_origin(&self, origin: &str) -> bool {
        !origin.is_empty() && origin != self.config.server_origin
    }

    fn has_wildcard(&self) -> bool {
        self.config.allow_origins.iter().any(|o| o == "*")
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config.allow_origins.is_empty()
            || self.has_wildcard()
            || self.config.allow_origins.iter().any(|o| o == origin)
    }

    fn preflight_response(&self, origin: &str) -> Response {
        let mut response = Response::new();

        if !self.is_origin_allowed(origin) {
            warn!(origin, "preflight from origin that is not allowed");
            response.set_status(Status::FORBIDDEN);
            return response;
        }

        debug!(origin, "answering CORS preflight");
        response.set_status(Status::NO_CONTENT);
        response.set_header("Access-Control-Allow-Origin", origin);
        if self.config.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
        if !self.config.allow_methods.is_empty() {
            response.set_header(
                "Access-Control-Allow-Methods",
                self.config.allow_methods.join(","),
            );
        }
        if !self.config.allow_headers.is_empty() {
            response.set_header(
                "Access-Control-Allow-Headers",
                self.config.allow_headers.join(","),
            );
        }
        response.set_header("Access-Control-Max-Age", self.config.max_age.to_string());
        response
    }
}

impl Middleware for CorsMiddleware {
    fn before(&self, request: &mut Request) -> Result<Outcome, MiddlewareError> {
        let origin = request.header("Origin").unwrap_or("").to_string();

        if request.method() == Method::Options && self.is_cross_origin(&origin) {
            return Ok(Outcome::ShortCircuit(self.preflight_response(&origin)));
        }

        Ok(Outcome::Continue)
    }

    fn after(&self, response: &mut Response) -> Result<(), MiddlewareError> {
        let origin = response.request_origin().to_string();

        if !self.is_cross_origin(&origin) || !self.is_origin_allowed(&origin) {
            return Ok(());
        }

        let allow_origin = if self.has_wildcard() { "*" } else { origin.as_str() };
        response.set_header("Access-Control-Allow-Origin", allow_origin);
        if self.config.allow_credentials {
            response.set_header("Access-Control-Allow-Credentials", "true");
        }
        if !self.config.allow_methods.is_empty() {
            response.set_header(
                "Access-Control-Allow-Methods",
                self.config.allow_methods.join(","),
            );
        }
        if !self.config.allow_headers.is_empty() {
            response.set_header(
                "Access-Control-Allow-Headers",
                self.config.allow_headers.join(","),
            );
        }
        Ok(())
    }
}
