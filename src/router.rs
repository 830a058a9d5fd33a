//! Routing engine
//!
//! Combined exact and parametric matching keyed by `(method, path)`. Exact
//! routes are hash lookups and always win; parametric routes are compiled
//! patterns scanned in registration order. Both flavors accept either a
//! boxed callback or a handler object.
//!
//! Registration happens during setup only; once the server enters its
//! serving phase the tables are shared read-only across workers.

use crate::http::{Method, Request, Response};
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

/// Result type for route handlers and callbacks
pub type HandlerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Route callback: borrows the request, fills in the response.
pub type HandlerFn = Box<dyn Fn(&Request, &mut Response) -> HandlerResult + Send + Sync>;

/// Handler object for routes whose logic warrants more than a closure.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, request: &Request, response: &mut Response) -> HandlerResult;
}

/// Registration errors
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("unsupported pattern character '{1}' in route {0}")]
    UnsupportedPattern(String, char),

    #[error("pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    method: Method,
    path: String,
}

struct PatternRoute<T> {
    pattern: Regex,
    method: Method,
    target: T,
}

/// Route table
#[derive(Default)]
pub struct Router {
    exact_handlers: HashMap<RouteKey, Box<dyn RouteHandler>>,
    exact_callbacks: HashMap<RouteKey, HandlerFn>,
    regex_handlers: Vec<PatternRoute<Box<dyn RouteHandler>>>,
    regex_callbacks: Vec<PatternRoute<HandlerFn>>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    /// Register a handler object for an exact path.
    pub fn register_handler(
        &mut self,
        path: impl Into<String>,
        method: Method,
        handler: Box<dyn RouteHandler>,
    ) {
        let key = RouteKey {
            method,
            path: path.into(),
        };
        self.exact_handlers.insert(key, handler);
    }

    /// Register a callback for an exact path.
    pub fn register_callback(
        &mut self,
        path: impl Into<String>,
        method: Method,
        callback: HandlerFn,
    ) {
        let key = RouteKey {
            method,
            path: path.into(),
        };
        self.exact_callbacks.insert(key, callback);
    }

    /// Register a handler object for a parametric path (`/user/:id`).
    pub fn register_regex_handler(
        &mut self,
        path: &str,
        method: Method,
        handler: Box<dyn RouteHandler>,
    ) -> Result<(), RouterError> {
        let pattern = path_to_pattern(path)?;
        self.regex_handlers.push(PatternRoute {
            pattern,
            method,
            target: handler,
        });
        Ok(())
    }

    /// Register a callback for a parametric path (`/user/:id`).
    pub fn register_regex_callback(
        &mut self,
        path: &str,
        method: Method,
        callback: HandlerFn,
    ) -> Result<(), RouterError> {
        let pattern = path_to_pattern(path)?;
        self.regex_callbacks.push(PatternRoute {
            pattern,
            method,
            target: callback,
        });
        Ok(())
    }

    /// Dispatch a request, returning false when no route matched.
    ///
    /// Exact handlers are consulted first, then exact callbacks, then the
    /// parametric tables in registration order. A parametric match clones
    /// the request and exposes captures 1..K as `param1`..`paramK`.
    pub fn route(&self, request: &Request, response: &mut Response) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        let key = RouteKey {
            method: request.method(),
            path: request.path().to_string(),
        };

        if let Some(handler) = self.exact_handlers.get(&key) {
            handler.handle(request, response)?;
            return Ok(true);
        }

        if let Some(callback) = self.exact_callbacks.get(&key) {
            callback(request, response)?;
            return Ok(true);
        }

        for route in &self.regex_handlers {
            if route.method == request.method() {
                if let Some(captures) = route.pattern.captures(request.path()) {
                    let req = with_path_parameters(request, &captures);
                    route.target.handle(&req, response)?;
                    return Ok(true);
                }
            }
        }

        for route in &self.regex_callbacks {
            if route.method == request.method() {
                if let Some(captures) = route.pattern.captures(request.path()) {
                    let req = with_path_parameters(request, &captures);
                    (route.target)(&req, response)?;
                    return Ok(true);
                }
            }
        }

        debug!(method = %request.method(), path = request.path(), "no route matched");
        Ok(false)
    }
}

/// Compile a registered path into an anchored pattern.
///
/// `:name` segments become `([^/]+)` captures. The path grammar is exact
/// text plus `:name` segments; regex metacharacters are rejected so a
/// registered route can never match more than its author wrote.
fn path_to_pattern(path: &str) -> Result<Regex, RouterError> {
    if let Some(bad) = path.chars().find(|c| ".*+?()[]{}|^$\\".contains(*c)) {
        return Err(RouterError::UnsupportedPattern(path.to_string(), bad));
    }

    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| {
            if segment.starts_with(':') && segment.len() > 1 {
                "([^/]+)"
            } else {
                segment
            }
        })
        .collect();

    Ok(Regex::new(&format!("^{}$", segments.join("/")))?)
}

fn with_path_parameters(request: &Request, captures: &regex::Captures<'_>) -> Request {
    let mut req = request.clone();
    for i in 1..captures.len() {
        if let Some(cap) = captures.get(i) {
            req.set_path_parameter(format!("param{}", i), cap.as_str().to_string());
        }
    }
    req
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(method: Method, path: &str) -> Request {
        let mut req = Request::new();
        req.set_method(method);
        req.set_path(path.to_string());
        req
    }

    fn body_callback(body: &'static str) -> HandlerFn {
        Box::new(move |_req, resp| {
            resp.set_status(Status::OK);
            resp.set_body(body);
            Ok(())
        })
    }

    #[test]
    fn test_exact_route_matches() {
        let mut router = Router::new();
        router.register_callback("/hello", Method::Get, body_callback("hi"));

        let mut resp = Response::new();
        let matched = router
            .route(&request(Method::Get, "/hello"), &mut resp)
            .unwrap();
        assert!(matched);
        assert_eq!(resp.body(), b"hi");
    }

    #[test]
    fn test_method_mismatch_is_a_miss() {
        let mut router = Router::new();
        router.register_callback("/hello", Method::Get, body_callback("hi"));

        let mut resp = Response::new();
        let matched = router
            .route(&request(Method::Post, "/hello"), &mut resp)
            .unwrap();
        assert!(!matched);
    }

    #[test]
    fn test_regex_route_extracts_numbered_parameters() {
        let mut router = Router::new();
        router
            .register_regex_callback(
                "/user/:id/post/:post",
                Method::Get,
                Box::new(|req, resp| {
                    assert_eq!(req.path_parameter("param1"), Some("42"));
                    assert_eq!(req.path_parameter("param2"), Some("7"));
                    resp.set_status(Status::OK);
                    Ok(())
                }),
            )
            .unwrap();

        let mut resp = Response::new();
        let matched = router
            .route(&request(Method::Get, "/user/42/post/7"), &mut resp)
            .unwrap();
        assert!(matched);
    }

    #[test]
    fn test_regex_requires_full_match() {
        let mut router = Router::new();
        router
            .register_regex_callback("/user/:id", Method::Get, body_callback("u"))
            .unwrap();

        let mut resp = Response::new();
        assert!(!router
            .route(&request(Method::Get, "/user/42/extra"), &mut resp)
            .unwrap());
        assert!(!router
            .route(&request(Method::Get, "/prefix/user/42"), &mut resp)
            .unwrap());
    }

    #[test]
    fn test_exact_wins_over_regex() {
        let mut router = Router::new();
        router
            .register_regex_callback("/user/:id", Method::Get, body_callback("regex"))
            .unwrap();
        router.register_callback("/user/me", Method::Get, body_callback("exact"));

        let mut resp = Response::new();
        router
            .route(&request(Method::Get, "/user/me"), &mut resp)
            .unwrap();
        assert_eq!(resp.body(), b"exact");
    }

    #[test]
    fn test_regex_insertion_order_breaks_ties() {
        let mut router = Router::new();
        router
            .register_regex_callback("/a/:x", Method::Get, body_callback("first"))
            .unwrap();
        router
            .register_regex_callback("/:y/b", Method::Get, body_callback("second"))
            .unwrap();

        let mut resp = Response::new();
        router
            .route(&request(Method::Get, "/a/b"), &mut resp)
            .unwrap();
        assert_eq!(resp.body(), b"first");
    }

    #[test]
    fn test_handler_object_dispatch() {
        struct Counter(Arc<AtomicUsize>);
        impl RouteHandler for Counter {
            fn handle(&self, _req: &Request, resp: &mut Response) -> HandlerResult {
                self.0.fetch_add(1, Ordering::SeqCst);
                resp.set_status(Status::OK);
                Ok(())
            }
        }

        let hits = Arc::new(AtomicUsize::new(0));
        let mut router = Router::new();
        router.register_handler("/count", Method::Get, Box::new(Counter(hits.clone())));

        let mut resp = Response::new();
        router
            .route(&request(Method::Get, "/count"), &mut resp)
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_failure_propagates() {
        let mut router = Router::new();
        router.register_callback(
            "/boom",
            Method::Get,
            Box::new(|_req, _resp| Err("database is down".into())),
        );

        let mut resp = Response::new();
        let err = router
            .route(&request(Method::Get, "/boom"), &mut resp)
            .unwrap_err();
        assert_eq!(err.to_string(), "database is down");
    }

    #[test]
    fn test_metacharacters_rejected_at_registration() {
        let mut router = Router::new();
        for path in ["/a.*", "/a+b", "/(group)", "/file.txt", "/a|b"] {
            let err = router
                .register_regex_callback(path, Method::Get, body_callback("x"))
                .unwrap_err();
            assert!(matches!(err, RouterError::UnsupportedPattern(..)), "{}", path);
        }
    }

    #[test]
    fn test_original_request_is_not_mutated() {
        let mut router = Router::new();
        router
            .register_regex_callback("/user/:id", Method::Get, body_callback("u"))
            .unwrap();

        let req = request(Method::Get, "/user/42");
        let mut resp = Response::new();
        router.route(&req, &mut resp).unwrap();
        assert_eq!(req.path_parameter("param1"), None);
    }
}
