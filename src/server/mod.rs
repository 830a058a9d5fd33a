//! Server builder and request dispatcher
//!
//! The builder validates configuration up front and fails fatally on a bad
//! port or unreadable TLS material. Routes and middlewares are registered on
//! the built server; `start` freezes them into a shared dispatcher, spawns
//! the worker reactors and runs the accept loop on the calling thread.
//! Registration after `start` is not possible by construction: `start`
//! consumes the server.

pub(crate) mod conn;

use crate::http::tls::{TlsContext, TlsError, TlsSettings};
use crate::http::{Method, Request, Response, Status, Version};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareError, Outcome};
use crate::reactor;
use crate::router::{HandlerResult, RouteHandler, Router, RouterError};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{error, info};

/// Internal path the dispatcher rewrites OPTIONS lookups to.
///
/// A synthetic route lives there from initialization, so OPTIONS requests
/// get a valid answer even when the user registered nothing.
const OPTIONS_ROUTE: &str = "/options/method";

/// Server construction and runtime errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("route registration error: {0}")]
    Router(#[from] RouterError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Builder for a [`Server`]
///
/// ```no_run
/// use hearth::server::ServerBuilder;
/// use hearth::http::Status;
///
/// let mut server = ServerBuilder::new()
///     .port(8080)
///     .name("demo")
///     .thread_num(4)
///     .build()
///     .unwrap();
///
/// server.get("/hello", |_req, resp| {
///     resp.set_status(Status::OK);
///     resp.set_content_type("text/plain");
///     resp.set_body("Hello, World!");
///     Ok(())
/// });
///
/// server.start().unwrap();
/// ```
pub struct ServerBuilder {
    port: u16,
    name: String,
    use_ssl: bool,
    cert_file_path: Option<PathBuf>,
    key_file_path: Option<PathBuf>,
    thread_num: usize,
    reuse_port: bool,
    middlewares: Vec<Box<dyn Middleware>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder {
            port: 0,
            name: "hearth".to_string(),
            use_ssl: false,
            cert_file_path: None,
            key_file_path: None,
            thread_num: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            reuse_port: false,
            middlewares: Vec::new(),
        }
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder::default()
    }

    /// Listen port; required and non-zero.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Server identifier used in logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable the TLS record layer.
    pub fn use_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }

    /// PEM certificate path; required when TLS is enabled.
    pub fn cert_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cert_file_path = Some(path.into());
        self
    }

    /// PEM private key path; required when TLS is enabled.
    pub fn key_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file_path = Some(path.into());
        self
    }

    /// Worker reactor count; defaults to the hardware parallelism.
    pub fn thread_num(mut self, threads: usize) -> Self {
        self.thread_num = threads;
        self
    }

    /// Enable `SO_REUSEPORT` on the listener.
    pub fn reuse_port(mut self, reuse: bool) -> Self {
        self.reuse_port = reuse;
        self
    }

    /// Append a middleware to the chain.
    pub fn middleware(mut self, middleware: Box<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Validate the configuration and construct the server.
    pub fn build(self) -> Result<Server, ServerError> {
        if self.port == 0 {
            return Err(ServerError::Config("port must be non-zero".to_string()));
        }

        let tls = if self.use_ssl {
            let cert = self.cert_file_path.ok_or_else(|| {
                ServerError::Config("cert_file_path is required with TLS".to_string())
            })?;
            let key = self.key_file_path.ok_or_else(|| {
                ServerError::Config("key_file_path is required with TLS".to_string())
            })?;
            Some(TlsContext::new(&TlsSettings::new(cert, key))?)
        } else {
            None
        };

        let mut chain = MiddlewareChain::new();
        for middleware in self.middlewares {
            chain.add(middleware);
        }

        let mut router = Router::new();
        register_default_options_route(&mut router);

        info!(
            name = %self.name,
            port = self.port,
            tls = tls.is_some(),
            threads = self.thread_num,
            "server built"
        );

        Ok(Server {
            port: self.port,
            name: self.name,
            thread_num: self.thread_num.max(1),
            reuse_port: self.reuse_port,
            router,
            chain,
            tls,
        })
    }
}

fn register_default_options_route(router: &mut Router) {
    router.register_callback(
        OPTIONS_ROUTE,
        Method::Options,
        Box::new(|_req, resp| {
            resp.set_status(Status::NO_CONTENT);
            resp.set_header("Allow", "GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS");
            Ok(())
        }),
    );
}

/// HTTP server
///
/// Routes are registered between `build` and `start`; `start` consumes the
/// server and serves until the process exits.
pub struct Server {
    port: u16,
    name: String,
    thread_num: usize,
    reuse_port: bool,
    router: Router,
    chain: MiddlewareChain,
    tls: Option<TlsContext>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("port", &self.port)
            .field("name", &self.name)
            .field("thread_num", &self.thread_num)
            .field("reuse_port", &self.reuse_port)
            .field("tls", &self.tls)
            .finish()
    }
}

macro_rules! exact_route_methods {
    ($(($fn_name:ident, $handler_fn_name:ident, $method:expr)),+ $(,)?) => {
        $(
            /// Register a callback for this method at an exact path.
            pub fn $fn_name<F>(&mut self, path: &str, callback: F)
            where
                F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
            {
                self.router.register_callback(path, $method, Box::new(callback));
            }

            /// Register a handler object for this method at an exact path.
            pub fn $handler_fn_name(&mut self, path: &str, handler: Box<dyn RouteHandler>) {
                self.router.register_handler(path, $method, handler);
            }
        )+
    };
}

impl Server {
    exact_route_methods!(
        (get, get_handler, Method::Get),
        (post, post_handler, Method::Post),
        (put, put_handler, Method::Put),
        (patch, patch_handler, Method::Patch),
        (delete, delete_handler, Method::Delete),
        (head, head_handler, Method::Head),
    );

    /// Replace the default OPTIONS answer.
    pub fn options<F>(&mut self, callback: F)
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.router
            .register_callback(OPTIONS_ROUTE, Method::Options, Box::new(callback));
    }

    /// Register a callback for a parametric path (`/user/:id`).
    pub fn add_regex_route<F>(
        &mut self,
        method: Method,
        path: &str,
        callback: F,
    ) -> Result<(), ServerError>
    where
        F: Fn(&Request, &mut Response) -> HandlerResult + Send + Sync + 'static,
    {
        self.router
            .register_regex_callback(path, method, Box::new(callback))?;
        Ok(())
    }

    /// Register a handler object for a parametric path.
    pub fn add_regex_handler(
        &mut self,
        method: Method,
        path: &str,
        handler: Box<dyn RouteHandler>,
    ) -> Result<(), ServerError> {
        self.router.register_regex_handler(path, method, handler)?;
        Ok(())
    }

    /// Append a middleware to the chain.
    pub fn add_middleware(&mut self, middleware: Box<dyn Middleware>) {
        self.chain.add(middleware);
    }

    /// Serve forever on the calling thread.
    pub fn start(self) -> Result<(), ServerError> {
        let listener = reactor::bind_listener(self.port, self.reuse_port)?;
        info!(name = %self.name, port = self.port, "server listening");

        let dispatcher = Arc::new(Dispatcher {
            router: self.router,
            chain: self.chain,
            tls: self.tls,
        });

        let workers = reactor::spawn_workers(self.thread_num, dispatcher)?;
        reactor::run_main(listener, workers)?;
        Ok(())
    }
}

enum PipelineResult {
    Handled,
    ShortCircuit(Response),
    Failed(MiddlewareError),
}

/// Read-only request pipeline shared by every worker.
pub(crate) struct Dispatcher {
    router: Router,
    chain: MiddlewareChain,
    tls: Option<TlsContext>,
}

impl Dispatcher {
    pub(crate) fn tls_context(&self) -> Option<&TlsContext> {
        self.tls.as_ref()
    }

    /// Turn one decoded request into a ready-to-serialize response.
    pub(crate) fn dispatch(&self, request: Request) -> Response {
        let connection = request.header("Connection").unwrap_or("");
        let close = connection == "close"
            || (request.version() == Version::Http10 && connection != "keep-alive");
        let version = request.version();

        let mut response = Response::new();
        response.set_keep_alive(!close);
        response.set_request_origin(request.header("Origin").unwrap_or(""));

        let mut request = request;
        match self.run_pipeline(&mut request, &mut response) {
            PipelineResult::Handled => {}
            PipelineResult::ShortCircuit(ready) => {
                // Keep-alive is transport policy, not the middleware's call.
                let keep_alive = response.is_keep_alive();
                response = ready;
                response.set_keep_alive(keep_alive);
            }
            PipelineResult::Failed(err) => {
                error!(%err, "request pipeline failed");
                response.set_status(Status::INTERNAL_SERVER_ERROR);
                response.set_body(err.to_string());
            }
        }

        response.set_version(version);
        response.set_header("Date", httpdate::fmt_http_date(SystemTime::now()));
        response.ensure_content_length();
        response
    }

    fn run_pipeline(&self, request: &mut Request, response: &mut Response) -> PipelineResult {
        match self.chain.process_before(request) {
            Ok(Outcome::Continue) => {}
            Ok(Outcome::ShortCircuit(ready)) => return PipelineResult::ShortCircuit(ready),
            Err(err) => return PipelineResult::Failed(err),
        }

        let routed = if request.method() == Method::Options {
            // Absent user OPTIONS handlers still get the synthetic answer.
            let mut lookup = request.clone();
            lookup.set_path(OPTIONS_ROUTE.to_string());
            self.router.route(&lookup, response)
        } else {
            self.router.route(request, response)
        };

        match routed {
            Ok(true) => {}
            Ok(false) => {
                response.set_status(Status::NOT_FOUND);
                response.set_body("404 Not Found");
                response.set_keep_alive(false);
            }
            Err(err) => return PipelineResult::Failed(err),
        }

        self.chain.process_after(response);
        PipelineResult::Handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{CorsConfig, CorsMiddleware};

    fn dispatcher_with<F>(setup: F) -> Dispatcher
    where
        F: FnOnce(&mut Router, &mut MiddlewareChain),
    {
        let mut router = Router::new();
        register_default_options_route(&mut router);
        let mut chain = MiddlewareChain::new();
        setup(&mut router, &mut chain);
        Dispatcher {
            router,
            chain,
            tls: None,
        }
    }

    fn get_request(path: &str, version: Version, headers: &[(&str, &str)]) -> Request {
        let mut req = Request::new();
        req.set_method(Method::Get);
        req.set_path(path.to_string());
        req.set_version(version);
        for (name, value) in headers {
            req.headers_mut().insert(*name, *value);
        }
        req
    }

    #[test]
    fn test_dispatch_matched_route() {
        let dispatcher = dispatcher_with(|router, _| {
            router.register_callback(
                "/hello",
                Method::Get,
                Box::new(|_req, resp| {
                    resp.set_status(Status::OK);
                    resp.set_body("Hello, World!");
                    Ok(())
                }),
            );
        });

        let response = dispatcher.dispatch(get_request("/hello", Version::Http11, &[]));
        assert_eq!(response.status(), Status::OK);
        assert_eq!(response.body(), b"Hello, World!");
        assert_eq!(response.header("Content-Length"), Some("13"));
        assert!(response.header("Date").unwrap().ends_with("GMT"));
        assert!(response.is_keep_alive());
    }

    #[test]
    fn test_dispatch_route_miss_is_404_and_closes() {
        let dispatcher = dispatcher_with(|_, _| {});
        let response = dispatcher.dispatch(get_request("/missing", Version::Http11, &[]));

        assert_eq!(response.status(), Status::NOT_FOUND);
        assert_eq!(response.body(), b"404 Not Found");
        assert!(!response.is_keep_alive());
    }

    #[test]
    fn test_dispatch_handler_failure_is_500_with_message() {
        let dispatcher = dispatcher_with(|router, _| {
            router.register_callback(
                "/boom",
                Method::Get,
                Box::new(|_req, _resp| Err("the backend melted".into())),
            );
        });

        let response = dispatcher.dispatch(get_request("/boom", Version::Http11, &[]));
        assert_eq!(response.status(), Status::INTERNAL_SERVER_ERROR);
        assert_eq!(response.body(), b"the backend melted");
    }

    #[test]
    fn test_keep_alive_policy() {
        let dispatcher = dispatcher_with(|router, _| {
            router.register_callback("/", Method::Get, Box::new(|_r, resp| {
                resp.set_status(Status::OK);
                Ok(())
            }));
        });

        // HTTP/1.1 defaults to keep-alive.
        let resp = dispatcher.dispatch(get_request("/", Version::Http11, &[]));
        assert!(resp.is_keep_alive());

        // Explicit close wins.
        let resp = dispatcher.dispatch(get_request("/", Version::Http11, &[("Connection", "close")]));
        assert!(!resp.is_keep_alive());
        assert_eq!(resp.header("Connection"), Some("close"));

        // HTTP/1.0 defaults to close.
        let resp = dispatcher.dispatch(get_request("/", Version::Http10, &[]));
        assert!(!resp.is_keep_alive());
        assert_eq!(resp.version(), Version::Http10);

        // ... unless keep-alive is requested.
        let resp =
            dispatcher.dispatch(get_request("/", Version::Http10, &[("Connection", "keep-alive")]));
        assert!(resp.is_keep_alive());
    }

    #[test]
    fn test_default_options_route() {
        let dispatcher = dispatcher_with(|_, _| {});
        let mut req = get_request("/anything", Version::Http11, &[]);
        req.set_method(Method::Options);

        let response = dispatcher.dispatch(req);
        assert_eq!(response.status(), Status::NO_CONTENT);
        assert_eq!(
            response.header("Allow"),
            Some("GET, POST, PUT, DELETE, PATCH, HEAD, OPTIONS")
        );
    }

    #[test]
    fn test_cors_preflight_short_circuits_routing() {
        let dispatcher = dispatcher_with(|router, chain| {
            // A route that must never run for the preflight.
            router.register_callback(
                OPTIONS_ROUTE,
                Method::Options,
                Box::new(|_r, _resp| panic!("routing was consulted")),
            );
            chain.add(Box::new(CorsMiddleware::new(CorsConfig {
                allow_origins: vec!["https://example.com".to_string()],
                allow_methods: vec!["GET".to_string(), "POST".to_string()],
                max_age: 600,
                ..CorsConfig::default()
            })));
        });

        let mut req = get_request(
            "/foo",
            Version::Http11,
            &[
                ("Origin", "https://example.com"),
                ("Access-Control-Request-Method", "POST"),
            ],
        );
        req.set_method(Method::Options);

        let response = dispatcher.dispatch(req);
        assert_eq!(response.status(), Status::NO_CONTENT);
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://example.com")
        );
        assert_eq!(
            response.header("Access-Control-Allow-Methods"),
            Some("GET,POST")
        );
        assert_eq!(response.header("Access-Control-Max-Age"), Some("600"));
        // The connection policy still applies to the carried response.
        assert!(response.is_keep_alive());
    }

    #[test]
    fn test_cors_after_hook_decorates_response() {
        let dispatcher = dispatcher_with(|router, chain| {
            router.register_callback("/data", Method::Get, Box::new(|_r, resp| {
                resp.set_status(Status::OK);
                resp.set_body("{}");
                Ok(())
            }));
            chain.add(Box::new(CorsMiddleware::new(CorsConfig {
                allow_origins: vec!["https://example.com".to_string()],
                ..CorsConfig::default()
            })));
        });

        let response = dispatcher.dispatch(get_request(
            "/data",
            Version::Http11,
            &[("Origin", "https://example.com")],
        ));
        assert_eq!(response.status(), Status::OK);
        assert_eq!(
            response.header("Access-Control-Allow-Origin"),
            Some("https://example.com")
        );
    }

    #[test]
    fn test_builder_rejects_zero_port() {
        let err = ServerBuilder::new().build().unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn test_builder_requires_tls_material() {
        let err = ServerBuilder::new().port(8443).use_ssl(true).build().unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));

        let err = ServerBuilder::new()
            .port(8443)
            .use_ssl(true)
            .cert_file_path("/nonexistent.crt")
            .key_file_path("/nonexistent.key")
            .build()
            .unwrap_err();
        assert!(matches!(err, ServerError::Tls(_)));
    }

    #[test]
    fn test_builder_plain_defaults() {
        let server = ServerBuilder::new().port(8080).build().unwrap();
        assert!(server.tls.is_none());
        assert!(server.thread_num >= 1);
    }
}
