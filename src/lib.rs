//! hearth - embeddable HTTP/1.x server framework
//!
//! A non-blocking, multi-reactor HTTP/1.0 and HTTP/1.1 server core with an
//! optional TLS record layer, a combined exact/parametric router and a
//! before/after middleware chain.
//!
//! # Architecture
//!
//! One main reactor accepts connections and round-robins them to worker
//! reactors; every connection lives on exactly one worker thread. Bytes flow
//! through the TLS engine (when enabled) into an incremental request decoder,
//! the decoded request runs through the middleware chain and the router, and
//! the response is serialized back out through the same path in reverse.
//!
//! # Example
//!
//! ```no_run
//! use hearth::http::Status;
//! use hearth::server::ServerBuilder;
//!
//! let mut server = ServerBuilder::new()
//!     .port(8080)
//!     .name("demo")
//!     .build()
//!     .unwrap();
//!
//! server.get("/hello", |_req, resp| {
//!     resp.set_status(Status::OK);
//!     resp.set_content_type("text/plain");
//!     resp.set_body("Hello, World!");
//!     Ok(())
//! });
//!
//! server.start().unwrap();
//! ```

pub mod buffer;
pub mod http;
pub mod middleware;
pub mod pool;
mod reactor;
pub mod router;
pub mod server;
pub mod session;

pub use buffer::Buffer;
pub use http::{Headers, Method, Request, Response, Status, Version};
pub use middleware::{CorsConfig, CorsMiddleware, Middleware, MiddlewareChain, Outcome};
pub use router::{HandlerResult, RouteHandler, Router};
pub use server::{Server, ServerBuilder, ServerError};
pub use session::{Session, SessionManager, SessionStore};
