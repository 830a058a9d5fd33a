//! HTTP/1.x protocol layer
//!
//! Core value types and the incremental request decoder. The decoder operates
//! in place on a connection's read buffer and is resilient to arbitrary
//! fragmentation across socket reads; the value types are the canonical
//! in-memory representation handed to middlewares and route handlers.

pub mod decoder;
pub mod headers;
pub mod message;
pub mod query;
pub mod tls;

pub use decoder::{FeedResult, RequestDecoder};
pub use headers::Headers;
pub use message::{Method, Request, Response, Status, Version};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// CRLF line ending
pub const CRLF: &str = "\r\n";

/// On-wire reply for a request the decoder rejected
pub const BAD_REQUEST_WIRE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
