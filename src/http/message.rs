//! HTTP message types
//!
//! Canonical in-memory representation of requests and responses. A `Request`
//! is built by the decoder and is not mutated once dispatch begins; a
//! `Response` stays mutable until it is serialized to the wire.

use super::{Error, Headers, Result, CRLF};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// Sentinel for a request line that has not been parsed yet.
    #[default]
    Invalid,
}

impl Method {
    /// Parse method from its wire form
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }

    /// Convert method to its wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    /// Parse version from its wire form
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP/1.0" => Ok(Version::Http10),
            "HTTP/1.1" => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(s.to_string())),
        }
    }

    /// Convert version to its wire form
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Create a new status code
    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status { code })
        } else {
            Err(Error::InvalidStatus(format!("invalid status code: {}", code)))
        }
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Get the canonical reason phrase for this status code
    pub fn reason_phrase(&self) -> &'static str {
        match self.code {
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            _ => "Unknown",
        }
    }

    /// Check if this is a success status (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Check if this is a client error status (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code)
    }

    /// Check if this is a server error status (5xx)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.code)
    }

    pub const OK: Status = Status { code: 200 };
    pub const CREATED: Status = Status { code: 201 };
    pub const ACCEPTED: Status = Status { code: 202 };
    pub const NO_CONTENT: Status = Status { code: 204 };
    pub const MOVED_PERMANENTLY: Status = Status { code: 301 };
    pub const FOUND: Status = Status { code: 302 };
    pub const NOT_MODIFIED: Status = Status { code: 304 };
    pub const BAD_REQUEST: Status = Status { code: 400 };
    pub const UNAUTHORIZED: Status = Status { code: 401 };
    pub const FORBIDDEN: Status = Status { code: 403 };
    pub const NOT_FOUND: Status = Status { code: 404 };
    pub const INTERNAL_SERVER_ERROR: Status = Status { code: 500 };
    pub const NOT_IMPLEMENTED: Status = Status { code: 501 };
    pub const BAD_GATEWAY: Status = Status { code: 502 };
    pub const SERVICE_UNAVAILABLE: Status = Status { code: 503 };
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}

/// HTTP request
///
/// Path parameters are populated by the router from the numbered capture
/// groups of a matched pattern (`param1`, `param2`, ...). Query parameters
/// are percent-decoded with `+` interpreted as space; the path keeps `+`
/// literal.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    version: Version,
    path_parameters: HashMap<String, String>,
    query_parameters: HashMap<String, String>,
    headers: Headers,
    body: Vec<u8>,
    content_length: u64,
    receive_time: SystemTime,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            method: Method::Invalid,
            path: String::new(),
            version: Version::Http11,
            path_parameters: HashMap::new(),
            query_parameters: HashMap::new(),
            headers: Headers::new(),
            body: Vec::new(),
            content_length: 0,
            receive_time: SystemTime::UNIX_EPOCH,
        }
    }
}

impl Request {
    /// Create an empty request
    pub fn new() -> Self {
        Request::default()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Percent-decoded path, without the query component
    pub fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn set_path(&mut self, path: String) {
        self.path = path;
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Look up a path parameter (`param1`, `param2`, ...)
    pub fn path_parameter(&self, key: &str) -> Option<&str> {
        self.path_parameters.get(key).map(String::as_str)
    }

    pub(crate) fn set_path_parameter(&mut self, key: String, value: String) {
        self.path_parameters.insert(key, value);
    }

    /// Look up a decoded query parameter
    pub fn query_parameter(&self, key: &str) -> Option<&str> {
        self.query_parameters.get(key).map(String::as_str)
    }

    pub fn query_parameters(&self) -> &HashMap<String, String> {
        &self.query_parameters
    }

    pub(crate) fn set_query_parameters(&mut self, params: HashMap<String, String>) {
        self.query_parameters = params;
    }

    /// Look up a header by exact-case name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Raw body bytes
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn set_body(&mut self, body: Vec<u8>) {
        self.content_length = body.len() as u64;
        self.body = body;
    }

    /// Declared `Content-Length`
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub(crate) fn set_content_length(&mut self, length: u64) {
        self.content_length = length;
    }

    /// Instant the first byte of this request was received
    pub fn receive_time(&self) -> SystemTime {
        self.receive_time
    }

    pub(crate) fn set_receive_time(&mut self, time: SystemTime) {
        self.receive_time = time;
    }
}

/// HTTP response
///
/// `request_origin` carries the request's `Origin` header so that after-hooks
/// operating on the response alone can classify cross-origin exchanges.
#[derive(Debug, Clone)]
pub struct Response {
    version: Version,
    status: Status,
    status_message: String,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
    request_origin: String,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            version: Version::Http11,
            status: Status::OK,
            status_message: Status::OK.reason_phrase().to_string(),
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: false,
            request_origin: String::new(),
        }
    }
}

impl Response {
    /// Create a new response with default status `200 OK`
    pub fn new() -> Self {
        Response::default()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the status code and its canonical reason phrase
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        self.status_message = status.reason_phrase().to_string();
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    /// Set version, status code and status message in one call
    pub fn set_response_line(
        &mut self,
        version: Version,
        status: Status,
        message: impl Into<String>,
    ) {
        self.version = version;
        self.status = status;
        self.status_message = message.into();
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Set the body; `Content-Length` is updated to match.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
        self.set_content_length(self.body.len() as u64);
    }

    /// Shorthand for the `Content-Type` header
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.headers.insert("Content-Type", content_type);
    }

    /// Shorthand for the `Content-Length` header
    pub fn set_content_length(&mut self, length: u64) {
        self.headers.insert("Content-Length", length.to_string());
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Set the keep-alive flag; the `Connection` header follows it.
    pub fn set_keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
        let value = if keep_alive { "keep-alive" } else { "close" };
        self.headers.insert("Connection", value);
    }

    /// `Origin` header of the request this response answers
    pub fn request_origin(&self) -> &str {
        &self.request_origin
    }

    pub(crate) fn set_request_origin(&mut self, origin: impl Into<String>) {
        self.request_origin = origin.into();
    }

    /// Bring `Content-Length` in line with the body before serialization.
    ///
    /// The header is emitted when the body is non-empty or when a handler set
    /// the header itself; either way its value must equal the body length.
    pub(crate) fn ensure_content_length(&mut self) {
        if !self.body.is_empty() || self.headers.contains("Content-Length") {
            self.set_content_length(self.body.len() as u64);
        }
    }

    /// Serialize to wire format: status line, headers, one blank line, body.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.body.len());

        buf.extend_from_slice(self.version.as_str().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status.code().to_string().as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.status_message.as_bytes());
        buf.extend_from_slice(CRLF.as_bytes());

        for (name, value) in self.headers.iter() {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(CRLF.as_bytes());
        }

        buf.extend_from_slice(CRLF.as_bytes());
        buf.extend_from_slice(&self.body);

        buf
    }
}
