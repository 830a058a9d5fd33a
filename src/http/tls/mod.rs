//! TLS record layer
//!
//! Bridges the non-blocking transport to OpenSSL by routing ciphertext
//! through two in-memory byte queues, one per direction. The connection state
//! machine feeds raw socket bytes in and is handed decrypted plaintext out;
//! it never sees TLS records, and OpenSSL never touches the socket.
//!
//! The context (certificate, key, protocol floor, session cache) is built
//! once at startup and shared read-only by every connection; each connection
//! owns its engine.

pub mod context;
pub mod engine;

pub use context::{TlsContext, TlsSettings};
pub use engine::{TlsEngine, TlsState};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// TLS protocol version floor
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl TlsVersion {
    /// Corresponding OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Version as a display string
    pub fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}


/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("TLS protocol error: {0}")]
    Protocol(String),

    #[error("Peer closed the TLS session")]
    Closed,

    #[error("Operation requires an established session")]
    NotEstablished,
}
