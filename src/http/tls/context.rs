//! Shared TLS context
//!
//! One process-wide context holds the certificate, private key and session
//! cache configuration. It is immutable after `TlsContext::new` returns and
//! is shared across worker reactors without locking; per-connection state
//! lives in the engine.

use super::{TlsError, TlsVersion};
use openssl::ssl::{
    SslContext, SslContextBuilder, SslContextRef, SslFiletype, SslMethod, SslOptions,
    SslSessionCacheMode,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Server TLS settings
///
/// `cert_file` and `key_file` are required; everything else has the stock
/// server defaults.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// PEM-encoded certificate
    pub cert_file: PathBuf,
    /// PEM-encoded private key
    pub key_file: PathBuf,
    /// Optional PEM-encoded intermediate chain
    pub chain_file: Option<PathBuf>,
    /// Lowest protocol version offered
    pub min_version: TlsVersion,
    /// OpenSSL cipher list for TLS 1.2 and below
    pub cipher_list: String,
    /// Server-side session cache capacity
    pub session_cache_size: i64,
    /// Lifetime of cached sessions
    pub session_timeout: Duration,
}

impl TlsSettings {
    /// Settings with stock defaults for the given certificate and key.
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        TlsSettings {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
            chain_file: None,
            min_version: TlsVersion::Tls12,
            cipher_list: "HIGH:!aNULL:!MD5".to_string(),
            session_cache_size: 20480,
            session_timeout: Duration::from_secs(300),
        }
    }
}

/// Shared server TLS context, immutable after construction.
#[derive(Debug)]
pub struct TlsContext {
    ctx: SslContext,
}

impl TlsContext {
    /// Build the context, validating the certificate and key up front.
    ///
    /// Fails when either file is unreadable or when the private key does not
    /// match the certificate; the server must not start in that case.
    pub fn new(settings: &TlsSettings) -> Result<Self, TlsError> {
        check_readable(&settings.cert_file)?;
        check_readable(&settings.key_file)?;
        if let Some(chain) = &settings.chain_file {
            check_readable(chain)?;
        }

        let mut builder = SslContextBuilder::new(SslMethod::tls_server())?;

        builder.set_options(SslOptions::NO_COMPRESSION | SslOptions::CIPHER_SERVER_PREFERENCE);
        builder.set_min_proto_version(Some(settings.min_version.to_openssl_version()))?;
        builder.set_cipher_list(&settings.cipher_list)?;

        builder.set_certificate_file(&settings.cert_file, SslFiletype::PEM)?;
        builder.set_private_key_file(&settings.key_file, SslFiletype::PEM)?;
        builder
            .check_private_key()
            .map_err(|e| TlsError::Certificate(format!("key does not match certificate: {}", e)))?;

        if let Some(chain) = &settings.chain_file {
            builder.set_certificate_chain_file(chain)?;
        }

        builder.set_session_cache_mode(SslSessionCacheMode::SERVER);
        builder.set_session_cache_size(settings.session_cache_size as i32);

        info!(
            cert = %settings.cert_file.display(),
            min_version = settings.min_version.as_str(),
            cache_size = settings.session_cache_size,
            session_timeout_secs = settings.session_timeout.as_secs(),
            "TLS context initialized"
        );

        Ok(TlsContext {
            ctx: builder.build(),
        })
    }

    /// The underlying OpenSSL context
    pub fn context(&self) -> &SslContextRef {
        &self.ctx
    }
}

fn check_readable(path: &Path) -> Result<(), TlsError> {
    File::open(path)
        .map(|_| ())
        .map_err(|e| TlsError::Certificate(format!("cannot read {}: {}", path.display(), e)))
}
