//! TLS record engine
//!
//! Per-connection engine bridging the non-blocking socket and OpenSSL. The
//! socket side only ever sees ciphertext: inbound bytes are appended to an
//! in-memory inbound queue that OpenSSL reads records from, and everything
//! OpenSSL emits lands in an outbound queue the connection drains onto the
//! socket. Plaintext flows through `write_plaintext` / `take_plaintext`.
//!
//! State machine: `Handshaking -> Established -> Errored`. Want-read and
//! want-write are transient; every other TLS or syscall error is terminal.

use super::context::TlsContext;
use super::TlsError;
use crate::buffer::Buffer;
use openssl::ssl::{ErrorCode, Ssl, SslStream};
use std::io::{self, Read, Write};
use tracing::{debug, error, info};

/// In-memory byte queues standing in for the socket on OpenSSL's side.
///
/// Reads pull ciphertext received from the peer; an empty inbound queue
/// reports `WouldBlock`, which OpenSSL surfaces as want-read. Writes collect
/// ciphertext for the peer and always succeed.
#[derive(Debug, Default)]
pub(crate) struct MemoryBio {
    inbound: Buffer,
    outbound: Buffer,
}

impl Read for MemoryBio {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.inbound.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound.peek()[..n]);
        self.inbound.retrieve(n);
        Ok(n)
    }
}

impl Write for MemoryBio {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outbound.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsState {
    Handshaking,
    Established,
    Errored,
}

/// Per-connection TLS record engine in server-accept state.
pub struct TlsEngine {
    stream: SslStream<MemoryBio>,
    state: TlsState,
    plaintext: Buffer,
}

impl TlsEngine {
    /// Create an engine for one accepted connection.
    pub fn new(context: &TlsContext) -> Result<Self, TlsError> {
        let mut ssl = Ssl::new(context.context())?;
        ssl.set_accept_state();
        let stream = SslStream::new(ssl, MemoryBio::default())?;

        Ok(TlsEngine {
            stream,
            state: TlsState::Handshaking,
            plaintext: Buffer::new(),
        })
    }

    /// Start the server-side handshake.
    ///
    /// Before any client bytes arrive this only primes the state machine;
    /// progress happens as ciphertext is fed in.
    pub fn begin_handshake(&mut self) -> Result<(), TlsError> {
        self.advance_handshake()
    }

    /// Feed ciphertext received from the socket.
    ///
    /// Advances the handshake while it is in flight, then decrypts any
    /// complete records into the plaintext buffer. After this returns, the
    /// caller must transmit whatever `drain_ciphertext` yields.
    pub fn on_ciphertext_received(&mut self, bytes: &[u8]) -> Result<(), TlsError> {
        self.stream.get_mut().inbound.append(bytes);

        match self.state {
            TlsState::Handshaking => self.advance_handshake(),
            TlsState::Established => self.decrypt_available(),
            TlsState::Errored => Err(TlsError::Closed),
        }
    }

    /// Encrypt plaintext into the outbound queue.
    ///
    /// No socket I/O happens here; the ciphertext is retrieved with
    /// `drain_ciphertext`.
    pub fn write_plaintext(&mut self, data: &[u8]) -> Result<(), TlsError> {
        if self.state != TlsState::Established {
            return Err(TlsError::NotEstablished);
        }

        let mut written = 0;
        while written < data.len() {
            match self.stream.ssl_write(&data[written..]) {
                Ok(n) => written += n,
                Err(err) => {
                    error!(code = ?err.code(), "TLS write failed");
                    self.state = TlsState::Errored;
                    return Err(TlsError::Protocol(err.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Take all pending outbound ciphertext; the caller transmits it.
    pub fn drain_ciphertext(&mut self) -> Vec<u8> {
        self.stream.get_mut().outbound.take()
    }

    /// Take all decrypted plaintext accumulated so far.
    pub fn take_plaintext(&mut self) -> Vec<u8> {
        self.plaintext.take()
    }

    /// True once the handshake has finished successfully
    pub fn handshake_completed(&self) -> bool {
        self.state == TlsState::Established
    }

    /// Current engine state
    pub fn state(&self) -> TlsState {
        self.state
    }

    fn advance_handshake(&mut self) -> Result<(), TlsError> {
        match self.stream.do_handshake() {
            Ok(()) => {
                self.state = TlsState::Established;
                let ssl = self.stream.ssl();
                info!(
                    version = ssl.version_str(),
                    cipher = ssl.current_cipher().map(|c| c.name()).unwrap_or("unknown"),
                    "TLS handshake completed"
                );
                // Early application data may ride in with the final flight.
                self.decrypt_available()
            }
            Err(err)
                if err.code() == ErrorCode::WANT_READ || err.code() == ErrorCode::WANT_WRITE =>
            {
                debug!("TLS handshake needs more data");
                Ok(())
            }
            Err(err) => {
                error!(code = ?err.code(), "TLS handshake failed");
                self.state = TlsState::Errored;
                Err(TlsError::HandshakeFailed(err.to_string()))
            }
        }
    }

    fn decrypt_available(&mut self) -> Result<(), TlsError> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.ssl_read(&mut chunk) {
                Ok(n) => self.plaintext.append(&chunk[..n]),
                Err(err) if err.code() == ErrorCode::WANT_READ => return Ok(()),
                Err(err) if err.code() == ErrorCode::ZERO_RETURN => {
                    debug!("peer closed TLS session");
                    self.state = TlsState::Errored;
                    return Err(TlsError::Closed);
                }
                Err(err) => {
                    error!(code = ?err.code(), "TLS read failed");
                    self.state = TlsState::Errored;
                    return Err(TlsError::Protocol(err.to_string()));
                }
            }
        }
    }
}
