//! Per-connection state machine
//!
//! Ties the transport, the optional TLS engine, the request decoder and the
//! dispatcher together for one connection. The reactor calls in on readable
//! and writable events; everything here runs on the connection's worker
//! thread.
//!
//! In TLS mode raw socket bytes go to the engine first and the decoder is fed
//! from the engine's plaintext buffer; no application byte is parsed before
//! the handshake completes. In plain mode the decoder reads the socket bytes
//! directly.

use super::Dispatcher;
use crate::buffer::Buffer;
use crate::http::decoder::{FeedResult, RequestDecoder};
use crate::http::tls::TlsEngine;
use crate::http::BAD_REQUEST_WIRE;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Whether the reactor should keep or drop the connection after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnLifecycle {
    Open,
    Closed,
}

pub(crate) struct Conn {
    token: Token,
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsEngine>,
    decoder: RequestDecoder,
    read_buf: Buffer,
    out_buf: Buffer,
    /// Shut down once the output buffer drains.
    closing: bool,
    /// Currently registered for writable events.
    write_interest: bool,
}

impl Conn {
    /// Set up state for an accepted connection.
    ///
    /// With TLS enabled this constructs the record engine and starts the
    /// server-side handshake.
    pub(crate) fn new(
        token: Token,
        stream: TcpStream,
        peer: SocketAddr,
        dispatcher: &Dispatcher,
    ) -> io::Result<Self> {
        let tls = match dispatcher.tls_context() {
            Some(context) => {
                let mut engine = TlsEngine::new(context).map_err(io::Error::other)?;
                engine.begin_handshake().map_err(io::Error::other)?;
                Some(engine)
            }
            None => None,
        };

        info!(%peer, tls = tls.is_some(), "connection established");
        Ok(Conn {
            token,
            stream,
            peer,
            tls,
            decoder: RequestDecoder::new(),
            read_buf: Buffer::new(),
            out_buf: Buffer::new(),
            closing: false,
            write_interest: false,
        })
    }

    /// Drain the socket and run the decode/dispatch loop.
    pub(crate) fn on_readable(
        &mut self,
        registry: &Registry,
        dispatcher: &Dispatcher,
    ) -> ConnLifecycle {
        let mut chunk = [0u8; 16384];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed connection");
                    return ConnLifecycle::Closed;
                }
                Ok(n) => {
                    if self.ingest(&chunk[..n], dispatcher).is_err() {
                        return ConnLifecycle::Closed;
                    }
                    if self.closing {
                        break;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(peer = %self.peer, %err, "socket read failed");
                    return ConnLifecycle::Closed;
                }
            }
        }

        self.flush(registry)
    }

    /// Continue flushing buffered output.
    pub(crate) fn on_writable(&mut self, registry: &Registry) -> ConnLifecycle {
        self.flush(registry)
    }

    /// Deregister from the poller; dropping the connection closes the socket
    /// and, with it, any TLS engine state.
    pub(crate) fn teardown(&mut self, registry: &Registry) {
        let _ = registry.deregister(&mut self.stream);
        debug!(peer = %self.peer, "connection torn down");
    }

    /// Route received bytes through the TLS engine when present, then feed
    /// the decoder. Errors are terminal for the connection.
    fn ingest(&mut self, bytes: &[u8], dispatcher: &Dispatcher) -> Result<(), ()> {
        match &mut self.tls {
            Some(engine) => {
                let result = engine.on_ciphertext_received(bytes);
                // Handshake replies and close alerts must go out either way.
                let outbound = engine.drain_ciphertext();
                self.out_buf.append(&outbound);

                if let Err(err) = result {
                    error!(peer = %self.peer, %err, "TLS failure");
                    return Err(());
                }
                if !engine.handshake_completed() {
                    return Ok(());
                }
                let plaintext = engine.take_plaintext();
                self.read_buf.append(&plaintext);
            }
            None => self.read_buf.append(bytes),
        }

        self.process_requests(dispatcher)
    }

    /// Decode and dispatch as many complete requests as the buffer holds.
    fn process_requests(&mut self, dispatcher: &Dispatcher) -> Result<(), ()> {
        while !self.closing {
            match self.decoder.feed(&mut self.read_buf, SystemTime::now()) {
                FeedResult::NeedMore => break,
                FeedResult::Malformed => {
                    warn!(peer = %self.peer, "malformed request, closing");
                    self.enqueue(BAD_REQUEST_WIRE)?;
                    self.closing = true;
                }
                FeedResult::Complete => {
                    let request = self.decoder.take_request();
                    let response = dispatcher.dispatch(request);
                    let keep_alive = response.is_keep_alive();

                    self.enqueue(&response.to_wire())?;

                    if keep_alive {
                        self.decoder.reset();
                    } else {
                        self.closing = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Queue bytes for the peer, encrypting when TLS is enabled.
    fn enqueue(&mut self, bytes: &[u8]) -> Result<(), ()> {
        match &mut self.tls {
            Some(engine) => {
                if let Err(err) = engine.write_plaintext(bytes) {
                    error!(peer = %self.peer, %err, "TLS encrypt failed");
                    return Err(());
                }
                let outbound = engine.drain_ciphertext();
                self.out_buf.append(&outbound);
            }
            None => self.out_buf.append(bytes),
        }
        Ok(())
    }

    /// Write buffered output until done or the socket would block.
    fn flush(&mut self, registry: &Registry) -> ConnLifecycle {
        while !self.out_buf.is_empty() {
            match self.stream.write(self.out_buf.peek()) {
                Ok(0) => return ConnLifecycle::Closed,
                Ok(n) => self.out_buf.retrieve(n),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(peer = %self.peer, %err, "socket write failed");
                    return ConnLifecycle::Closed;
                }
            }
        }

        if self.out_buf.is_empty() {
            if self.closing {
                let _ = self.stream.shutdown(Shutdown::Write);
                return ConnLifecycle::Closed;
            }
            self.set_write_interest(registry, false);
        } else {
            self.set_write_interest(registry, true);
        }
        ConnLifecycle::Open
    }

    fn set_write_interest(&mut self, registry: &Registry, want: bool) {
        if self.write_interest == want {
            return;
        }
        let interest = if want {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(err) = registry.reregister(&mut self.stream, self.token, interest) {
            error!(peer = %self.peer, %err, "failed to update interest");
            return;
        }
        self.write_interest = want;
    }
}
