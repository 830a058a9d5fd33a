//! Growable, front-consumable byte buffer
//!
//! Read-side staging area shared by the connection state machine, the TLS
//! record engine and the request decoder. Bytes are appended at the back and
//! consumed from the front; the decoder peeks at the contiguous readable
//! region and retrieves only what it has parsed.

use bytes::{Buf, BytesMut};

/// Front-consumable byte buffer backed by `BytesMut`.
#[derive(Debug, Default)]
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Buffer {
            data: BytesMut::with_capacity(8192),
        }
    }

    /// Append bytes at the back.
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Contiguous view of all readable bytes.
    pub fn peek(&self) -> &[u8] {
        &self.data
    }

    /// Discard `n` bytes from the front.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the readable length.
    pub fn retrieve(&mut self, n: usize) {
        self.data.advance(n);
    }

    /// Discard everything.
    pub fn retrieve_all(&mut self) {
        self.data.clear();
    }

    /// Move all readable bytes out, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        let out = self.data.to_vec();
        self.data.clear();
        out
    }

    /// Offset of the first `\r\n` in the readable region, if any.
    pub fn find_crlf(&self) -> Option<usize> {
        self.data.windows(2).position(|w| w == b"\r\n")
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when there is nothing to read.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        let mut buf = Buffer::new();
        buf.append(bytes);
        buf
    }
}
