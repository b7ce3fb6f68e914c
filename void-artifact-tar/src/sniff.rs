//! Payload classification from leading bytes.

use std::io::{self, Read};

use crate::layer::LayerType;

/// Gzip magic bytes (1f 8b).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Look-ahead over a byte stream without consuming it.
pub trait Peek {
    /// Return up to `n` upcoming bytes. A shorter slice is only returned when
    /// the stream ends first.
    fn peek(&mut self, n: usize) -> io::Result<&[u8]>;
}

impl<P: Peek + ?Sized> Peek for &mut P {
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        (**self).peek(n)
    }
}

/// Report whether the stream starts with the gzip magic. A stream shorter
/// than the magic is not gzip.
pub fn looks_like_gzip<P: Peek + ?Sized>(peeker: &mut P) -> io::Result<bool> {
    match peeker.peek(GZIP_MAGIC.len()) {
        Ok(head) => Ok(head == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Classify an undeclared layer: gzip payloads are tarballs, anything else is
/// a static file.
pub fn detect_layer_type<P: Peek + ?Sized>(peeker: &mut P) -> io::Result<LayerType> {
    if looks_like_gzip(peeker)? {
        Ok(LayerType::Tarball)
    } else {
        Ok(LayerType::Static)
    }
}

// ---------------------------------------------------------------------------
// PeekReader
// ---------------------------------------------------------------------------

/// A reader that buffers just enough of its source to answer [`Peek`]
/// requests, then replays the buffered bytes before reading further.
pub struct PeekReader<R> {
    inner: R,
    head: Vec<u8>,
    pos: usize,
}

impl<R: Read> PeekReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            head: Vec::new(),
            pos: 0,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Peek for PeekReader<R> {
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.pos > 0 {
            self.head.drain(..self.pos);
            self.pos = 0;
        }
        while self.head.len() < n {
            let start = self.head.len();
            self.head.resize(n, 0);
            match self.inner.read(&mut self.head[start..]) {
                Ok(0) => {
                    self.head.truncate(start);
                    break;
                }
                Ok(read) => self.head.truncate(start + read),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.head.truncate(start),
                Err(e) => {
                    self.head.truncate(start);
                    return Err(e);
                }
            }
        }
        Ok(&self.head[..n.min(self.head.len())])
    }
}

impl<R: Read> Read for PeekReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.head.len() {
            let buffered = &self.head[self.pos..];
            let len = buffered.len().min(buf.len());
            buf[..len].copy_from_slice(&buffered[..len]);
            self.pos += len;
            if self.pos == self.head.len() {
                self.head.clear();
                self.pos = 0;
            }
            return Ok(len);
        }
        self.inner.read(buf)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
