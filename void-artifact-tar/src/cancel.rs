use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, TarError};

/// Shared cancellation signal checked between entries and on every buffered
/// read. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`TarError::Cancelled`] once the flag has been raised.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TarError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Wrap a reader so it stops producing data after cancellation.
    pub(crate) fn reader<R: Read>(&self, inner: R) -> CancelReader<R> {
        CancelReader {
            inner,
            flag: self.clone(),
        }
    }

    /// Map an I/O failure, reporting cancellation in preference to the
    /// interrupted operation.
    pub(crate) fn io_error(&self, source: io::Error, op: &'static str, path: &Path) -> TarError {
        if self.is_cancelled() {
            TarError::Cancelled
        } else {
            TarError::Io {
                op,
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

pub(crate) struct CancelReader<R> {
    inner: R,
    flag: CancelFlag,
}

impl<R: Read> Read for CancelReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.flag.is_cancelled() {
            return Err(io::Error::other("operation cancelled"));
        }
        self.inner.read(buf)
    }
}
