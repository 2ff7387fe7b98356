use std::io::{self, Read};
use std::sync::Arc;

/// Result type that uses our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the cache engine.
///
/// The engine broadcasts one fetch outcome to every caller waiting on the
/// same key, so the error must be cheap to clone; io errors are wrapped in
/// an `Arc` for that reason.
#[derive(Debug, Clone)]
pub enum Error {
    /// Invalid engine configuration, rejected at construction
    Config(&'static str),
    /// The origin returned no byte stream for the requested key
    NoStream,
    /// Reading the origin's byte stream failed or timed out
    Fetch(Arc<io::Error>),
    /// Eviction could not free enough space to admit a payload
    InsufficientSpace { required: i64 },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::NoStream => write!(f, "origin returned no stream"),
            Error::Fetch(e) => write!(f, "origin fetch failed: {}", e),
            Error::InsufficientSpace { required } => {
                write!(f, "cannot free {} bytes of payload space", required)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Fetch(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Fetch(Arc::new(err))
    }
}

/// A read-only view over a cached payload.
///
/// The reader shares the bytes stored inside the cache; the backing memory
/// is never mutated after publication, so many readers may exist at once.
/// Use [`Engine::get_copy`](crate::Engine::get_copy) instead when the
/// caller needs bytes it is free to mutate.
#[derive(Debug, Clone)]
pub struct ValueReader {
    buf: Arc<[u8]>,
    pos: usize,
}

impl ValueReader {
    pub(crate) fn new(buf: Arc<[u8]>) -> Self {
        Self { buf, pos: 0 }
    }

    /// The full payload, regardless of how much has been read.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Copies the full payload into a fresh, caller-owned buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

impl Read for ValueReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let rest = &self.buf[self.pos..];
        let n = rest.len().min(out.len());
        out[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}
