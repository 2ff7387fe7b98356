//! Contract between the cache engine and its backing store.

pub mod fake;

use std::io::Read;
use std::time::{Duration, Instant};

/// Byte stream plus optional absolute expiry, as produced by a fetch.
pub type Fetched = (Box<dyn Read + Send>, Option<Instant>);

/// The pluggable backing store the cache fills itself from.
///
/// `fetch` returns `None` when the origin cannot produce a stream for the
/// key at all; transport failures after that surface as errors from the
/// stream's reads. Implementations must honor `timeout`: once it elapses,
/// reads on the stream are expected to fail rather than block forever.
///
/// The optional expiry is an absolute instant. If it is already in the
/// past when the engine goes to commit the fetched row, the bytes are
/// still handed to the callers of that fill but the row is not stored and
/// no deadline is recorded.
pub trait Origin: Send + Sync {
    fn fetch(&self, key: &str, timeout: Duration) -> Option<Fetched>;
}
