//! Fake origins for tests and benchmarks.

use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;

use super::{Fetched, Origin};

/// Network-ish delay applied by [`DelayedOrigin`] before the first read.
pub const FETCH_DELAY: Duration = Duration::from_millis(100);

/// Echoes the key back as the payload after a 100 ms delay. The key
/// `"error"` fails once the delay has passed. The delay is charged against
/// the fetch timeout: if the timeout is shorter, the read times out
/// instead.
#[derive(Debug, Default)]
pub struct DelayedOrigin;

impl Origin for DelayedOrigin {
    fn fetch(&self, key: &str, timeout: Duration) -> Option<Fetched> {
        let reader = DelayedReader {
            payload: key.as_bytes().to_vec(),
            pos: 0,
            fail: key == "error",
            ready_at: Instant::now() + FETCH_DELAY,
            deadline: Instant::now() + timeout,
            started: false,
        };
        Some((Box::new(reader), None))
    }
}

struct DelayedReader {
    payload: Vec<u8>,
    pos: usize,
    fail: bool,
    ready_at: Instant,
    deadline: Instant,
    started: bool,
}

impl Read for DelayedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if !self.started {
            self.started = true;
            let now = Instant::now();
            if self.deadline < self.ready_at {
                thread::sleep(self.deadline.saturating_duration_since(now));
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "context deadline exceeded",
                ));
            }
            thread::sleep(self.ready_at.saturating_duration_since(now));
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::Other, "fake error"));
            }
        } else if Instant::now() > self.deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "context deadline exceeded",
            ));
        }
        copy_out(&self.payload, &mut self.pos, out)
    }
}

/// Echoes the key back immediately. The key `"bench error"` fails on read.
#[derive(Debug, Default)]
pub struct NoDelayOrigin;

impl Origin for NoDelayOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Option<Fetched> {
        let reader = StaticReader {
            payload: key.as_bytes().to_vec(),
            pos: 0,
            fail: key == "bench error",
        };
        Some((Box::new(reader), None))
    }
}

/// Echoes the key back immediately with an expiry 24 hours out.
#[derive(Debug, Default)]
pub struct ExpiringOrigin;

impl Origin for ExpiringOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Option<Fetched> {
        let reader = StaticReader {
            payload: key.as_bytes().to_vec(),
            pos: 0,
            fail: false,
        };
        let expiry = Instant::now() + Duration::from_secs(24 * 3600);
        Some((Box::new(reader), Some(expiry)))
    }
}

/// Echoes the key back with an expiry that has already passed, so the row
/// must never be committed.
#[derive(Debug)]
pub struct PastExpiryOrigin {
    born: Instant,
}

impl Default for PastExpiryOrigin {
    fn default() -> Self {
        Self {
            born: Instant::now(),
        }
    }
}

impl Origin for PastExpiryOrigin {
    fn fetch(&self, key: &str, _timeout: Duration) -> Option<Fetched> {
        let reader = StaticReader {
            payload: key.as_bytes().to_vec(),
            pos: 0,
            fail: false,
        };
        Some((Box::new(reader), Some(self.born)))
    }
}

/// A 10000-byte all-zero payload for every key, for pressure tests.
#[derive(Debug, Default)]
pub struct ZeroesOrigin;

impl Origin for ZeroesOrigin {
    fn fetch(&self, _key: &str, _timeout: Duration) -> Option<Fetched> {
        let reader = StaticReader {
            payload: vec![0u8; 10_000],
            pos: 0,
            fail: false,
        };
        Some((Box::new(reader), None))
    }
}

/// Random 1000-2000 byte payloads with expiries up to 30 ms out.
#[derive(Debug, Default)]
pub struct RandomOrigin;

impl Origin for RandomOrigin {
    fn fetch(&self, _key: &str, _timeout: Duration) -> Option<Fetched> {
        let mut rng = rand::thread_rng();
        let reader = StaticReader {
            payload: vec![0u8; 1000 + rng.gen_range(0..1000)],
            pos: 0,
            fail: false,
        };
        let expiry = Instant::now() + Duration::from_millis(rng.gen_range(0..30));
        Some((Box::new(reader), Some(expiry)))
    }
}

/// An origin that never produces a stream.
#[derive(Debug, Default)]
pub struct NoStreamOrigin;

impl Origin for NoStreamOrigin {
    fn fetch(&self, _key: &str, _timeout: Duration) -> Option<Fetched> {
        None
    }
}

/// Wraps another origin and counts how many fetches reach it, for
/// asserting the single-flight guarantee.
#[derive(Debug)]
pub struct CountingOrigin<O> {
    inner: O,
    fetches: AtomicUsize,
}

impl<O: Origin> CountingOrigin<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl<O: Origin> Origin for CountingOrigin<O> {
    fn fetch(&self, key: &str, timeout: Duration) -> Option<Fetched> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(key, timeout)
    }
}

struct StaticReader {
    payload: Vec<u8>,
    pos: usize,
    fail: bool,
}

impl Read for StaticReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::Other, "fake bench error"));
        }
        copy_out(&self.payload, &mut self.pos, out)
    }
}

fn copy_out(payload: &[u8], pos: &mut usize, out: &mut [u8]) -> io::Result<usize> {
    let rest = &payload[*pos..];
    let n = rest.len().min(out.len());
    out[..n].copy_from_slice(&rest[..n]);
    *pos += n;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(origin: &dyn Origin, key: &str, timeout: Duration) -> io::Result<Vec<u8>> {
        let (mut stream, _) = origin.fetch(key, timeout).expect("stream");
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok(buf)
    }

    #[test]
    fn test_delayed_origin_roundtrip() {
        let start = Instant::now();
        let got = drain(&DelayedOrigin, "water", Duration::from_millis(250)).unwrap();
        assert_eq!(got, b"water");
        assert!(start.elapsed() >= FETCH_DELAY);
    }

    #[test]
    fn test_delayed_origin_error_key() {
        let err = drain(&DelayedOrigin, "error", Duration::from_millis(250)).unwrap_err();
        assert_eq!(err.to_string(), "fake error");
    }

    #[test]
    fn test_delayed_origin_times_out() {
        let err = drain(&DelayedOrigin, "slow", Duration::from_millis(20)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_no_delay_origin() {
        let got = drain(&NoDelayOrigin, "abc", Duration::from_millis(10)).unwrap();
        assert_eq!(got, b"abc");
        assert!(drain(&NoDelayOrigin, "bench error", Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_expiring_origin_future_expiry() {
        let (_, expiry) = ExpiringOrigin.fetch("k", Duration::from_millis(10)).unwrap();
        assert!(expiry.unwrap() > Instant::now());
    }

    #[test]
    fn test_past_expiry_origin() {
        let origin = PastExpiryOrigin::default();
        let (_, expiry) = origin.fetch("k", Duration::from_millis(10)).unwrap();
        assert!(expiry.unwrap() <= Instant::now());
    }

    #[test]
    fn test_counting_origin() {
        let origin = CountingOrigin::new(NoDelayOrigin);
        assert_eq!(origin.fetches(), 0);
        drain(&origin, "a", Duration::from_millis(10)).unwrap();
        drain(&origin, "b", Duration::from_millis(10)).unwrap();
        assert_eq!(origin.fetches(), 2);
    }

    #[test]
    fn test_zeroes_origin_payload_size() {
        let got = drain(&ZeroesOrigin, "anything", Duration::from_millis(10)).unwrap();
        assert_eq!(got.len(), 10_000);
        assert!(got.iter().all(|&b| b == 0));
    }
}
