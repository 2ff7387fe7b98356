use std::io::Read;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::evict::EvictPolicy;
use crate::fill::{FillMap, FillResult, Flight, Ticket};
use crate::origin::Origin;
use crate::skiplist::SkipList;
use crate::ttl::{Ttl, TtlStore};
use crate::types::{Error, Result, ValueReader};

/// Depth of the queue feeding the stats recorder thread. Access events are
/// best-effort and dropped when the queue is full.
const STATS_QUEUE_DEPTH: usize = 1024;

/// Ceiling for the widening eviction threshold; past this the cache cannot
/// free the requested space and the fill fails instead of spinning.
const MAX_EVICT_THRESHOLD: u64 = 1 << 32;

/// Construction-time options for [`Engine`]. All fields are validated by
/// [`Engine::new`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Expected number of rows in the cache; used to size the skip lists.
    /// Overestimating is better than underestimating. Must be >= 1024.
    pub expected_len: i64,

    /// Hard cap on the total payload bytes over all rows.
    /// Must be >= 10_000_000.
    pub max_payload_total_size: i64,

    /// Per-fetch deadline handed to the origin. Must be >= 10 ms.
    pub cache_fill_timeout: Duration,

    /// Period of the deadline sweep. Must be >= 1 ms.
    pub ttl_tick_step: Duration,

    /// Period of the relevance sweep. Must be >= 1 ms and no longer than
    /// the relevance window.
    pub evict_policy_tick_step: Duration,

    /// How long an access keeps a key relevant. Must be >= 100 ms.
    pub evict_policy_relevance_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            expected_len: 10_000_000,
            max_payload_total_size: 4_000_000_000,
            cache_fill_timeout: Duration::from_millis(250),
            ttl_tick_step: Duration::from_millis(250),
            evict_policy_tick_step: Duration::from_secs(1),
            evict_policy_relevance_window: Duration::from_secs(24 * 3600),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.expected_len < 1024 {
            return Err(Error::Config("expected_len must be >= 1024"));
        }
        if self.max_payload_total_size < 10_000_000 {
            return Err(Error::Config("max_payload_total_size must be >= 10000000 bytes"));
        }
        if self.cache_fill_timeout < Duration::from_millis(10) {
            return Err(Error::Config("cache_fill_timeout must be >= 10ms"));
        }
        if self.ttl_tick_step < Duration::from_millis(1) {
            return Err(Error::Config("ttl_tick_step must be >= 1ms"));
        }
        if self.evict_policy_tick_step < Duration::from_millis(1) {
            return Err(Error::Config("evict_policy_tick_step must be >= 1ms"));
        }
        if self.evict_policy_tick_step > self.evict_policy_relevance_window {
            return Err(Error::Config(
                "evict_policy_tick_step must not exceed evict_policy_relevance_window",
            ));
        }
        if self.evict_policy_relevance_window < Duration::from_millis(100) {
            return Err(Error::Config("evict_policy_relevance_window must be >= 100ms"));
        }
        Ok(())
    }

    fn skiplist_height(&self) -> usize {
        ((self.expected_len / 2) as f64).log2().floor() as usize
    }
}

enum StatsEvent {
    Touch(String),
    Purge(String),
}

/// State shared between the public handle and the worker threads.
struct Shared {
    /// The ordered data store. The same lock serializes the fill map's
    /// miss-check/registration sequence (see [`FillMap`]).
    data: RwLock<SkipList>,
    fills: FillMap,
    ttl: Mutex<TtlStore>,
    evict: Mutex<EvictPolicy>,
    origin: Arc<dyn Origin>,
    cache_fill_timeout: Duration,
    max_payload_total_size: i64,
    stats_tx: Sender<StatsEvent>,
}

/// The cache engine: an ordered key/value store with read-through filling,
/// deadline expiry, and frequency-driven eviction.
///
/// All operations take `&self`; wrap the engine in an [`Arc`] to share it
/// across threads. Lock order, strictly descending, is data-store write
/// lock, then the TTL store mutex, then the eviction policy mutex; the
/// single-flight registry and per-flight mutexes are leaves.
pub struct Engine {
    shared: Arc<Shared>,
    shutdown_tx: Option<Sender<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Validates `config`, builds the stores, and starts the sweep and
    /// recorder workers.
    pub fn new(config: EngineConfig, origin: Arc<dyn Origin>) -> Result<Engine> {
        config.validate()?;

        let height = config.skiplist_height();
        // assume roughly half the rows carry a deadline
        let ttl_height = (height - 1).max(2);

        let (stats_tx, stats_rx) = bounded(STATS_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let shared = Arc::new(Shared {
            data: RwLock::new(SkipList::new(height)),
            fills: FillMap::new(),
            ttl: Mutex::new(TtlStore::new(ttl_height)),
            evict: Mutex::new(EvictPolicy::new(config.evict_policy_relevance_window)),
            origin,
            cache_fill_timeout: config.cache_fill_timeout,
            max_payload_total_size: config.max_payload_total_size,
            stats_tx,
        });

        let workers = vec![
            {
                let shared = Arc::clone(&shared);
                let shutdown = shutdown_rx.clone();
                let step = config.ttl_tick_step;
                thread::spawn(move || ttl_sweeper(shared, step, shutdown))
            },
            {
                let shared = Arc::clone(&shared);
                let shutdown = shutdown_rx.clone();
                let step = config.evict_policy_tick_step;
                thread::spawn(move || relevance_sweeper(shared, step, shutdown))
            },
            {
                let shared = Arc::clone(&shared);
                thread::spawn(move || recorder(shared, stats_rx, shutdown_rx))
            },
        ];

        Ok(Engine {
            shared,
            shutdown_tx: Some(shutdown_tx),
            workers,
        })
    }

    /// Returns a shared reader over the payload for `key`, filling the
    /// cache from the origin on a miss. Concurrent misses on the same key
    /// trigger a single fetch whose outcome every caller observes.
    pub fn get(&self, key: &str) -> Result<ValueReader> {
        self.record_touch(key);

        if let Some(val) = self.try_get(key) {
            return Ok(ValueReader::new(val));
        }
        self.fill(key).map(ValueReader::new)
    }

    /// Like [`Engine::get`] but hands back an independent copy of the
    /// payload, safe for the caller to mutate.
    pub fn get_copy(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key).map(|r| r.to_vec())
    }

    /// Combines [`Engine::get`] with the key's remaining TTL in seconds
    /// (−1.0 when no deadline is set).
    pub fn get_with_ttl(&self, key: &str) -> Result<(ValueReader, f64)> {
        let reader = self.get(key)?;
        let ttl = self.get_ttl(&[key]);
        Ok((reader, ttl[0]))
    }

    /// Readers for every row whose key starts with `prefix`, in ascending
    /// key order. Never triggers a fill: the origin cannot be asked for a
    /// prefix. An empty result is not an error.
    pub fn get_by_prefix(&self, prefix: &str) -> Vec<ValueReader> {
        let rows: Vec<(String, Arc<[u8]>)> = {
            let data = self.shared.data.read().unwrap();
            data.get_by_prefix(prefix)
                .into_iter()
                .map(|el| (el.key().to_owned(), el.value()))
                .collect()
        };
        rows.into_iter()
            .map(|(key, val)| {
                self.record_touch(&key);
                ValueReader::new(val)
            })
            .collect()
    }

    /// Like [`Engine::get_by_prefix`] with independent payload copies.
    pub fn get_copies_by_prefix(&self, prefix: &str) -> Vec<Vec<u8>> {
        let rows: Vec<(String, Vec<u8>)> = {
            let data = self.shared.data.read().unwrap();
            data.get_by_prefix(prefix)
                .into_iter()
                .map(|el| (el.key().to_owned(), el.value_copy()))
                .collect()
        };
        rows.into_iter()
            .map(|(key, val)| {
                self.record_touch(&key);
                val
            })
            .collect()
    }

    /// Sets deadlines `seconds` from now for the given keys. Pairs naming
    /// absent keys or with `seconds <= 0` are skipped.
    pub fn set_ttl(&self, ttls: &[Ttl]) {
        self.set_ttl_with_unit(ttls, Duration::from_secs(1));
    }

    // second resolution is too coarse for timing tests
    fn set_ttl_with_unit(&self, ttls: &[Ttl], unit: Duration) {
        let now = Instant::now();
        for ttl in ttls {
            if ttl.seconds <= 0 {
                continue;
            }
            let data = self.shared.data.read().unwrap();
            if data.get(&ttl.key).is_none() {
                continue;
            }
            let ticks = ttl.seconds.min(u32::MAX as i64) as u32;
            self.shared
                .ttl
                .lock()
                .unwrap()
                .set(&ttl.key, now + unit * ticks);
        }
    }

    /// Remaining seconds until expiry for each key, in argument order.
    /// Keys without a deadline yield −1.0.
    pub fn get_ttl(&self, keys: &[&str]) -> Vec<f64> {
        let ts = self.shared.ttl.lock().unwrap();
        let now = Instant::now();
        keys.iter()
            .map(|key| match ts.deadline_of(key) {
                Some(deadline) => deadline.saturating_duration_since(now).as_secs_f64(),
                None => -1.0,
            })
            .collect()
    }

    /// Cancels the deadlines of the given keys; a no-op for keys without
    /// one.
    pub fn remove_ttl(&self, keys: &[&str]) {
        let mut ts = self.shared.ttl.lock().unwrap();
        for key in keys {
            ts.remove(key);
        }
    }

    /// Drops the given keys from the cache: row, deadline, and access
    /// statistics. Absent keys are skipped silently.
    pub fn invalidate(&self, keys: &[&str]) {
        let mut data = self.shared.data.write().unwrap();
        for key in keys {
            data.del(key);
            self.shared.ttl.lock().unwrap().remove(key);
            self.record_purge(key);
        }
    }

    /// Drops every key starting with `prefix`, as [`Engine::invalidate`]
    /// does per key.
    pub fn invalidate_by_prefix(&self, prefix: &str) {
        let mut data = self.shared.data.write().unwrap();
        let keys: Vec<String> = data
            .get_by_prefix(prefix)
            .into_iter()
            .map(|el| el.key().to_owned())
            .collect();
        data.del_by_prefix(prefix);
        for key in &keys {
            self.shared.ttl.lock().unwrap().remove(key);
            self.record_purge(key);
        }
    }

    /// Total payload bytes currently stored.
    pub fn payload_size(&self) -> i64 {
        self.shared.data.read().unwrap().payload_size()
    }

    /// Number of rows currently stored.
    pub fn len(&self) -> i64 {
        self.shared.data.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_get(&self, key: &str) -> Option<Arc<[u8]>> {
        let data = self.shared.data.read().unwrap();
        data.get(key).map(|el| el.value())
    }

    /// The miss path. Re-checks under the write lock, then either joins
    /// the in-flight fetch for this key or leads a new one.
    fn fill(&self, key: &str) -> FillResult {
        let ticket = {
            let data = self.shared.data.write().unwrap();
            if let Some(el) = data.get(key) {
                return Ok(el.value());
            }
            // registration happens while the write lock is still held, so
            // a key can never gain two concurrent fetches
            let ticket = self.shared.fills.join_or_lead(key);
            drop(data);
            ticket
        };

        match ticket {
            Ticket::Wait(flight) => self.shared.fills.consume(key, &flight),
            Ticket::Lead(flight) => {
                self.lead_fill(key, &flight);
                self.shared.fills.consume(key, &flight)
            }
        }
    }

    /// Fetches from the origin outside all locks, then commits and
    /// publishes under the write lock.
    fn lead_fill(&self, key: &str, flight: &Flight) {
        match self.fetch_payload(key) {
            Err(err) => {
                let _guard = self.shared.data.write().unwrap();
                self.shared.fills.publish(flight, Err(err));
            }
            Ok((payload, expiry)) => {
                let mut data = self.shared.data.write().unwrap();

                let incoming = payload.len() as i64;
                if data.payload_size() + incoming > self.shared.max_payload_total_size {
                    if let Err(err) = self.evict_until_free(&mut data, incoming) {
                        warn!("dropping fill for {:?}: {}", key, err);
                        self.shared.fills.publish(flight, Err(err));
                        return;
                    }
                }

                match expiry {
                    Some(deadline) if deadline > Instant::now() => {
                        data.upsert(key, Arc::clone(&payload));
                        self.shared.ttl.lock().unwrap().set(key, deadline);
                    }
                    // expiry already in the past: the callers of this fill
                    // still receive the bytes, but the row is not stored
                    Some(_) => {}
                    None => data.upsert(key, Arc::clone(&payload)),
                }

                self.shared.fills.publish(flight, Ok(payload));
            }
        }
    }

    fn fetch_payload(&self, key: &str) -> Result<(Arc<[u8]>, Option<Instant>)> {
        let (mut stream, expiry) = self
            .shared
            .origin
            .fetch(key, self.shared.cache_fill_timeout)
            .ok_or(Error::NoStream)?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf)?;
        Ok((buf.into(), expiry))
    }

    /// Frees payload space until `required` more bytes fit, called with the
    /// write lock held. The graveyard is consulted first; failing that,
    /// widening passes evict rows that are either outside the relevance
    /// window or below an exponentially growing frequency threshold.
    fn evict_until_free(&self, data: &mut SkipList, required: i64) -> Result<()> {
        let buried = self.shared.evict.lock().unwrap().graveyard_keys();
        for key in buried {
            if data.del(&key).is_some() {
                self.shared.ttl.lock().unwrap().remove(&key);
                self.record_purge(&key);
                if self.shared.max_payload_total_size - data.payload_size() > required {
                    return Ok(());
                }
            }
        }

        let mut threshold: u64 = 1;
        loop {
            let keys: Vec<String> = data.iter().map(|el| el.key().to_owned()).collect();
            for key in keys {
                let evictable = {
                    let ep = self.shared.evict.lock().unwrap();
                    !ep.is_relevant(&key) || ep.estimate(&key) <= threshold
                };
                if !evictable {
                    continue;
                }
                if data.del(&key).is_some() {
                    self.shared.ttl.lock().unwrap().remove(&key);
                    self.record_purge(&key);
                    if self.shared.max_payload_total_size - data.payload_size() > required {
                        return Ok(());
                    }
                }
            }
            if data.is_empty() || threshold > MAX_EVICT_THRESHOLD {
                return Err(Error::InsufficientSpace { required });
            }
            threshold *= 4;
        }
    }

    fn record_touch(&self, key: &str) {
        let _ = self
            .shared
            .stats_tx
            .try_send(StatsEvent::Touch(key.to_owned()));
    }

    fn record_purge(&self, key: &str) {
        let _ = self
            .shared
            .stats_tx
            .try_send(StatsEvent::Purge(key.to_owned()));
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        drop(self.shutdown_tx.take());
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Drains expired deadlines, then deletes their rows. The TTL lock is
/// released before the write lock is taken, keeping the lock order intact.
fn ttl_sweeper(shared: Arc<Shared>, step: Duration, shutdown: Receiver<()>) {
    loop {
        match shutdown.recv_timeout(step) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }

        let expired = shared.ttl.lock().unwrap().pop_expired(Instant::now());
        if expired.is_empty() {
            continue;
        }
        debug!("ttl sweep expiring {} keys", expired.len());

        let mut data = shared.data.write().unwrap();
        for key in &expired {
            if data.del(key).is_some() {
                let _ = shared.stats_tx.try_send(StatsEvent::Purge(key.clone()));
            }
        }
    }
}

/// Retires access events that have aged out of the relevance window.
fn relevance_sweeper(shared: Arc<Shared>, step: Duration, shutdown: Receiver<()>) {
    loop {
        match shutdown.recv_timeout(step) {
            Err(RecvTimeoutError::Timeout) => {}
            _ => return,
        }

        let retired = shared.evict.lock().unwrap().sweep(Instant::now());
        if retired > 0 {
            debug!("relevance sweep retired {} keys", retired);
        }
    }
}

/// Applies access and deletion events to the eviction policy, one at a
/// time and in arrival order.
fn recorder(shared: Arc<Shared>, events: Receiver<StatsEvent>, shutdown: Receiver<()>) {
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(StatsEvent::Touch(key)) => {
                    shared.evict.lock().unwrap().touch(&key, Instant::now());
                }
                Ok(StatsEvent::Purge(key)) => {
                    shared.evict.lock().unwrap().purge(&key);
                }
                Err(_) => return,
            },
            recv(shutdown) -> _ => return,
        }
    }
}
