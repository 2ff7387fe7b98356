//! Eviction policy: which row goes when the cache runs out of payload
//! space. Access frequency within a sliding relevance window is counted
//! probabilistically by a Count-Min sketch; an approximately time-ordered
//! event list defines the window itself; keys that recently aged out of
//! the window wait in a bounded graveyard as first-choice eviction
//! candidates.

mod sketch;
mod window;

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use self::sketch::CountMinSketch;
use self::window::AccessList;

/// Upper bound on graveyard membership.
pub(crate) const GRAVEYARD_MAX: usize = 1000;

const CMS_EPSILON: f64 = 0.001;
const CMS_DELTA: f64 = 0.99;

/// Frequency and recency bookkeeping for eviction decisions. Not thread
/// safe; the engine wraps it in a mutex and a single recorder thread
/// applies access events in order.
#[derive(Debug)]
pub(crate) struct EvictPolicy {
    cms: CountMinSketch,
    window: AccessList,
    ptr: HashMap<String, usize>,
    graveyard: HashSet<String>,
    relevance_window: Duration,
}

impl EvictPolicy {
    pub fn new(relevance_window: Duration) -> Self {
        Self {
            cms: CountMinSketch::new(CMS_EPSILON, CMS_DELTA),
            window: AccessList::new(),
            ptr: HashMap::new(),
            graveyard: HashSet::new(),
            relevance_window,
        }
    }

    /// Records an access to `key` at `now`: bumps its sketch count, moves
    /// its event to the list tail with a refreshed timestamp, and lifts the
    /// key out of the graveyard if it was buried there.
    pub fn touch(&mut self, key: &str, now: Instant) {
        if let Some(idx) = self.ptr.remove(key) {
            self.window.unlink(idx);
        }
        self.cms.add(key.as_bytes());
        let idx = self.window.push_back(key, now);
        self.ptr.insert(key.to_owned(), idx);
        self.graveyard.remove(key);
    }

    /// Forgets `key` entirely after its row was deleted from the data
    /// store: sketch counts cleared, event unlinked, graveyard membership
    /// dropped.
    pub fn purge(&mut self, key: &str) {
        self.clear_tracking(key);
        self.graveyard.remove(key);
    }

    /// Ages `key` out of the relevance window: clears its tracking and
    /// buries it in the graveyard, evicting an arbitrary member first if
    /// the graveyard is at capacity.
    pub fn retire(&mut self, key: &str) {
        self.clear_tracking(key);
        if self.graveyard.len() >= GRAVEYARD_MAX {
            if let Some(victim) = self.graveyard.iter().next().cloned() {
                self.graveyard.remove(&victim);
            }
        }
        self.graveyard.insert(key.to_owned());
    }

    fn clear_tracking(&mut self, key: &str) {
        let count = self.cms.estimate(key.as_bytes());
        if count > 0 {
            self.cms.test_and_remove(key.as_bytes(), count);
        }
        if let Some(idx) = self.ptr.remove(key) {
            self.window.unlink(idx);
        }
    }

    /// Whether `key` was accessed within the current relevance window.
    pub fn is_relevant(&self, key: &str) -> bool {
        self.ptr.contains_key(key)
    }

    /// Sketch estimate of how often `key` was accessed inside the window.
    pub fn estimate(&self, key: &str) -> u64 {
        self.cms.estimate(key.as_bytes())
    }

    /// Retires every event whose timestamp has left the relevance window.
    /// The list is monotone nondecreasing in time, so the scan stops at the
    /// first still-fresh event. Returns how many keys were retired.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let mut retired = 0;
        while let Some(front) = self.window.front() {
            if self.window.time_at(front) + self.relevance_window > now {
                break;
            }
            let key = self.window.key_at(front).to_owned();
            self.retire(&key);
            retired += 1;
        }
        retired
    }

    /// Snapshot of graveyard members, the first-choice eviction candidates.
    pub fn graveyard_keys(&self) -> Vec<String> {
        self.graveyard.iter().cloned().collect()
    }

    pub fn graveyard_len(&self) -> usize {
        self.graveyard.len()
    }

    #[cfg(test)]
    fn tracked_len(&self) -> usize {
        self.ptr.len()
    }

    #[cfg(test)]
    fn window_len(&self) -> usize {
        self.window.len()
    }
}
