use std::collections::HashMap;
use std::time::Instant;

use crate::skiplist::{DupList, Handle};

/// A (key, seconds) pair for [`Engine::set_ttl`](crate::Engine::set_ttl).
/// Pairs with `seconds <= 0` are ignored.
#[derive(Debug, Clone)]
pub struct Ttl {
    pub key: String,
    pub seconds: i64,
}

impl Ttl {
    pub fn new(key: impl Into<String>, seconds: i64) -> Self {
        Self {
            key: key.into(),
            seconds,
        }
    }
}

/// Deadline index: a duplicate-key skip list ordered by expiry instant,
/// with a side map from data key to list handle enforcing at most one
/// deadline per key. Not thread safe; the engine wraps it in a mutex.
#[derive(Debug)]
pub(crate) struct TtlStore {
    list: DupList,
    handles: HashMap<String, Handle>,
}

impl TtlStore {
    pub fn new(max_height: usize) -> Self {
        Self {
            list: DupList::new(max_height),
            handles: HashMap::new(),
        }
    }

    /// Sets the deadline for `key`, overwriting any existing one.
    pub fn set(&mut self, key: &str, deadline: Instant) {
        if let Some(handle) = self.handles.remove(key) {
            self.list.del_element(handle);
        }
        let handle = self.list.insert(deadline, key.to_owned());
        self.handles.insert(key.to_owned(), handle);
    }

    /// Cancels the deadline for `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.handles.remove(key) {
            Some(handle) => {
                self.list.del_element(handle);
                true
            }
            None => false,
        }
    }

    /// Deadline currently recorded for `key`, if any.
    pub fn deadline_of(&self, key: &str) -> Option<Instant> {
        self.handles.get(key).map(|h| self.list.deadline_at(*h))
    }

    /// Earliest recorded deadline.
    pub fn first_deadline(&self) -> Option<Instant> {
        self.list.first().map(|e| e.deadline())
    }

    /// Drains every entry whose deadline is at or before `now`, earliest
    /// first, returning the expired data keys.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<String> {
        let mut expired = Vec::new();
        while let Some(first) = self.list.first() {
            if first.deadline() > now {
                break;
            }
            if let Some(gone) = self.list.del_first() {
                self.handles.remove(gone.key());
                expired.push(gone.key().to_owned());
            }
        }
        expired
    }

    pub fn len(&self) -> i64 {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_set_overwrites_single_entry() {
        let base = Instant::now();
        let t = |ms: u64| base + Duration::from_millis(ms);

        let mut ts = TtlStore::new(16);
        ts.set("a", t(100));
        ts.set("a", t(50));
        ts.set("a", t(200));

        // one entry per key no matter how many overwrites
        assert_eq!(ts.len(), 1);
        assert_eq!(ts.deadline_of("a"), Some(t(200)));
        assert_eq!(ts.first_deadline(), Some(t(200)));
    }

    #[test]
    fn test_remove() {
        let base = Instant::now();
        let t = |ms: u64| base + Duration::from_millis(ms);

        let mut ts = TtlStore::new(16);
        ts.set("a", t(100));
        ts.set("b", t(50));

        assert!(ts.remove("a"));
        assert!(!ts.remove("a"));
        assert!(!ts.remove("never set"));

        assert_eq!(ts.len(), 1);
        assert_eq!(ts.deadline_of("a"), None);
        assert_eq!(ts.first_deadline(), Some(t(50)));
    }

    #[test]
    fn test_pop_expired_in_deadline_order() {
        let base = Instant::now();
        let t = |ms: u64| base + Duration::from_millis(ms);

        let mut ts = TtlStore::new(16);
        ts.set("c", t(19));
        ts.set("f", t(25));
        ts.set("z", t(11));

        let expired = ts.pop_expired(t(20));
        assert_eq!(expired, vec!["z".to_owned(), "c".to_owned()]);
        assert_eq!(ts.len(), 1);
        assert_eq!(ts.deadline_of("f"), Some(t(25)));

        let expired = ts.pop_expired(t(26));
        assert_eq!(expired, vec!["f".to_owned()]);
        assert!(ts.is_empty());
        assert!(ts.pop_expired(t(100)).is_empty());
    }

    #[test]
    fn test_side_map_matches_list() {
        let base = Instant::now();
        let t = |ms: u64| base + Duration::from_millis(ms);

        let mut ts = TtlStore::new(16);
        for i in 0..32u64 {
            ts.set(&format!("k{}", i), t(1000 - i * 10));
        }
        assert_eq!(ts.len(), 32);
        for i in 0..32u64 {
            assert!(ts.deadline_of(&format!("k{}", i)).is_some());
        }

        let expired = ts.pop_expired(t(1000));
        assert_eq!(expired.len(), 32);
        for key in &expired {
            assert_eq!(ts.deadline_of(key), None);
        }
        assert!(ts.is_empty());
    }

    #[test]
    fn test_first_deadline_is_earliest() {
        let base = Instant::now();
        let t = |ms: u64| base + Duration::from_millis(ms);

        let mut ts = TtlStore::new(16);
        assert_eq!(ts.first_deadline(), None);

        ts.set("late", t(500));
        ts.set("early", t(5));
        ts.set("mid", t(50));
        assert_eq!(ts.first_deadline(), Some(t(5)));

        ts.remove("early");
        assert_eq!(ts.first_deadline(), Some(t(50)));
    }
}
