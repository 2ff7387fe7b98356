use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A key/payload node in the skip list. Its height is decided by a series
/// of coin flips at insertion time and never changes afterwards.
#[derive(Debug)]
pub struct Element {
    key: String,
    val: Arc<[u8]>,
    nexts: Vec<Option<usize>>,
}

impl Element {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Shared handle to the payload. Cloning the handle is cheap and never
    /// copies the bytes; the bytes are immutable once stored.
    pub fn value(&self) -> Arc<[u8]> {
        Arc::clone(&self.val)
    }

    /// Independent copy of the payload.
    pub fn value_copy(&self) -> Vec<u8> {
        self.val.to_vec()
    }

    fn vacant() -> Self {
        Element {
            key: String::new(),
            val: Vec::new().into(),
            nexts: Vec::new(),
        }
    }
}

/// Randomized skip list over (key, payload) rows, sorted lexicographically
/// by key. Keys are unique; payload bytes are opaque.
///
/// Nodes live in an arena and link to each other by index, so the structure
/// is fully owned and safe; freed slots are recycled. The list is not
/// thread safe and must be protected by a lock when used concurrently.
pub struct SkipList {
    nodes: Vec<Element>,
    free: Vec<usize>,
    front: Vec<Option<usize>>,
    len: i64,
    payload_size: i64,
    max_height: usize,
    rng: StdRng,
}

impl SkipList {
    /// Creates a skip list with the given maximum height. A reasonable
    /// height is log2(N/2) where N is the expected number of rows.
    ///
    /// # Panics
    /// Panics if `max_height` is outside [2, 63].
    pub fn new(max_height: usize) -> Self {
        Self::with_rng(max_height, StdRng::from_entropy())
    }

    /// Like [`SkipList::new`] but with a fixed coin-flip seed, for
    /// reproducible layouts in tests and benchmarks.
    pub fn with_seed(max_height: usize, seed: u64) -> Self {
        Self::with_rng(max_height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_height: usize, rng: StdRng) -> Self {
        assert!(
            (2..=63).contains(&max_height),
            "skip list maximum height must be between 2 and 63"
        );
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            front: vec![None; max_height],
            len: 0,
            payload_size: 0,
            max_height,
            rng,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> i64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Running sum of payload lengths over all rows, in bytes.
    pub fn payload_size(&self) -> i64 {
        self.payload_size
    }

    /// First row in ascending key order.
    pub fn first(&self) -> Option<&Element> {
        self.front[0].map(|i| &self.nodes[i])
    }

    /// Forward iterator in ascending key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cur: self.front[0],
        }
    }

    /// Inserts the row, replacing the payload if the key already exists.
    /// Does nothing if `key` is empty.
    pub fn upsert(&mut self, key: &str, val: Arc<[u8]>) {
        if key.is_empty() {
            return;
        }
        let (left, iter) = self.search(key);
        if let Some(i) = iter {
            if self.nodes[i].key == key {
                self.payload_size -= self.nodes[i].val.len() as i64;
                self.payload_size += val.len() as i64;
                self.nodes[i].val = val;
                return;
            }
        }
        self.insert_between(&left, iter, key.to_owned(), val);
    }

    /// Finds a row by exact key.
    pub fn get(&self, key: &str) -> Option<&Element> {
        let (_, iter) = self.search(key);
        let i = iter?;
        if self.nodes[i].key == key {
            Some(&self.nodes[i])
        } else {
            None
        }
    }

    /// All rows whose keys start with `prefix`, in ascending key order.
    pub fn get_by_prefix(&self, prefix: &str) -> Vec<&Element> {
        let (_, iter) = self.search(prefix);
        let mut out = Vec::new();
        let mut cur = iter;
        while let Some(i) = cur {
            let node = &self.nodes[i];
            if !node.key.starts_with(prefix) {
                break;
            }
            out.push(node);
            cur = node.nexts[0];
        }
        out
    }

    /// Removes the row with the given key, returning it if present.
    pub fn del(&mut self, key: &str) -> Option<Element> {
        let (left, iter) = self.search(key);
        let target = iter?;
        if self.nodes[target].key != key {
            return None;
        }
        self.unlink(&left, target);
        Some(self.release(target))
    }

    /// Removes every row whose key starts with `prefix`, returning the
    /// number of rows removed.
    pub fn del_by_prefix(&mut self, prefix: &str) -> i64 {
        let (left, iter) = self.search(prefix);
        let mut cur = iter;
        let mut removed = 0;
        while let Some(i) = cur {
            if !self.nodes[i].key.starts_with(prefix) {
                break;
            }
            let next = self.nodes[i].nexts[0];
            self.unlink(&left, i);
            self.release(i);
            removed += 1;
            cur = next;
        }
        removed
    }

    /// Walks down from the topmost front pointer. Returns, per level, the
    /// last node with key strictly less than `key` ("left"), plus the first
    /// node with key >= `key` at the bottom level, if any.
    fn search(&self, key: &str) -> (Vec<Option<usize>>, Option<usize>) {
        let mut left: Vec<Option<usize>> = vec![None; self.max_height];
        let mut iter: Option<usize> = None;

        for h in (0..self.max_height).rev() {
            match left.get(h + 1).copied().flatten() {
                Some(l) => {
                    left[h] = Some(l);
                    iter = self.nodes[l].nexts[h];
                }
                None => iter = self.front[h],
            }

            while let Some(i) = iter {
                let node = &self.nodes[i];
                if key <= node.key.as_str() {
                    break;
                }
                left[h] = Some(i);
                iter = node.nexts[h];
            }
        }
        (left, iter)
    }

    fn insert_between(
        &mut self,
        left: &[Option<usize>],
        right: Option<usize>,
        key: String,
        val: Arc<[u8]>,
    ) {
        let height = self.random_height();
        self.payload_size += val.len() as i64;
        let idx = self.alloc(Element {
            key,
            val,
            nexts: vec![None; height],
        });

        for lvl in 0..height {
            let next = match right {
                Some(r) if lvl < self.nodes[r].nexts.len() => Some(r),
                _ => match left[lvl] {
                    Some(l) => self.nodes[l].nexts[lvl],
                    None => self.front[lvl],
                },
            };
            self.nodes[idx].nexts[lvl] = next;
            match left[lvl] {
                Some(l) => self.nodes[l].nexts[lvl] = Some(idx),
                None => self.front[lvl] = Some(idx),
            }
        }
        self.len += 1;
    }

    /// Splices `target` out at every level it occupies. `left` must come
    /// from a search for `target`'s key.
    fn unlink(&mut self, left: &[Option<usize>], target: usize) {
        for lvl in 0..self.nodes[target].nexts.len() {
            let next = self.nodes[target].nexts[lvl];
            match left[lvl] {
                Some(l) => self.nodes[l].nexts[lvl] = next,
                None => self.front[lvl] = next,
            }
        }
        self.payload_size -= self.nodes[target].val.len() as i64;
        self.len -= 1;
    }

    fn alloc(&mut self, el: Element) -> usize {
        match self.free.pop() {
            Some(i) => {
                self.nodes[i] = el;
                i
            }
            None => {
                self.nodes.push(el);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Element {
        self.free.push(idx);
        std::mem::replace(&mut self.nodes[idx], Element::vacant())
    }

    /// 1 + the number of consecutive heads, capped at the list height.
    fn random_height(&mut self) -> usize {
        let mut h = 1;
        while h < self.max_height && self.rng.gen::<bool>() {
            h += 1;
        }
        h
    }
}

impl std::fmt::Debug for SkipList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkipList")
            .field("len", &self.len)
            .field("payload_size", &self.payload_size)
            .field("max_height", &self.max_height)
            .finish()
    }
}

/// Forward iterator over the bottom level.
pub struct Iter<'a> {
    list: &'a SkipList,
    cur: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.cur?;
        let el = &self.list.nodes[i];
        self.cur = el.nexts[0];
        Some(el)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn payload(s: &str) -> Arc<[u8]> {
        Vec::from(s).into()
    }

    fn keys_joined(list: &SkipList) -> String {
        list.iter().map(|e| e.key()).collect()
    }

    #[test]
    fn test_insert_ordering() {
        let mut list = SkipList::with_seed(16, 53535353);

        list.upsert("tokyo", payload(""));
        assert_eq!(list.len(), 1);
        assert_eq!(list.first().map(|e| e.key()), Some("tokyo"));

        list.upsert("zulu", payload(""));
        list.upsert("angola", payload(""));
        assert_eq!(list.len(), 3);
        assert_eq!(keys_joined(&list), "angolatokyozulu");
    }

    #[test]
    fn test_empty_key_is_noop() {
        let mut list = SkipList::with_seed(16, 1);
        list.upsert("", payload("ignored"));
        assert_eq!(list.len(), 0);
        assert_eq!(list.payload_size(), 0);
        assert!(list.first().is_none());
    }

    #[test]
    fn test_payload_size_accounting() {
        let mut list = SkipList::with_seed(16, 7);

        list.upsert("aaaaaaaaaaaa", payload("aaaaaaaaaaaa"));
        assert_eq!(list.payload_size(), 12);

        list.upsert("123", payload("123"));
        assert_eq!(list.payload_size(), 15);

        // replacing a payload adjusts the running sum, not the row count
        list.upsert("123", payload("12345"));
        assert_eq!(list.payload_size(), 17);
        assert_eq!(list.len(), 2);

        let removed = list.del("aaaaaaaaaaaa").unwrap();
        assert_eq!(removed.value_copy(), b"aaaaaaaaaaaa");
        assert_eq!(list.payload_size(), 5);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_many_inserts_sorted() {
        let strs = [
            "nyc", "seoul", "korea", "pyongyang", "texas", "dallas", "singapore", "abc",
            "oregon", "portland", "seattle", "washington", "youtube", "twitter", "ground",
            "facebook", "google", "Microsoft", "microsoft", "president", "earth", "++++",
            "Mars", "mars", "go", "Go", "rice", "cake", "bread", "123345", "twew044329-",
            "{{{{{{{{}@#", "@#!$@!$!", "!!!!!!!", "mercy", "paris", "you", "london",
            "uk", "usa", "morning", "UK", "beijing", "china", "lew", "me", "I", "i",
            ",,,,,,,", "dollar", "food", "car", "bike", "word", "number", ">>>>", "fly",
            "9999999", "keyboard", "mouse", "type", "typing", "browser", "ear", "eat",
            "payload", "return", "Ruby", "python", "repeat", "helm", "help", "sometimes",
            "jump", "zero", "panic", "phone", "it", "is", "white", "apple", "name",
            "korea", "korea", "browser", "panic",
        ];

        let mut list = SkipList::with_seed(16, 42);
        for s in strs {
            list.upsert(s, payload(""));
        }

        let mut expected: Vec<&str> = strs.to_vec();
        expected.sort_unstable();
        expected.dedup();
        assert_eq!(list.len() as usize, expected.len());
        assert_eq!(keys_joined(&list), expected.concat());

        assert!(list.get("nothing here").is_none());
        assert_eq!(list.get("python").map(|e| e.key()), Some("python"));
    }

    #[test]
    fn test_get_by_prefix() {
        let mut list = SkipList::with_seed(16, 99);
        for k in ["car", "carnival", "carnivore", "cargo", "caricature", "caravan", "cartoon"] {
            list.upsert(k, payload(k));
        }
        list.upsert("dog", payload("dog"));

        let hits: Vec<&str> = list.get_by_prefix("car").iter().map(|e| e.key()).collect();
        assert_eq!(
            hits,
            vec!["car", "caravan", "cargo", "caricature", "carnival", "carnivore", "cartoon"]
        );

        let hits: Vec<&str> = list.get_by_prefix("carni").iter().map(|e| e.key()).collect();
        assert_eq!(hits, vec!["carnival", "carnivore"]);

        assert!(list.get_by_prefix("zebra").is_empty());
    }

    #[test]
    fn test_del_by_prefix() {
        let mut list = SkipList::with_seed(16, 99);
        for k in ["water", "waterfall", "watermelon", "wine"] {
            list.upsert(k, payload(k));
        }

        assert_eq!(list.del_by_prefix("water"), 3);
        assert_eq!(keys_joined(&list), "wine");
        assert_eq!(list.payload_size(), 4);

        assert_eq!(list.del_by_prefix("nothing"), 0);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_slot_reuse_after_delete() {
        let mut list = SkipList::with_seed(16, 3);
        for i in 0..64 {
            list.upsert(&format!("key{:02}", i), payload("x"));
        }
        for i in 0..64 {
            assert!(list.del(&format!("key{:02}", i)).is_some());
        }
        assert!(list.is_empty());
        assert_eq!(list.payload_size(), 0);

        for i in 0..64 {
            list.upsert(&format!("new{:02}", i), payload("y"));
        }
        assert_eq!(list.len(), 64);
        let keys: Vec<&str> = list.iter().map(|e| e.key()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    #[should_panic(expected = "between 2 and 63")]
    fn test_height_too_small_panics() {
        SkipList::new(1);
    }

    #[test]
    #[should_panic(expected = "between 2 and 63")]
    fn test_height_too_large_panics() {
        SkipList::new(64);
    }

    #[test]
    fn test_coin_is_fair_enough() {
        let mut list = SkipList::with_seed(16, 4242);
        let mut heads = 0f64;
        let mut total = 0f64;
        for _ in 0..100_000 {
            if list.rng.gen::<bool>() {
                heads += 1.0;
            }
            total += 1.0;
        }
        let ratio = heads / total;
        assert!(ratio > 0.48 && ratio < 0.52, "ratio {}", ratio);
    }

    proptest! {
        // model check against a BTreeMap over random operation sequences
        #[test]
        fn prop_behaves_like_btreemap(ops in prop::collection::vec(
            (prop_oneof![Just(0u8), Just(1), Just(2)], "[a-d]{0,4}", "[a-z]{0,8}"),
            1..200,
        )) {
            let mut list = SkipList::with_seed(8, 77);
            let mut model: BTreeMap<String, Vec<u8>> = BTreeMap::new();

            for (op, key, value) in ops {
                match op {
                    0 => {
                        list.upsert(&key, Vec::from(value.as_bytes()).into());
                        if !key.is_empty() {
                            model.insert(key, value.into_bytes());
                        }
                    }
                    1 => {
                        let got = list.get(&key).map(|e| e.value_copy());
                        prop_assert_eq!(got, model.get(&key).cloned());
                    }
                    _ => {
                        let got = list.del(&key).map(|e| e.value_copy());
                        prop_assert_eq!(got, model.remove(&key));
                    }
                }
            }

            let expect_size: i64 = model.values().map(|v| v.len() as i64).sum();
            prop_assert_eq!(list.payload_size(), expect_size);
            prop_assert_eq!(list.len() as usize, model.len());

            let keys: Vec<&str> = list.iter().map(|e| e.key()).collect();
            let model_keys: Vec<&str> = model.keys().map(|k| k.as_str()).collect();
            prop_assert_eq!(keys, model_keys);
        }
    }
}
