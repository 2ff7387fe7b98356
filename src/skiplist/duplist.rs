use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Stable reference to a node inside a [`DupList`]. Handles are produced by
/// [`DupList::insert`] and stay valid until the node is removed; holding a
/// handle across a removal of that node is a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle(usize);

/// A deadline/key node in the duplicate-key skip list.
#[derive(Debug)]
pub struct DupElement {
    deadline: Instant,
    key: String,
    nexts: Vec<Option<usize>>,
}

impl DupElement {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn vacant() -> Self {
        DupElement {
            // placeholder instant, never read through a live handle
            deadline: Instant::now(),
            key: String::new(),
            nexts: Vec::new(),
        }
    }
}

/// Skip list variant permitting duplicate deadline keys, used as the
/// deadline index. Values are data keys. Equal deadlines sit adjacent,
/// newest insert first; different deadlines are sorted ascending. Unlike
/// the unique-key list, random access is limited to the front of the list
/// plus handle-addressed deletion.
pub struct DupList {
    nodes: Vec<DupElement>,
    free: Vec<usize>,
    front: Vec<Option<usize>>,
    len: i64,
    max_height: usize,
    rng: StdRng,
}

impl DupList {
    /// # Panics
    /// Panics if `max_height` is outside [2, 63].
    pub fn new(max_height: usize) -> Self {
        Self::with_rng(max_height, StdRng::from_entropy())
    }

    pub fn with_seed(max_height: usize, seed: u64) -> Self {
        Self::with_rng(max_height, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_height: usize, rng: StdRng) -> Self {
        assert!(
            (2..=63).contains(&max_height),
            "duplist maximum height must be between 2 and 63"
        );
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            front: vec![None; max_height],
            len: 0,
            max_height,
            rng,
        }
    }

    pub fn len(&self) -> i64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Node with the earliest deadline.
    pub fn first(&self) -> Option<&DupElement> {
        self.front[0].map(|i| &self.nodes[i])
    }

    /// Deadline carried by the node behind `handle`.
    pub fn deadline_at(&self, handle: Handle) -> Instant {
        self.nodes[handle.0].deadline
    }

    pub fn iter(&self) -> impl Iterator<Item = &DupElement> {
        let mut cur = self.front[0];
        std::iter::from_fn(move || {
            let i = cur?;
            let node = &self.nodes[i];
            cur = node.nexts[0];
            Some(node)
        })
    }

    /// O(log N) insertion; equal deadlines are placed adjacent, in front of
    /// any node already carrying the same deadline.
    pub fn insert(&mut self, deadline: Instant, key: String) -> Handle {
        let (left, right) = self.search(deadline);
        let height = self.random_height();
        let idx = self.alloc(DupElement {
            deadline,
            key,
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
        Handle(idx)
    }

    /// Removes and returns the earliest node.
    pub fn del_first(&mut self) -> Option<DupElement> {
        let f = self.front[0]?;
        for lvl in 0..self.nodes[f].nexts.len() {
            if self.front[lvl] == Some(f) {
                self.front[lvl] = self.nodes[f].nexts[lvl];
            }
        }
        self.len -= 1;
        Some(self.release(f))
    }

    /// Removes the node behind `handle` wherever it sits. A boundary walk
    /// finds, per level, the last node strictly earlier than the target's
    /// deadline; the stretch between that boundary and the target holds
    /// only equal deadlines, which is walked forward to the target's true
    /// predecessor before splicing. The boundary never lands past the
    /// target, even when taller nodes with the same deadline sit behind it.
    pub fn del_element(&mut self, handle: Handle) -> DupElement {
        let target = handle.0;
        let deadline = self.nodes[target].deadline;
        let (left, _) = self.search(deadline);

        for lvl in 0..self.nodes[target].nexts.len() {
            let mut pred = left[lvl];
            loop {
                let next = match pred {
                    Some(p) => self.nodes[p].nexts[lvl],
                    None => self.front[lvl],
                };
                match next {
                    Some(n) if n == target => break,
                    Some(n) => pred = Some(n),
                    None => unreachable!("live handle missing from its own level"),
                }
            }
            let next = self.nodes[target].nexts[lvl];
            match pred {
                Some(p) => self.nodes[p].nexts[lvl] = next,
                None => self.front[lvl] = next,
            }
        }
        self.len -= 1;
        self.release(target)
    }

    /// Boundary walk for `deadline`: per-level last node strictly earlier,
    /// plus the first node at or after it.
    fn search(&self, deadline: Instant) -> (Vec<Option<usize>>, Option<usize>) {
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
                if deadline <= node.deadline {
                    break;
                }
                left[h] = Some(i);
                iter = node.nexts[h];
            }
        }
        (left, iter)
    }

    fn alloc(&mut self, el: DupElement) -> usize {
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

    fn release(&mut self, idx: usize) -> DupElement {
        self.free.push(idx);
        std::mem::replace(&mut self.nodes[idx], DupElement::vacant())
    }

    fn random_height(&mut self) -> usize {
        let mut h = 1;
        while h < self.max_height && self.rng.gen::<bool>() {
            h += 1;
        }
        h
    }
}

impl std::fmt::Debug for DupList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DupList")
            .field("len", &self.len)
            .field("max_height", &self.max_height)
            .finish()
    }
}
