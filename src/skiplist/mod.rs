//! Skip lists backing the ordered key space.
//!
//! Two flavors: [`SkipList`] keeps unique string keys and is the cache's
//! data store; [`DupList`] permits duplicate `Instant` keys and backs the
//! deadline index. Both store their nodes in an index-addressed arena and
//! are not thread safe on their own; callers wrap them in a lock.

mod duplist;
mod list;

pub use self::duplist::{DupElement, DupList, Handle};
pub use self::list::{Element, Iter, SkipList};
