//! prefixcache is an in-process, read-through cache keyed by strings, with
//! an ordered key space that supports prefix scans as well as point
//! lookups.
//!
//! On a miss, the engine fills itself from a pluggable [`Origin`], with at
//! most one fetch in flight per key no matter how many callers miss at
//! once. Rows can carry absolute expiry deadlines, swept by a background
//! worker. When total payload size hits its configured cap, rows are
//! evicted by a policy built on a Count-Min frequency sketch over a
//! sliding relevance window.
//!
//! ```no_run
//! use std::sync::Arc;
//! use prefixcache::{Engine, EngineConfig};
//! use prefixcache::origin::fake::DelayedOrigin;
//!
//! let engine = Engine::new(EngineConfig::default(), Arc::new(DelayedOrigin))?;
//! let reader = engine.get("water")?;
//! assert_eq!(reader.as_slice(), b"water");
//! # Ok::<(), prefixcache::Error>(())
//! ```

pub mod engine;
pub mod origin;
pub mod skiplist;
pub mod types;

mod evict;
mod fill;
mod ttl;

pub use engine::{Engine, EngineConfig};
pub use origin::Origin;
pub use ttl::Ttl;
pub use types::{Error, Result, ValueReader};
