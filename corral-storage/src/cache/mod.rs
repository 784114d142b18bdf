//! Bounded-staleness read-through cache.
//!
//! A [`VersioningCache`] holds one snapshot produced by a [`CacheLoader`]. A
//! snapshot is served without I/O while both hold:
//!
//! - it was loaded less than the staleness window ago
//! - no generation promotion happened since its load began
//!
//! Promotion is lazy: [`VersioningCache::promote_db_version`] only bumps the
//! generation, and the next read pays for the reload. A burst of writes
//! therefore costs one reload.
//!
//! # Example
//!
//! ```ignore
//! let cache = VersioningCache::new(loader, Duration::from_secs(30));
//! let read = cache.read()?;
//! if read.kind() == ReadKind::Dirty {
//!     tracing::debug!(generation = %read.generation(), "Served prior snapshot during reload");
//! }
//! cache.promote_db_version();
//! ```

pub mod freshness;
pub mod generation;
pub mod traits;
pub mod versioning;

pub use freshness::{CacheRead, ReadKind};
pub use generation::{Generation, GenerationCounter};
pub use traits::{CacheLoader, CacheStats};
pub use versioning::VersioningCache;
