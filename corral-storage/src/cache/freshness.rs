//! Read results carrying snapshot metadata.

use super::generation::Generation;
use chrono::Utc;
use corral_core::Timestamp;
use std::time::Duration;

/// How a cache read was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// The snapshot was fresh.
    Hit,
    /// This read ran the loader.
    Loaded,
    /// The snapshot was stale by generation only and another reader was
    /// reloading, so the prior snapshot was returned.
    Dirty,
}

/// Result of a cache read.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    loaded_at: Timestamp,
    generation: Generation,
    kind: ReadKind,
}

impl<T> CacheRead<T> {
    pub fn new(value: T, loaded_at: Timestamp, generation: Generation, kind: ReadKind) -> Self {
        Self {
            value,
            loaded_at,
            generation,
            kind,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the snapshot was built.
    pub fn loaded_at(&self) -> Timestamp {
        self.loaded_at
    }

    /// Generation observed before the snapshot's load began.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn kind(&self) -> ReadKind {
        self.kind
    }

    pub fn was_cache_hit(&self) -> bool {
        matches!(self.kind, ReadKind::Hit | ReadKind::Dirty)
    }

    pub fn is_dirty(&self) -> bool {
        self.kind == ReadKind::Dirty
    }

    /// Time since the snapshot was built.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.loaded_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Transform the value, keeping the metadata.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheRead<U> {
        CacheRead {
            value: f(self.value),
            loaded_at: self.loaded_at,
            generation: self.generation,
            kind: self.kind,
        }
    }
}
