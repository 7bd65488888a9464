//! Interned string pool.
//!
//! All names and string literals in the program model are interned once and
//! referred to by [`StringId`] handles afterwards. Handles are plain `u32`
//! indices into an append-only arena, so they are `Copy`, comparable by
//! identity, and stable for the lifetime of the compilation.
//!
//! # Thread Safety
//!
//! Interning is lock-free on the read path and shard-locked on first
//! insertion: the index is a [`DashMap`] and the storage a [`boxcar::Vec`],
//! so concurrent interning of the same string always yields the same handle.

use std::sync::Arc;

use dashmap::DashMap;

/// Handle to an interned string.
///
/// Two `StringId`s are equal if and only if they denote the same string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringId(pub(crate) u32);

impl StringId {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Append-only interning pool for strings.
pub struct StringPool {
    /// Lookup index from string content to handle.
    index: DashMap<Arc<str>, StringId>,
    /// Arena holding the interned content, indexed by handle.
    data: boxcar::Vec<Arc<str>>,
}

impl StringPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            data: boxcar::Vec::new(),
        }
    }

    /// Interns `value`, returning the canonical handle for it.
    ///
    /// Repeated calls with equal content return the same handle, from any
    /// thread.
    pub fn intern(&self, value: &str) -> StringId {
        if let Some(existing) = self.index.get(value) {
            return *existing;
        }

        // The entry shard lock makes the insert race-free: the losing thread
        // observes the winner's handle instead of allocating a second slot.
        let key: Arc<str> = Arc::from(value);
        *self.index.entry(key.clone()).or_insert_with(|| {
            #[allow(clippy::cast_possible_truncation)]
            StringId(self.data.push(key) as u32)
        })
    }

    /// Returns the content of an interned string.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this pool; handles never cross
    /// pools within one compilation.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.data[id.index()]
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.count()
    }

    /// Returns `true` if nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.count() == 0
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StringPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringPool")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let pool = StringPool::new();
        let a = pool.intern("ordinal");
        let b = pool.intern("ordinal");
        assert_eq!(a, b);
        assert_eq!(pool.get(a), "ordinal");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_distinct_content_distinct_handles() {
        let pool = StringPool::new();
        let a = pool.intern("<init>");
        let b = pool.intern("<clinit>");
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_intern_agrees() {
        use std::sync::Arc as StdArc;

        let pool = StdArc::new(StringPool::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = StdArc::clone(&pool);
                std::thread::spawn(move || pool.intern("shared"))
            })
            .collect();

        let ids: Vec<StringId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(pool.len(), 1);
    }
}
