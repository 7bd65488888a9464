//! Platform API level oracle.
//!
//! Some optimizations move references between classes, and a reference
//! to a platform member introduced after the compilation floor must not
//! be moved into code that older platforms verify eagerly. Passes ask
//! this oracle before making such a move. The answer is advisory: an
//! unknown member is assumed present, since it was resolvable against
//! the library input in the first place.

use std::fmt;

/// Read-only availability queries, keyed by descriptor and member name.
///
/// The default implementation is [`ApiTable`]; platforms with richer
/// metadata substitute their own.
pub trait ApiLevelDatabase: fmt::Debug + Send + Sync {
    /// The API level a class was introduced at, when known.
    fn class_level(&self, descriptor: &str) -> Option<u32>;

    /// The API level a method was introduced at, when known.
    fn method_level(&self, holder: &str, name: &str) -> Option<u32>;

    /// The API level a field was introduced at, when known.
    fn field_level(&self, holder: &str, name: &str) -> Option<u32>;

    /// Whether a method is safe to reference at `min_api`.
    fn method_available(&self, holder: &str, name: &str, min_api: u32) -> bool {
        self.method_level(holder, name).is_none_or(|level| level <= min_api)
    }

    /// Whether a field is safe to reference at `min_api`.
    fn field_available(&self, holder: &str, name: &str, min_api: u32) -> bool {
        self.field_level(holder, name).is_none_or(|level| level <= min_api)
    }
}

/// Sorted-table database, built from `(key, level)` entries.
///
/// Member keys use the `Lfoo/Bar;->name` form; class keys are bare
/// descriptors. Lookups are binary searches.
#[derive(Debug, Default)]
pub struct ApiTable {
    entries: Vec<(Box<str>, u32)>,
}

impl ApiTable {
    /// Builds a table from unsorted entries. Duplicate keys keep the
    /// lowest level.
    #[must_use]
    pub fn from_entries(mut entries: Vec<(String, u32)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self {
            entries: entries
                .into_iter()
                .map(|(key, level)| (key.into_boxed_str(), level))
                .collect(),
        }
    }

    /// An empty table: every member reads as always-available.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    fn lookup(&self, key: &str) -> Option<u32> {
        self.entries
            .binary_search_by(|(entry, _)| entry.as_ref().cmp(key))
            .ok()
            .map(|index| self.entries[index].1)
    }
}

impl ApiLevelDatabase for ApiTable {
    fn class_level(&self, descriptor: &str) -> Option<u32> {
        self.lookup(descriptor)
    }

    fn method_level(&self, holder: &str, name: &str) -> Option<u32> {
        self.lookup(&format!("{holder}->{name}"))
    }

    fn field_level(&self, holder: &str, name: &str) -> Option<u32> {
        self.lookup(&format!("{holder}->{name}"))
    }
}
