//! Shared fact store for the reachability trace.
//!
//! Facts only accumulate during analysis; retraction during optimization
//! goes through [`crate::trace::FactRetractions`], which knows how to
//! cascade removals through the justification records kept here.

use std::collections::HashSet;

use dashmap::{DashMap, DashSet};

use crate::model::{FieldRef, MethodRef, Type};

/// Why a method became live. Every live method records at least one
/// reason; a method whose last reason is retracted is dead again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reason {
    /// Named by a keep rule.
    KeepRule,
    /// Directly invoked from another live method.
    DirectCall(MethodRef),
    /// Reached through virtual dispatch on an instantiated class.
    Dispatch(Type),
    /// Class initializer of a live class.
    ClassInitializer(Type),
}

/// Concurrent fact sets shared by all trace workers.
///
/// All sets are insert-only from the enqueuer's point of view. Queries
/// during a wave may observe facts added earlier in the same wave; that
/// only makes the trace reach a fixpoint sooner.
#[derive(Debug, Default)]
pub struct LivenessFacts {
    /// Classes whose static identity is reachable.
    pub live_classes: DashSet<Type>,
    /// Classes observed at a `new` instruction or forced by policy.
    pub instantiated: DashSet<Type>,
    /// Methods with at least one justification.
    pub live_methods: DashSet<MethodRef>,
    /// Fields observed on the read side.
    pub fields_read: DashSet<FieldRef>,
    /// Fields observed on the write side.
    pub fields_written: DashSet<FieldRef>,
    /// Items that must keep their identity through renaming and merging.
    pub pinned: DashSet<Type>,
    /// Virtual call sites seen so far, re-checked as instantiation grows.
    pub virtual_sites: DashSet<(Type, MethodRef)>,
    /// Per-method justification records, for later retraction.
    justifications: DashMap<MethodRef, HashSet<Reason>>,
}

impl LivenessFacts {
    /// Records a justification for a method, returning `true` when the
    /// method was not live before.
    pub fn justify(&self, method: MethodRef, reason: Reason) -> bool {
        self.justifications.entry(method).or_default().insert(reason);
        self.live_methods.insert(method)
    }

    /// Removes one justification; returns `true` when it was the last
    /// and the method is now dead.
    pub fn retract_justification(&self, method: MethodRef, reason: &Reason) -> bool {
        let Some(mut entry) = self.justifications.get_mut(&method) else {
            return false;
        };
        entry.remove(reason);
        if entry.is_empty() {
            drop(entry);
            self.justifications.remove(&method);
            self.live_methods.remove(&method);
            true
        } else {
            false
        }
    }

    /// The recorded reasons for a live method.
    #[must_use]
    pub fn reasons_for(&self, method: MethodRef) -> HashSet<Reason> {
        self.justifications
            .get(&method)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Whether the method currently has any justification.
    #[must_use]
    pub fn is_live(&self, method: MethodRef) -> bool {
        self.live_methods.contains(&method)
    }

    /// Whether a field is referenced from any live code, either side.
    #[must_use]
    pub fn field_referenced(&self, field: FieldRef) -> bool {
        self.fields_read.contains(&field) || self.fields_written.contains(&field)
    }

    /// Snapshot of the instantiated set as an owned `HashSet`, for
    /// hierarchy queries.
    #[must_use]
    pub fn instantiated_snapshot(&self) -> HashSet<Type> {
        self.instantiated.iter().map(|t| *t).collect()
    }

    /// Live method count, for progress diagnostics.
    #[must_use]
    pub fn live_method_count(&self) -> usize {
        self.live_methods.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pools;

    #[test]
    fn test_last_retraction_kills_the_method() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/A;").unwrap();
        let caller = pools.method(holder, "caller", wk.void, &[]);
        let callee = pools.method(holder, "callee", wk.void, &[]);

        let facts = LivenessFacts::default();
        assert!(facts.justify(callee, Reason::DirectCall(caller)));
        assert!(!facts.justify(callee, Reason::KeepRule));
        assert!(facts.is_live(callee));

        assert!(!facts.retract_justification(callee, &Reason::KeepRule));
        assert!(facts.is_live(callee));
        assert!(facts.retract_justification(callee, &Reason::DirectCall(caller)));
        assert!(!facts.is_live(callee));
    }
}
