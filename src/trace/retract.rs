//! Monotone fact retraction.
//!
//! Optimization only ever removes behavior, so liveness facts can be
//! withdrawn without re-running the trace: passes queue retractions as
//! they delete call sites, writes and allocations, and the scheduler
//! applies the queue between waves. Removing a method's last
//! justification cascades into its own outgoing edges.

use std::collections::VecDeque;

use crossbeam_queue::SegQueue;

use crate::{
    model::{FieldRef, MethodRef, Type},
    trace::{CallGraph, LivenessFacts, Reason},
};

/// One queued withdrawal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retraction {
    /// A call site from `caller` to `callee` no longer exists.
    CallEdge {
        /// The method that held the call site.
        caller: MethodRef,
        /// The former target.
        callee: MethodRef,
    },
    /// The last write to a field was removed.
    FieldWrite(FieldRef),
    /// The last read of a field was removed.
    FieldRead(FieldRef),
    /// An allocation site for the class was removed.
    Instantiation(Type),
}

/// Thread-safe retraction queue.
///
/// Passes push concurrently during a wave; the scheduler drains and
/// applies between waves, when no pass holds any method body.
#[derive(Debug, Default)]
pub struct FactRetractions {
    queue: SegQueue<Retraction>,
}

impl FactRetractions {
    /// Queues a withdrawal for the next application point.
    pub fn push(&self, retraction: Retraction) {
        self.queue.push(retraction);
    }

    /// Number of queued retractions.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Applies every queued retraction, cascading through justification
    /// records. Returns the methods that became dead.
    pub fn apply(&self, facts: &LivenessFacts, callgraph: &CallGraph) -> Vec<MethodRef> {
        let mut newly_dead = Vec::new();
        let mut cascade: VecDeque<MethodRef> = VecDeque::new();

        while let Some(retraction) = self.queue.pop() {
            match retraction {
                Retraction::CallEdge { caller, callee } => {
                    callgraph.remove_edge(caller, callee);
                    if facts.retract_justification(callee, &Reason::DirectCall(caller)) {
                        cascade.push_back(callee);
                    }
                }
                Retraction::FieldWrite(field) => {
                    facts.fields_written.remove(&field);
                }
                Retraction::FieldRead(field) => {
                    facts.fields_read.remove(&field);
                }
                Retraction::Instantiation(ty) => {
                    facts.instantiated.remove(&ty);
                }
            }
        }

        // A dead method's own call sites are gone with it.
        while let Some(dead) = cascade.pop_front() {
            newly_dead.push(dead);
            for callee in callgraph.callees(dead) {
                callgraph.remove_edge(dead, callee);
                if facts.retract_justification(callee, &Reason::DirectCall(dead)) {
                    cascade.push_back(callee);
                }
            }
        }
        newly_dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pools;

    #[test]
    fn test_cascade_through_dead_chain() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/A;").unwrap();
        let root = pools.method(holder, "root", wk.void, &[]);
        let mid = pools.method(holder, "mid", wk.void, &[]);
        let leaf = pools.method(holder, "leaf", wk.void, &[]);

        let facts = LivenessFacts::default();
        let callgraph = CallGraph::default();
        facts.justify(root, Reason::KeepRule);
        facts.justify(mid, Reason::DirectCall(root));
        facts.justify(leaf, Reason::DirectCall(mid));
        callgraph.add_edge(root, mid);
        callgraph.add_edge(mid, leaf);

        let retractions = FactRetractions::default();
        retractions.push(Retraction::CallEdge {
            caller: root,
            callee: mid,
        });
        let dead = retractions.apply(&facts, &callgraph);

        assert_eq!(dead, vec![mid, leaf]);
        assert!(facts.is_live(root));
        assert!(!facts.is_live(mid));
        assert!(!facts.is_live(leaf));
    }

    #[test]
    fn test_surviving_justification_blocks_cascade() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/A;").unwrap();
        let a = pools.method(holder, "a", wk.void, &[]);
        let b = pools.method(holder, "b", wk.void, &[]);

        let facts = LivenessFacts::default();
        let callgraph = CallGraph::default();
        facts.justify(b, Reason::DirectCall(a));
        facts.justify(b, Reason::KeepRule);
        callgraph.add_edge(a, b);

        let retractions = FactRetractions::default();
        retractions.push(Retraction::CallEdge {
            caller: a,
            callee: b,
        });
        let dead = retractions.apply(&facts, &callgraph);

        assert!(dead.is_empty());
        assert!(facts.is_live(b));
    }
}
