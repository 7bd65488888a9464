//! Call graph over live methods.
//!
//! Built as a side effect of tracing, then consulted by the pass
//! scheduler (callees before callers where possible) and by the
//! call-graph-aware packing strategy.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;

use crate::model::MethodRef;

/// Directed caller-to-callee edges, deduplicated.
#[derive(Debug, Default)]
pub struct CallGraph {
    edges: DashMap<MethodRef, HashSet<MethodRef>>,
    reverse: DashMap<MethodRef, HashSet<MethodRef>>,
}

impl CallGraph {
    /// Records one resolved call edge.
    pub fn add_edge(&self, caller: MethodRef, callee: MethodRef) {
        self.edges.entry(caller).or_default().insert(callee);
        self.reverse.entry(callee).or_default().insert(caller);
    }

    /// Removes an edge, when inlining or dead-code removal deletes the
    /// call site.
    pub fn remove_edge(&self, caller: MethodRef, callee: MethodRef) {
        if let Some(mut callees) = self.edges.get_mut(&caller) {
            callees.remove(&callee);
        }
        if let Some(mut callers) = self.reverse.get_mut(&callee) {
            callers.remove(&caller);
        }
    }

    /// Direct callees of a method.
    #[must_use]
    pub fn callees(&self, caller: MethodRef) -> Vec<MethodRef> {
        self.edges
            .get(&caller)
            .map(|set| {
                let mut out: Vec<MethodRef> = set.iter().copied().collect();
                out.sort_unstable_by_key(|m| m.index());
                out
            })
            .unwrap_or_default()
    }

    /// Direct callers of a method.
    #[must_use]
    pub fn callers(&self, callee: MethodRef) -> Vec<MethodRef> {
        self.reverse
            .get(&callee)
            .map(|set| {
                let mut out: Vec<MethodRef> = set.iter().copied().collect();
                out.sort_unstable_by_key(|m| m.index());
                out
            })
            .unwrap_or_default()
    }

    /// All edges as `(caller, callee)` pairs, sorted for deterministic
    /// consumption.
    #[must_use]
    pub fn edge_pairs(&self) -> Vec<(MethodRef, MethodRef)> {
        let mut out = Vec::new();
        for entry in self.edges.iter() {
            for &callee in entry.value() {
                out.push((*entry.key(), callee));
            }
        }
        out.sort_unstable_by_key(|&(a, b)| (a.index(), b.index()));
        out
    }

    /// Whether any live call site still targets the method.
    #[must_use]
    pub fn has_callers(&self, callee: MethodRef) -> bool {
        self.reverse
            .get(&callee)
            .is_some_and(|callers| !callers.is_empty())
    }

    /// Orders `methods` callees-first so that a pass visiting in this
    /// order sees optimized callees at each call site.
    ///
    /// Cycles (recursion) are broken at the back edge; members of a
    /// cycle keep their relative input order.
    #[must_use]
    pub fn reverse_topological(&self, methods: &[MethodRef]) -> Vec<MethodRef> {
        let in_scope: HashSet<MethodRef> = methods.iter().copied().collect();
        let mut state: HashMap<MethodRef, u8> = HashMap::new(); // 1 = open, 2 = done
        let mut out = Vec::with_capacity(methods.len());

        for &root in methods {
            if state.get(&root) == Some(&2) {
                continue;
            }
            // Iterative post-order.
            let mut stack: Vec<(MethodRef, Vec<MethodRef>, usize)> =
                vec![(root, self.callees(root), 0)];
            state.insert(root, 1);
            loop {
                let pending = {
                    let Some((_, callees, next)) = stack.last_mut() else {
                        break;
                    };
                    let callee = callees.get(*next).copied();
                    if callee.is_some() {
                        *next += 1;
                    }
                    callee
                };
                match pending {
                    Some(callee) => {
                        if in_scope.contains(&callee) && !state.contains_key(&callee) {
                            let callee_callees = self.callees(callee);
                            state.insert(callee, 1);
                            stack.push((callee, callee_callees, 0));
                        }
                    }
                    None => {
                        let (method, _, _) = stack.pop().expect("non-empty");
                        state.insert(method, 2);
                        out.push(method);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pools;

    #[test]
    fn test_callees_come_first() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/A;").unwrap();
        let a = pools.method(holder, "a", wk.void, &[]);
        let b = pools.method(holder, "b", wk.void, &[]);
        let c = pools.method(holder, "c", wk.void, &[]);

        let graph = CallGraph::default();
        graph.add_edge(a, b);
        graph.add_edge(b, c);

        let order = graph.reverse_topological(&[a, b, c]);
        let pos = |m| order.iter().position(|&x| x == m).unwrap();
        assert!(pos(c) < pos(b));
        assert!(pos(b) < pos(a));
    }

    #[test]
    fn test_recursion_does_not_loop() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/A;").unwrap();
        let a = pools.method(holder, "a", wk.void, &[]);
        let b = pools.method(holder, "b", wk.void, &[]);

        let graph = CallGraph::default();
        graph.add_edge(a, b);
        graph.add_edge(b, a);

        let order = graph.reverse_topological(&[a, b]);
        assert_eq!(order.len(), 2);
    }
}
