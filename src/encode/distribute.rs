//! Class-to-container distribution.
//!
//! Greedy bin-fill in canonical class order is the correctness baseline:
//! fill the current container until a class no longer fits, seal it, open
//! the next. The call-graph-aware strategy reorders classes first so that
//! classes calling each other densely land in the same container, which
//! cuts cross-container references; it changes packing quality only, never
//! correctness.

use std::collections::HashMap;

use crate::{
    model::{Application, MethodRef, Pools, Type},
    trace::CallGraph,
    Error, Result,
};

use super::{ClassFootprint, Container, LoweredMethod};

/// How classes are assigned to containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PackingStrategy {
    /// Canonical input order, first container that fits.
    #[default]
    Greedy,
    /// Classes clustered by call-graph affinity before the greedy fill.
    CallGraphAware,
}

/// Partitions the final class set into sealed containers.
///
/// # Errors
///
/// [`Error::FileOverflow`] when a single class cannot fit an empty
/// container; [`Error::Capacity`] when the set needs a second container and
/// `multidex` is off.
pub fn distribute(
    app: &Application,
    bodies: &HashMap<MethodRef, LoweredMethod>,
    callgraph: &CallGraph,
    strategy: PackingStrategy,
    multidex: bool,
    pools: &Pools,
) -> Result<Vec<Container>> {
    let mut footprints: Vec<ClassFootprint> = Vec::with_capacity(app.class_count());
    for class in app.classes() {
        let footprint = ClassFootprint::collect(class, bodies, pools)?;
        if footprint.oversized() {
            return Err(Error::FileOverflow {
                class: pools.types.descriptor(class.ty).to_string(),
            });
        }
        footprints.push(footprint);
    }

    let order = match strategy {
        PackingStrategy::Greedy => (0..footprints.len()).collect(),
        PackingStrategy::CallGraphAware => affinity_order(app, callgraph, pools, &footprints),
    };

    let mut containers: Vec<Container> = vec![Container::new()];
    for index in order {
        let footprint = &footprints[index];
        let current = containers.last_mut().ok_or(Error::Empty)?;
        if current.try_add(footprint)? {
            continue;
        }
        if !multidex {
            let (category, count) = current
                .blocking_category(footprint)
                .unwrap_or(("type", super::INDEX_LIMIT + 1));
            return Err(Error::Capacity {
                category,
                count,
                limit: super::INDEX_LIMIT,
            });
        }
        current.seal();
        let mut next = Container::new();
        if !next.try_add(footprint)? {
            // Fits no empty container either; oversized() should have
            // caught this.
            return Err(internal_error!(
                "class {} rejected by an empty container",
                pools.types.descriptor(footprint.class)
            ));
        }
        containers.push(next);
    }

    for container in &mut containers {
        container.seal();
    }
    containers.retain(|c| !c.is_empty());
    Ok(containers)
}

/// Orders classes by connected component of the class-level call graph,
/// components by their smallest canonical position, members in canonical
/// order. Union-find keeps it near-linear.
fn affinity_order(
    app: &Application,
    callgraph: &CallGraph,
    pools: &Pools,
    footprints: &[ClassFootprint],
) -> Vec<usize> {
    let position: HashMap<Type, usize> = footprints
        .iter()
        .enumerate()
        .map(|(i, fp)| (fp.class, i))
        .collect();

    let mut parent: Vec<usize> = (0..footprints.len()).collect();
    fn find(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }

    for (caller, callee) in callgraph.edge_pairs() {
        let from = position.get(&pools.method_data(caller).holder);
        let to = position.get(&pools.method_data(callee).holder);
        if let (Some(&a), Some(&b)) = (from, to) {
            let (ra, rb) = (find(&mut parent, a), find(&mut parent, b));
            if ra != rb {
                // Attach to the smaller canonical position so the root is
                // the component's representative order key.
                let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
                parent[hi] = lo;
            }
        }
    }

    let mut keyed: Vec<(usize, usize)> = (0..footprints.len())
        .map(|i| (find(&mut parent, i), i))
        .collect();
    keyed.sort_unstable();
    let order: Vec<usize> = keyed.into_iter().map(|(_, i)| i).collect();
    debug_assert_eq!(order.len(), app.class_count());
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        encode::ContainerState,
        model::{ClassDef, ClassFlags, MethodDef, MethodFlags},
    };
    use std::sync::Arc;

    fn app_with(pools: &Arc<Pools>, descriptors: &[&str]) -> Application {
        let wk = *pools.types.well_known();
        let classes = descriptors
            .iter()
            .map(|d| {
                let ty = pools.class_type(d).unwrap();
                let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
                class.methods.push(MethodDef {
                    reference: pools.method(ty, "run", wk.void, &[]),
                    flags: MethodFlags::PUBLIC,
                    code: None,
                });
                class
            })
            .collect();
        Application::build(Arc::clone(pools), classes, Vec::new()).unwrap()
    }

    #[test]
    fn test_greedy_single_container() {
        let pools = Pools::new();
        let app = app_with(&pools, &["Lapp/A;", "Lapp/B;", "Lapp/C;"]);
        let containers = distribute(
            &app,
            &HashMap::new(),
            &CallGraph::default(),
            PackingStrategy::Greedy,
            true,
            &pools,
        )
        .unwrap();

        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].state(), ContainerState::Full);
        assert_eq!(containers[0].classes().len(), 3);
    }

    #[test]
    fn test_affinity_groups_callers_with_callees() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let app = app_with(&pools, &["Lapp/A;", "Lapp/B;", "Lapp/C;"]);

        // A calls C; B is unrelated. Affinity order puts C right after A.
        let a = pools.method(pools.class_type("Lapp/A;").unwrap(), "run", wk.void, &[]);
        let c = pools.method(pools.class_type("Lapp/C;").unwrap(), "run", wk.void, &[]);
        let graph = CallGraph::default();
        graph.add_edge(a, c);

        let mut footprints = Vec::new();
        for class in app.classes() {
            footprints.push(ClassFootprint::collect(class, &HashMap::new(), &pools).unwrap());
        }
        let order = affinity_order(&app, &graph, &pools, &footprints);
        assert_eq!(order, vec![0, 2, 1]);
    }

    #[test]
    fn test_canonical_order_is_deterministic() {
        let pools = Pools::new();
        let app = app_with(&pools, &["Lapp/B;", "Lapp/A;"]);
        let containers = distribute(
            &app,
            &HashMap::new(),
            &CallGraph::default(),
            PackingStrategy::Greedy,
            true,
            &pools,
        )
        .unwrap();
        // Input order, not name order.
        let first = containers[0].classes()[0];
        assert_eq!(pools.types.descriptor(first), "Lapp/B;");
    }
}
