//! Shared state threaded through the optimization phase.

use std::sync::{Arc, RwLock};

use dashmap::{DashMap, DashSet};

use crate::{
    api::{ApiLevelDatabase, ApiTable},
    diagnostics::DiagnosticSink,
    ir::IrCode,
    model::MethodRef,
    optimize::GraphLens,
    options::CompileOptions,
    synthetic::SyntheticItems,
    trace::{CallGraph, FactRetractions, LivenessFacts},
    Error, Result,
};

/// Everything a pass may consult or update while running.
///
/// Method bodies live in `ir_bodies`; the scheduler removes a body
/// before handing it to a pass and reinserts it afterwards, so no two
/// passes ever mutate the same body concurrently. Facts and the
/// retraction queue are safe for concurrent use; the lens is published
/// through a lock and only extended between waves.
#[derive(Debug)]
pub struct CompilerContext {
    /// Interning pools, shared with the application model.
    pub pools: Arc<crate::model::Pools>,
    /// Compilation tunables.
    pub options: CompileOptions,
    /// SSA bodies of live methods, keyed by original reference.
    pub ir_bodies: DashMap<MethodRef, IrCode>,
    /// Liveness facts from the trace, retractable during optimization.
    pub facts: LivenessFacts,
    /// Resolved call edges.
    pub callgraph: CallGraph,
    /// Withdrawals queued by passes, applied between waves.
    pub retractions: FactRetractions,
    /// Event sink.
    pub diagnostics: DiagnosticSink,
    /// Pending compiler-generated classes, committed between waves.
    pub synthetics: SyntheticItems,
    /// Platform availability oracle consulted before moving references.
    pub api: Arc<dyn ApiLevelDatabase>,
    /// Methods fully processed in the current wave.
    pub processed: DashSet<MethodRef>,
    lens: RwLock<GraphLens>,
}

impl CompilerContext {
    /// Fresh context over a model's pools.
    #[must_use]
    pub fn new(pools: Arc<crate::model::Pools>, options: CompileOptions) -> Self {
        Self {
            pools,
            options,
            ir_bodies: DashMap::new(),
            facts: LivenessFacts::default(),
            callgraph: CallGraph::default(),
            retractions: FactRetractions::default(),
            diagnostics: DiagnosticSink::default(),
            synthetics: SyntheticItems::new(),
            api: Arc::new(ApiTable::empty()),
            processed: DashSet::new(),
            lens: RwLock::new(GraphLens::identity()),
        }
    }

    /// Substitutes the platform availability oracle.
    #[must_use]
    pub fn with_api(mut self, api: Arc<dyn ApiLevelDatabase>) -> Self {
        self.api = api;
        self
    }

    /// Current lens snapshot. Cheap: one `Arc` clone.
    ///
    /// # Errors
    ///
    /// [`Error::LockError`] when the lens lock is poisoned.
    pub fn lens(&self) -> Result<GraphLens> {
        Ok(self.lens.read().map_err(|_| Error::LockError)?.clone())
    }

    /// Replaces the published lens. Called by global passes at wave
    /// boundaries only.
    ///
    /// # Errors
    ///
    /// [`Error::LockError`] when the lens lock is poisoned.
    pub fn publish_lens(&self, lens: GraphLens) -> Result<()> {
        *self.lens.write().map_err(|_| Error::LockError)? = lens;
        Ok(())
    }

    /// The live methods currently holding a body, in deterministic
    /// order.
    #[must_use]
    pub fn live_method_order(&self) -> Vec<MethodRef> {
        let mut methods: Vec<MethodRef> =
            self.ir_bodies.iter().map(|entry| *entry.key()).collect();
        methods.sort_unstable();
        self.callgraph.reverse_topological(&methods)
    }

    /// Drops the bodies of methods that died during retraction.
    pub fn discard_bodies(&self, dead: &[MethodRef]) {
        for method in dead {
            self.ir_bodies.remove(method);
        }
    }
}
