//! Pass scheduler for the optimization phase.
//!
//! The scheduler runs passes in waves over the live methods. Per-method
//! passes execute in parallel with exclusive body ownership: a body is
//! removed from the shared map, transformed with no locks held, and
//! reinserted. Global passes run alone between per-method rounds.
//! Retractions queued during a wave are applied at its end, and methods
//! that die as a result lose their bodies before the next wave.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use tracing::debug;

use crate::{
    ir::verify_ssa,
    model::Application,
    optimize::{CompilerContext, IrPass},
    Result,
};

/// Orchestrates optimization passes in a phased pipeline.
///
/// 1. **Shrink**: per-method cleanup (dead code, branch folding).
/// 2. **Propagate**: value propagation across members (field values).
/// 3. **Inline**: call-site inlining.
/// 4. **Merge**: global structural changes (class merging, enum
///    unboxing), which extend the lens.
///
/// Each wave runs all four phases; waves repeat until none of them
/// changes anything or the configured limit is reached.
#[derive(Default)]
pub struct PassScheduler {
    /// Phase 1: per-method cleanup.
    pub shrink: Vec<Box<dyn IrPass>>,
    /// Phase 2: cross-member value propagation.
    pub propagate: Vec<Box<dyn IrPass>>,
    /// Phase 3: inlining.
    pub inline: Vec<Box<dyn IrPass>>,
    /// Phase 4: global structural passes.
    pub merge: Vec<Box<dyn IrPass>>,
}

impl PassScheduler {
    /// Runs the pipeline to fixpoint or the wave limit.
    ///
    /// Returns the number of waves completed.
    ///
    /// # Errors
    ///
    /// Propagates the first pass failure; the application is left in
    /// whatever state the failing wave reached, which the driver
    /// discards.
    pub fn run_pipeline(
        &mut self,
        ctx: &CompilerContext,
        app: &mut Application,
    ) -> Result<usize> {
        let max_waves = ctx.options.max_waves;
        let mut waves = 0;

        for wave in 0..max_waves {
            waves = wave + 1;
            let mut changed = false;

            changed |= Self::run_phase(&mut self.shrink, ctx, app)?;
            changed |= Self::run_phase(&mut self.propagate, ctx, app)?;
            changed |= Self::run_phase(&mut self.inline, ctx, app)?;
            changed |= Self::run_phase(&mut self.merge, ctx, app)?;

            let dead = ctx.retractions.apply(&ctx.facts, &ctx.callgraph);
            if !dead.is_empty() {
                debug!(wave, dead = dead.len(), "retraction removed methods");
                ctx.discard_bodies(&dead);
                changed = true;
            }

            // Synthetics enter the model only here, between waves.
            let folded = ctx.synthetics.merge(&ctx.pools);
            if !folded.is_empty() {
                debug!(wave, folded = folded.len(), "folded equivalent synthetics");
                ctx.publish_lens(ctx.lens()?.with_types(folded))?;
            }
            let committed = ctx.synthetics.commit(app)?;
            if committed > 0 {
                debug!(wave, committed, "committed synthetic classes");
            }

            debug!(wave, changed, "optimization wave complete");
            if !changed {
                break;
            }
        }
        Ok(waves)
    }

    /// Runs one phase's passes once each.
    fn run_phase(
        passes: &mut [Box<dyn IrPass>],
        ctx: &CompilerContext,
        app: &mut Application,
    ) -> Result<bool> {
        if passes.is_empty() {
            return Ok(false);
        }
        let any_changed = AtomicBool::new(false);

        for pass in passes.iter_mut() {
            pass.initialize(ctx, app)?;
        }

        for pass in passes.iter_mut() {
            if pass.is_global() && pass.run_global(ctx, app)? {
                any_changed.store(true, Ordering::Relaxed);
            }
        }

        // Callees before callers, so inlining and propagation see
        // already-optimized callees.
        let order = ctx.live_method_order();
        for pass in passes.iter() {
            if pass.is_global() {
                continue;
            }
            let results: Vec<Result<()>> = order
                .par_iter()
                .map(|&method| {
                    let Some((_, mut body)) = ctx.ir_bodies.remove(&method) else {
                        return Ok(());
                    };
                    let result = pass.run_on_method(&mut body, method, ctx, app);
                    if let Ok(true) = result {
                        body.remove_trivial_phis();
                        body.recompute_all_preds();
                        debug_assert!(verify_ssa(&body).is_ok(), "pass {} broke ssa", pass.name());
                        any_changed.store(true, Ordering::Relaxed);
                        ctx.processed.insert(method);
                    }
                    ctx.ir_bodies.insert(method, body);
                    result.map(|_| ())
                })
                .collect();
            for result in results {
                result?;
            }
        }

        for pass in passes.iter_mut() {
            pass.finalize(ctx, app)?;
        }
        Ok(any_changed.load(Ordering::Relaxed))
    }
}
