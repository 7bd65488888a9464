//! The optimization phase.
//!
//! Passes transform live SSA bodies and, for global passes, the
//! application model itself. Three rules keep the phase coherent:
//!
//! - A pass owns the body it transforms; the scheduler arranges
//!   exclusive access, so passes never lock.
//! - Facts from the trace are only ever *withdrawn*, through the
//!   retraction queue, never silently invalidated.
//! - Structural changes publish [`GraphLens`] layers instead of
//!   patching references in place; everything downstream resolves
//!   references through the lens.

mod context;
mod lens;
mod pass;
pub mod passes;
mod scheduler;

pub use context::CompilerContext;
pub use lens::{GraphLens, LensNode, MethodLookup, MethodMapping, PrototypeChanges};
pub use pass::IrPass;
pub use scheduler::PassScheduler;

use crate::options::CompileOptions;

/// The standard pipeline: cleanup, propagation, inlining, structural
/// merging. Pass toggles in `options` leave phases empty rather than
/// changing their order.
#[must_use]
pub fn default_pipeline(options: &CompileOptions) -> PassScheduler {
    let mut scheduler = PassScheduler::default();
    scheduler.shrink.push(Box::new(passes::DeadCodePass));
    scheduler
        .propagate
        .push(Box::new(passes::FieldValuePass::default()));
    if options.enable_inlining {
        scheduler.inline.push(Box::new(passes::InlinerPass));
    }
    if options.enable_class_merging {
        scheduler
            .merge
            .push(Box::new(passes::ClassMergerPass::default()));
    }
    if options.enable_enum_unboxing {
        scheduler.merge.push(Box::new(passes::EnumUnboxerPass));
    }
    scheduler
}
