//! Whole-program reachability.
//!
//! The trace answers one question: starting from the keep-rule roots,
//! what can this program reach? Its output drives everything after it.
//! Dead classes and members never get SSA bodies, never see a pass and
//! never reach the encoder.
//!
//! The module splits into:
//!
//! - [`KeepRules`]: the root set, matched by descriptor patterns.
//! - [`Enqueuer`]: the parallel wave-based tracer itself.
//! - [`LivenessFacts`]: the shared fact store with per-method
//!   justification records.
//! - [`FactRetractions`]: monotone withdrawal of facts as optimization
//!   deletes the code that justified them.
//! - [`CallGraph`]: resolved call edges, ordered for the scheduler and
//!   the packer.

mod callgraph;
mod enqueuer;
mod keep;
mod liveness;
mod retract;

pub use callgraph::CallGraph;
pub use enqueuer::{ConservativePolicy, Enqueuer, ReflectionPolicy, TrustingPolicy};
pub use keep::{KeepRule, KeepRules};
pub use liveness::{LivenessFacts, Reason};
pub use retract::{FactRetractions, Retraction};
