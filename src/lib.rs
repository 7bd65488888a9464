#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # dexopt
//!
//! An ahead-of-time whole-program bytecode optimizer. `dexopt` consumes
//! stack-machine class files, traces reachability from declared entry
//! points, optimizes the surviving code in SSA form and serializes the
//! result into fixed-capacity output containers.
//!
//! ## Pipeline
//!
//! - **Program model** ([`model`]) - interned pools for types, strings,
//!   prototypes and member references; class definitions owned by an
//!   [`model::Application`] arena.
//! - **IR builder** ([`ir`]) - converts stack bytecode into a
//!   register-based SSA representation with basic blocks and phis,
//!   verified against a computed dominator tree.
//! - **Reachability trace** ([`trace`]) - a parallel fixed-point
//!   enqueuer over keep-rule roots, producing liveness facts and the
//!   call graph.
//! - **Optimization** ([`optimize`]) - waves of IR passes (dead code,
//!   field value propagation, inlining, class merging, enum unboxing)
//!   coordinated by a cumulative [`optimize::GraphLens`] that records
//!   every identity change.
//! - **Synthetics** ([`synthetic`]) - deterministic, content-addressed
//!   naming for compiler-generated classes, committed into the model
//!   only between waves.
//! - **Encoding** ([`encode`]) - register lowering, capacity-aware
//!   container packing and binary serialization with a payload
//!   checksum.
//!
//! ## Quick Start
//!
//! ```rust
//! use dexopt::prelude::*;
//! use std::sync::Arc;
//!
//! let pools = Pools::new();
//! let wk = *pools.types.well_known();
//! let main_ty = pools.class_type("Lapp/Main;")?;
//! let entry = pools.method(main_ty, "main", wk.int, &[]);
//!
//! let mut main = ClassDef::new(main_ty, ClassFlags::PUBLIC, Some(wk.object));
//! main.methods.push(MethodDef {
//!     reference: entry,
//!     flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
//!     code: Some(StackCode::new(0, vec![StackOp::PushInt(7), StackOp::Return])),
//! });
//!
//! let inputs = CompilationInputs {
//!     classes: vec![main],
//!     library: Vec::new(),
//!     keep: vec![KeepRule::member("Lapp/Main;", "main")],
//! };
//! let program = compile(pools, inputs, CompileOptions::default())?;
//! assert_eq!(program.containers.len(), 1);
//! # Ok::<(), dexopt::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). Input errors
//! ([`Error::Malformed`], [`Error::StackShape`], [`Error::DuplicateType`],
//! [`Error::Empty`]) abort before optimization; capacity errors
//! ([`Error::Capacity`], [`Error::FileOverflow`],
//! [`Error::RegisterOverflow`]) abort during encoding; internal
//! consistency violations surface as [`Error::Internal`] and never
//! produce output.
//!
//! ## Concurrency
//!
//! The trace and the per-method pass rounds run data-parallel on a
//! `rayon` pool. Shared state is limited to concurrent fact sets and
//! the pending-synthetic map; method bodies are owned exclusively by
//! whichever worker holds them. Output is deterministic: aggregation
//! points re-sort into canonical input order rather than relying on
//! completion order.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
///
/// # Example
///
/// ```rust
/// use dexopt::prelude::*;
///
/// let pools = Pools::new();
/// let ty = pools.class_type("Lapp/Main;")?;
/// assert_eq!(pools.types.descriptor(ty), "Lapp/Main;");
/// # Ok::<(), dexopt::Error>(())
/// ```
pub mod prelude;

/// Platform API level oracle consulted before moving references.
pub mod api;

/// The stack-machine input instruction set.
pub mod bytecode;

/// The compilation driver: trace, optimize, lower, pack, serialize.
pub mod compile;

/// Structured error, warning and info events collected per phase.
pub mod diagnostics;

/// Register lowering, container packing and binary serialization.
pub mod encode;

/// The register-based SSA intermediate representation.
pub mod ir;

/// Original-to-final name mapping for renamed or merged items.
pub mod mapping;

/// The interned program model: pools, classes and the hierarchy.
pub mod model;

/// IR passes, the pass scheduler and the identity-rewriting lens.
pub mod optimize;

/// Compilation tunables.
pub mod options;

/// Deterministic allocation of compiler-generated classes.
pub mod synthetic;

/// Whole-program reachability: keep rules, enqueuer, liveness facts.
pub mod trace;

/// The error type covering every failure this crate can return.
pub use error::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// One-call compilation entry points and their input/output types.
pub use compile::{
    compile, compile_with_consumer, compile_with_policy, CompilationInputs, CompiledProgram,
};

/// The tunables every entry point takes.
pub use options::CompileOptions;
