//! Register-based SSA intermediate representation.
//!
//! Method bodies are converted out of their stack-based input form
//! exactly once, optimized in this form, and lowered to register code
//! only at encoding time. The representation is a conventional SSA CFG:
//!
//! - [`IrCode`] owns the blocks, the value table and the exceptional
//!   edges of one method body.
//! - [`IrBlock`] holds phis separately from ordinary instructions; phis
//!   execute conceptually in parallel at block entry.
//! - [`Instr`] is a flat instruction enum operating on [`ValueId`]s.
//! - [`IrBuilder`] performs abstract-interpretation-based SSA
//!   construction from [`crate::bytecode::StackCode`].
//! - [`Dominators`] and [`verify_ssa`] support pass-side analysis and
//!   the internal well-formedness checks.
//!
//! Every value has exactly one definition and a static type drawn from
//! the compilation's type registry. Exceptional control flow is kept
//! out of block terminators: [`IrCode::exc_edges`] records which blocks
//! may transfer to which handlers.

mod block;
mod builder;
mod code;
mod dominators;
mod instruction;
mod value;
mod verify;

pub use block::{BlockId, IrBlock, Phi};
pub use builder::IrBuilder;
pub use code::{ExcEdge, IrCode};
pub use dominators::Dominators;
pub use instruction::Instr;
pub use value::{ValueId, ValueInfo};
pub use verify::verify_ssa;
