//! The stack-based input instruction set.
//!
//! Input class definitions carry method bodies in this form: a flat
//! instruction sequence operating on an implicit operand stack and a table
//! of numbered local-variable slots, plus an exception-handler table over
//! instruction index ranges. The IR builder converts it to register-based
//! SSA; the conversion is one-directional per compilation.
//!
//! Branch targets are instruction indices into the owning method's `ops`
//! sequence. The archive reader that produces these sequences from raw class
//! bytes is an external collaborator and not part of this crate.

use crate::model::{FieldRef, MethodRef, StringId, Type};

/// Arithmetic and bitwise binary operations on `int` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b` (can throw on division by zero)
    Div,
    /// `a % b` (can throw on division by zero)
    Rem,
    /// `a & b`
    And,
    /// `a | b`
    Or,
    /// `a ^ b`
    Xor,
    /// `a << b`
    Shl,
    /// `a >> b`
    Shr,
}

impl BinaryOp {
    /// Returns `true` if the operation can throw at runtime.
    #[must_use]
    pub const fn can_throw(self) -> bool {
        matches!(self, Self::Div | Self::Rem)
    }
}

/// Comparison conditions for conditional branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfCond {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
}

/// Dispatch kinds for call instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    /// Static dispatch, no receiver.
    Static,
    /// Virtual dispatch on the receiver's runtime class.
    Virtual,
    /// Non-virtual instance dispatch (constructors, private methods).
    Direct,
    /// Virtual dispatch through an interface reference.
    Interface,
}

/// One instruction of the stack-based input form.
#[derive(Debug, Clone, PartialEq)]
pub enum StackOp {
    /// Push a 32-bit integer constant.
    PushInt(i32),
    /// Push an interned string constant.
    PushString(StringId),
    /// Push the null reference.
    PushNull,
    /// Push the value of local slot `n`.
    Load(u16),
    /// Pop into local slot `n`.
    Store(u16),
    /// Duplicate the top of stack.
    Dup,
    /// Discard the top of stack.
    Pop,
    /// Exchange the two top stack values.
    Swap,
    /// Pop two ints, push the operation result.
    Binary(BinaryOp),
    /// Pop an int, push its negation.
    Neg,
    /// Push the value of a static field.
    GetStatic(FieldRef),
    /// Pop a value into a static field.
    PutStatic(FieldRef),
    /// Pop an object reference, push the field value.
    GetField(FieldRef),
    /// Pop an object reference and a value, store into the field.
    PutField(FieldRef),
    /// Pop arguments (receiver first for instance kinds), push the return
    /// value unless the prototype returns `V`.
    Invoke(InvokeKind, MethodRef),
    /// Push a new uninitialized instance of the class.
    New(Type),
    /// Pop a length, push a new array of the element type.
    NewArray(Type),
    /// Pop array and index, push the element.
    ArrayLoad,
    /// Pop array, index and value, store the element.
    ArrayStore,
    /// Pop an array, push its length.
    ArrayLength,
    /// Pop a reference, push it re-typed (throws on mismatch).
    CheckCast(Type),
    /// Pop a reference, push 0/1 membership test result.
    InstanceOf(Type),
    /// Pop a reference, enter its monitor.
    MonitorEnter,
    /// Pop a reference, exit its monitor.
    MonitorExit,
    /// Unconditional branch to an instruction index.
    Goto(u32),
    /// Pop two ints, branch to the target if the condition holds.
    If(IfCond, u32),
    /// Pop one value, branch if it compares against zero/null as given.
    IfZero(IfCond, u32),
    /// Pop an int key; branch to the matching case or fall through.
    Switch {
        /// `(key, target)` pairs, keys strictly ascending.
        cases: Vec<(i32, u32)>,
    },
    /// Pop and return the top of stack.
    Return,
    /// Return from a `V` method.
    ReturnVoid,
    /// Pop a throwable reference and raise it.
    Throw,
}

impl StackOp {
    /// Explicit branch targets of this instruction, if any.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match self {
            Self::Goto(t) | Self::If(_, t) | Self::IfZero(_, t) => vec![*t],
            Self::Switch { cases } => cases.iter().map(|&(_, t)| t).collect(),
            _ => Vec::new(),
        }
    }

    /// Returns `true` if control never falls through to the next instruction.
    #[must_use]
    pub const fn ends_block(&self) -> bool {
        matches!(
            self,
            Self::Goto(_) | Self::Return | Self::ReturnVoid | Self::Throw
        )
    }

    /// Returns `true` if this instruction starts a new block boundary after
    /// itself (all branching forms do, since the fallthrough is a join).
    #[must_use]
    pub const fn is_branch(&self) -> bool {
        matches!(
            self,
            Self::Goto(_)
                | Self::If(..)
                | Self::IfZero(..)
                | Self::Switch { .. }
                | Self::Return
                | Self::ReturnVoid
                | Self::Throw
        )
    }

    /// Returns `true` if the instruction can transfer control to an
    /// exception handler.
    #[must_use]
    pub const fn can_throw(&self) -> bool {
        match self {
            Self::Binary(op) => op.can_throw(),
            Self::GetStatic(_)
            | Self::PutStatic(_)
            | Self::GetField(_)
            | Self::PutField(_)
            | Self::Invoke(..)
            | Self::New(_)
            | Self::NewArray(_)
            | Self::ArrayLoad
            | Self::ArrayStore
            | Self::ArrayLength
            | Self::CheckCast(_)
            | Self::MonitorEnter
            | Self::MonitorExit
            | Self::Throw => true,
            _ => false,
        }
    }
}

/// One entry of a method's exception-handler table.
///
/// Protects the instruction index range `[start, end)`; control transfers to
/// `handler` when a matching exception is raised inside the range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// First protected instruction index.
    pub start: u32,
    /// One past the last protected instruction index.
    pub end: u32,
    /// Handler entry instruction index.
    pub handler: u32,
    /// Caught exception type; `None` is a catch-all.
    pub catch_type: Option<Type>,
}

/// A stack-based method body.
#[derive(Debug, Clone, PartialEq)]
pub struct StackCode {
    /// Number of local-variable slots, including argument slots at the
    /// front (receiver first for instance methods).
    pub max_locals: u16,
    /// The instruction sequence.
    pub ops: Vec<StackOp>,
    /// Exception-handler table, outermost first.
    pub handlers: Vec<ExceptionHandler>,
}

impl StackCode {
    /// Creates a body with no exception handlers.
    #[must_use]
    pub fn new(max_locals: u16, ops: Vec<StackOp>) -> Self {
        Self {
            max_locals,
            ops,
            handlers: Vec::new(),
        }
    }

    /// Creates a body with an exception-handler table.
    #[must_use]
    pub fn with_handlers(
        max_locals: u16,
        ops: Vec<StackOp>,
        handlers: Vec<ExceptionHandler>,
    ) -> Self {
        Self {
            max_locals,
            ops,
            handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_targets() {
        assert_eq!(StackOp::Goto(7).branch_targets(), vec![7]);
        assert_eq!(StackOp::If(IfCond::Eq, 3).branch_targets(), vec![3]);
        let switch = StackOp::Switch {
            cases: vec![(0, 4), (1, 9)],
        };
        assert_eq!(switch.branch_targets(), vec![4, 9]);
        assert!(StackOp::Pop.branch_targets().is_empty());
    }

    #[test]
    fn test_block_ends() {
        assert!(StackOp::Return.ends_block());
        assert!(StackOp::Throw.ends_block());
        assert!(!StackOp::If(IfCond::Ne, 0).ends_block());
        assert!(StackOp::If(IfCond::Ne, 0).is_branch());
    }

    #[test]
    fn test_throwing_ops() {
        assert!(StackOp::Binary(BinaryOp::Div).can_throw());
        assert!(!StackOp::Binary(BinaryOp::Add).can_throw());
        assert!(StackOp::ArrayLoad.can_throw());
        assert!(!StackOp::PushInt(1).can_throw());
    }
}
