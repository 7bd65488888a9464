//! The register-based output instruction set.
//!
//! Lowered method bodies are flat sequences of these instructions. Operands
//! are numbered registers; branch targets are absolute instruction indices
//! into the owning body. Pool references stay symbolic (interned handles)
//! until serialization, where the writer substitutes container-local
//! indices and picks the jumbo string form when an index outgrows the
//! 16-bit encoding.

use strum::{Display, IntoStaticStr};

use crate::{
    bytecode::{BinaryOp, IfCond, InvokeKind},
    model::{FieldRef, MethodRef, StringId, Type},
};

/// One register instruction.
#[derive(Debug, Clone, PartialEq, Display, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RegOp {
    /// Load a 32-bit integer constant.
    Const {
        /// Destination register.
        dest: u16,
        /// The constant.
        value: i32,
    },
    /// Load an interned string constant.
    ConstString {
        /// Destination register.
        dest: u16,
        /// The string.
        string: StringId,
    },
    /// Load the null reference.
    ConstNull {
        /// Destination register.
        dest: u16,
    },
    /// Register copy.
    Move {
        /// Destination register.
        dest: u16,
        /// Source register.
        src: u16,
    },
    /// Integer negation.
    Neg {
        /// Destination register.
        dest: u16,
        /// Operand register.
        src: u16,
    },
    /// Integer binary operation.
    Binary {
        /// The operation.
        op: BinaryOp,
        /// Destination register.
        dest: u16,
        /// Left operand register.
        lhs: u16,
        /// Right operand register.
        rhs: u16,
    },
    /// Array element load.
    ArrayGet {
        /// Destination register.
        dest: u16,
        /// Array register.
        array: u16,
        /// Index register.
        index: u16,
    },
    /// Array element store.
    ArrayPut {
        /// Array register.
        array: u16,
        /// Index register.
        index: u16,
        /// Value register.
        value: u16,
    },
    /// Array length query.
    ArrayLength {
        /// Destination register.
        dest: u16,
        /// Array register.
        array: u16,
    },
    /// Allocate an instance.
    NewInstance {
        /// Destination register.
        dest: u16,
        /// Instantiated class.
        ty: Type,
    },
    /// Allocate an array.
    NewArray {
        /// Destination register.
        dest: u16,
        /// Array type.
        ty: Type,
        /// Length register.
        length: u16,
    },
    /// Checked reference cast.
    CheckCast {
        /// Destination register.
        dest: u16,
        /// Source register.
        src: u16,
        /// Asserted type.
        ty: Type,
    },
    /// Membership test.
    InstanceOf {
        /// Destination register.
        dest: u16,
        /// Source register.
        src: u16,
        /// Tested type.
        ty: Type,
    },
    /// Static field load.
    StaticGet {
        /// Destination register.
        dest: u16,
        /// Read field.
        field: FieldRef,
    },
    /// Static field store.
    StaticPut {
        /// Written field.
        field: FieldRef,
        /// Value register.
        value: u16,
    },
    /// Instance field load.
    InstanceGet {
        /// Destination register.
        dest: u16,
        /// Read field.
        field: FieldRef,
        /// Receiver register.
        object: u16,
    },
    /// Instance field store.
    InstancePut {
        /// Written field.
        field: FieldRef,
        /// Receiver register.
        object: u16,
        /// Value register.
        value: u16,
    },
    /// Method call. A following [`RegOp::MoveResult`] captures the return
    /// value when the prototype is non-void.
    Invoke {
        /// Dispatch kind.
        kind: InvokeKind,
        /// Called method.
        method: MethodRef,
        /// Argument registers, receiver first for instance kinds.
        args: Vec<u16>,
    },
    /// Capture the result of the preceding call.
    MoveResult {
        /// Destination register.
        dest: u16,
    },
    /// Capture the in-flight exception at a handler entry.
    MoveException {
        /// Destination register.
        dest: u16,
    },
    /// Monitor entry.
    MonitorEnter {
        /// Locked reference register.
        object: u16,
    },
    /// Monitor exit.
    MonitorExit {
        /// Unlocked reference register.
        object: u16,
    },
    /// Raise an exception.
    Throw {
        /// Thrown reference register.
        exception: u16,
    },
    /// Unconditional branch.
    Goto {
        /// Absolute target instruction index.
        target: u32,
    },
    /// Conditional branch; falls through when the condition fails.
    If {
        /// Comparison condition.
        cond: IfCond,
        /// Left operand register.
        lhs: u16,
        /// Right operand register; compares against zero/null when absent.
        rhs: Option<u16>,
        /// Absolute target instruction index.
        target: u32,
    },
    /// Multi-way branch; falls through when no key matches.
    Switch {
        /// Scrutinee register.
        value: u16,
        /// `(key, absolute target)` pairs, keys strictly ascending.
        cases: Vec<(i32, u32)>,
    },
    /// Return a value.
    Return {
        /// Returned register.
        src: u16,
    },
    /// Return from a `V` method.
    ReturnVoid,
}

impl RegOp {
    /// The mnemonic of this instruction, without operands.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }

    /// Applies `f` to every branch target in place.
    pub fn retarget(&mut self, f: &mut impl FnMut(&mut u32)) {
        match self {
            Self::Goto { target } | Self::If { target, .. } => f(target),
            Self::Switch { cases, .. } => {
                for (_, target) in cases {
                    f(target);
                }
            }
            _ => {}
        }
    }
}

/// One handler range of a lowered body, in instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweredHandler {
    /// First protected instruction index.
    pub start: u32,
    /// One past the last protected instruction index.
    pub end: u32,
    /// Handler entry instruction index.
    pub handler: u32,
    /// Caught type; `None` is a catch-all.
    pub catch_type: Option<Type>,
}

/// A method body after lowering: flat register code plus its handler table.
#[derive(Debug, Clone, PartialEq)]
pub struct LoweredMethod {
    /// Number of registers the body uses.
    pub registers: u16,
    /// The instruction sequence.
    pub ops: Vec<RegOp>,
    /// Exception-handler table.
    pub handlers: Vec<LoweredHandler>,
}

impl LoweredMethod {
    /// Renders the body as one mnemonic per line, for debug dumps and tests.
    #[must_use]
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (i, op) in self.ops.iter().enumerate() {
            out.push_str(&format!("{i:4}: {op}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mnemonics() {
        assert_eq!(RegOp::ReturnVoid.mnemonic(), "return-void");
        assert_eq!(
            RegOp::MoveException { dest: 0 }.mnemonic(),
            "move-exception"
        );
        assert_eq!(RegOp::Goto { target: 3 }.to_string(), "goto");
    }

    #[test]
    fn test_retarget_visits_all_branches() {
        let mut op = RegOp::Switch {
            value: 0,
            cases: vec![(0, 4), (1, 9)],
        };
        op.retarget(&mut |t| *t += 10);
        assert_eq!(
            op,
            RegOp::Switch {
                value: 0,
                cases: vec![(0, 14), (1, 19)],
            }
        );
        let mut goto = RegOp::Goto { target: 1 };
        goto.retarget(&mut |t| *t = 0);
        assert_eq!(goto, RegOp::Goto { target: 0 });
    }
}
