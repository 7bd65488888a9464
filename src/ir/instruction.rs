//! Register-based SSA instructions with explicit def/use information.
//!
//! Unlike the stack-based input form, where operands are implicit on the
//! evaluation stack, every instruction here names its operands (uses) and
//! its result (def) as SSA values. Control transfer is explicit: each basic
//! block ends in exactly one terminator naming successor blocks.

use crate::{
    bytecode::{BinaryOp, IfCond, InvokeKind},
    ir::{BlockId, ValueId},
    model::{FieldRef, MethodRef, StringId, Type},
};

/// One SSA instruction in `result = op(operands)` form.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// `dest = constant int`
    ConstInt {
        /// Defined value.
        dest: ValueId,
        /// The constant.
        value: i32,
    },
    /// `dest = interned string`
    ConstString {
        /// Defined value.
        dest: ValueId,
        /// The interned string constant.
        value: StringId,
    },
    /// `dest = null`
    ConstNull {
        /// Defined value.
        dest: ValueId,
    },
    /// `dest = src` (introduced by rewrites; removed by copy cleanup)
    Move {
        /// Defined value.
        dest: ValueId,
        /// Source value.
        src: ValueId,
    },
    /// `dest = -src`
    Neg {
        /// Defined value.
        dest: ValueId,
        /// Operand.
        src: ValueId,
    },
    /// `dest = lhs op rhs`
    Binary {
        /// Defined value.
        dest: ValueId,
        /// The operation.
        op: BinaryOp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// `dest = array[index]`
    ArrayGet {
        /// Defined value.
        dest: ValueId,
        /// Array reference.
        array: ValueId,
        /// Element index.
        index: ValueId,
    },
    /// `array[index] = value`
    ArrayPut {
        /// Array reference.
        array: ValueId,
        /// Element index.
        index: ValueId,
        /// Stored value.
        value: ValueId,
    },
    /// `dest = array.length`
    ArrayLength {
        /// Defined value.
        dest: ValueId,
        /// Array reference.
        array: ValueId,
    },
    /// `dest = new ty`
    NewInstance {
        /// Defined value.
        dest: ValueId,
        /// Instantiated class.
        ty: Type,
    },
    /// `dest = new ty[length]`
    NewArray {
        /// Defined value.
        dest: ValueId,
        /// Array type.
        ty: Type,
        /// Element count.
        length: ValueId,
    },
    /// `dest = (ty) src`, throwing on mismatch
    CheckCast {
        /// Defined value.
        dest: ValueId,
        /// Checked reference.
        src: ValueId,
        /// Asserted type.
        ty: Type,
    },
    /// `dest = src instanceof ty`
    InstanceOf {
        /// Defined value.
        dest: ValueId,
        /// Tested reference.
        src: ValueId,
        /// Tested type.
        ty: Type,
    },
    /// `dest = holder.field` (static)
    StaticGet {
        /// Defined value.
        dest: ValueId,
        /// Read field.
        field: FieldRef,
    },
    /// `holder.field = value` (static)
    StaticPut {
        /// Written field.
        field: FieldRef,
        /// Stored value.
        value: ValueId,
    },
    /// `dest = object.field`
    InstanceGet {
        /// Defined value.
        dest: ValueId,
        /// Read field.
        field: FieldRef,
        /// Receiver.
        object: ValueId,
    },
    /// `object.field = value`
    InstancePut {
        /// Written field.
        field: FieldRef,
        /// Receiver.
        object: ValueId,
        /// Stored value.
        value: ValueId,
    },
    /// `dest? = invoke kind method(args)`
    Invoke {
        /// Defined value, absent for `V` prototypes.
        dest: Option<ValueId>,
        /// Dispatch kind.
        kind: InvokeKind,
        /// Called method reference.
        method: MethodRef,
        /// Arguments, receiver first for instance kinds.
        args: Vec<ValueId>,
    },
    /// Enter the monitor of `object`.
    MonitorEnter {
        /// Locked reference.
        object: ValueId,
    },
    /// Exit the monitor of `object`.
    MonitorExit {
        /// Unlocked reference.
        object: ValueId,
    },
    /// `dest = caught exception`; only valid as the first instruction of an
    /// exception-handler entry block.
    CaughtException {
        /// Defined value.
        dest: ValueId,
    },
    /// Raise `exception`. Terminator.
    Throw {
        /// Thrown reference.
        exception: ValueId,
    },
    /// Unconditional transfer. Terminator.
    Goto {
        /// Successor block.
        target: BlockId,
    },
    /// Conditional transfer. Terminator. `rhs` of `None` compares against
    /// zero/null.
    If {
        /// Comparison condition.
        cond: IfCond,
        /// Left operand.
        lhs: ValueId,
        /// Right operand, or zero/null when absent.
        rhs: Option<ValueId>,
        /// Successor when the condition holds.
        then_target: BlockId,
        /// Successor when it does not.
        else_target: BlockId,
    },
    /// Multi-way transfer on an int key. Terminator.
    Switch {
        /// Scrutinee.
        value: ValueId,
        /// `(key, successor)` pairs.
        cases: Vec<(i32, BlockId)>,
        /// Successor when no key matches.
        fallthrough: BlockId,
    },
    /// Return from the method. Terminator.
    Return {
        /// Returned value, absent for `V` prototypes.
        value: Option<ValueId>,
    },
}

impl Instr {
    /// The value this instruction defines, if any.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Self::ConstInt { dest, .. }
            | Self::ConstString { dest, .. }
            | Self::ConstNull { dest }
            | Self::Move { dest, .. }
            | Self::Neg { dest, .. }
            | Self::Binary { dest, .. }
            | Self::ArrayGet { dest, .. }
            | Self::ArrayLength { dest, .. }
            | Self::NewInstance { dest, .. }
            | Self::NewArray { dest, .. }
            | Self::CheckCast { dest, .. }
            | Self::InstanceOf { dest, .. }
            | Self::StaticGet { dest, .. }
            | Self::InstanceGet { dest, .. }
            | Self::CaughtException { dest } => Some(*dest),
            Self::Invoke { dest, .. } => *dest,
            _ => None,
        }
    }

    /// The values this instruction reads.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            Self::Move { src, .. } | Self::Neg { src, .. } => vec![*src],
            Self::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::ArrayGet { array, index, .. } => vec![*array, *index],
            Self::ArrayPut {
                array,
                index,
                value,
            } => vec![*array, *index, *value],
            Self::ArrayLength { array, .. } => vec![*array],
            Self::NewArray { length, .. } => vec![*length],
            Self::CheckCast { src, .. } | Self::InstanceOf { src, .. } => vec![*src],
            Self::StaticPut { value, .. } => vec![*value],
            Self::InstanceGet { object, .. } => vec![*object],
            Self::InstancePut { object, value, .. } => vec![*object, *value],
            Self::Invoke { args, .. } => args.clone(),
            Self::MonitorEnter { object } | Self::MonitorExit { object } => vec![*object],
            Self::Throw { exception } => vec![*exception],
            Self::If { lhs, rhs, .. } => match rhs {
                Some(rhs) => vec![*lhs, *rhs],
                None => vec![*lhs],
            },
            Self::Switch { value, .. } => vec![*value],
            Self::Return { value } => value.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Applies `f` to every value operand in place, defs included.
    pub fn visit_values_mut(&mut self, f: &mut impl FnMut(&mut ValueId)) {
        match self {
            Self::ConstInt { dest, .. }
            | Self::ConstString { dest, .. }
            | Self::ConstNull { dest }
            | Self::CaughtException { dest }
            | Self::NewInstance { dest, .. }
            | Self::StaticGet { dest, .. } => f(dest),
            Self::Move { dest, src } | Self::Neg { dest, src } => {
                f(dest);
                f(src);
            }
            Self::Binary { dest, lhs, rhs, .. } => {
                f(dest);
                f(lhs);
                f(rhs);
            }
            Self::ArrayGet {
                dest, array, index, ..
            } => {
                f(dest);
                f(array);
                f(index);
            }
            Self::ArrayPut {
                array,
                index,
                value,
            } => {
                f(array);
                f(index);
                f(value);
            }
            Self::ArrayLength { dest, array } => {
                f(dest);
                f(array);
            }
            Self::NewArray { dest, length, .. } => {
                f(dest);
                f(length);
            }
            Self::CheckCast { dest, src, .. } | Self::InstanceOf { dest, src, .. } => {
                f(dest);
                f(src);
            }
            Self::StaticPut { value, .. } => f(value),
            Self::InstanceGet { dest, object, .. } => {
                f(dest);
                f(object);
            }
            Self::InstancePut { object, value, .. } => {
                f(object);
                f(value);
            }
            Self::Invoke { dest, args, .. } => {
                if let Some(dest) = dest {
                    f(dest);
                }
                for arg in args {
                    f(arg);
                }
            }
            Self::MonitorEnter { object } | Self::MonitorExit { object } => f(object),
            Self::Throw { exception } => f(exception),
            Self::If { lhs, rhs, .. } => {
                f(lhs);
                if let Some(rhs) = rhs {
                    f(rhs);
                }
            }
            Self::Switch { value, .. } => f(value),
            Self::Return { value } => {
                if let Some(value) = value {
                    f(value);
                }
            }
            Self::Goto { .. } => {}
        }
    }

    /// Returns `true` for block terminators.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Throw { .. }
                | Self::Goto { .. }
                | Self::If { .. }
                | Self::Switch { .. }
                | Self::Return { .. }
        )
    }

    /// Successor blocks of a terminator; empty for non-terminators and for
    /// method exits.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Goto { target } => vec![*target],
            Self::If {
                then_target,
                else_target,
                ..
            } => vec![*then_target, *else_target],
            Self::Switch {
                cases, fallthrough, ..
            } => {
                let mut out: Vec<BlockId> = cases.iter().map(|&(_, b)| b).collect();
                out.push(*fallthrough);
                out
            }
            _ => Vec::new(),
        }
    }

    /// Applies `f` to every successor block id in place.
    pub fn retarget(&mut self, f: &mut impl FnMut(&mut BlockId)) {
        match self {
            Self::Goto { target } => f(target),
            Self::If {
                then_target,
                else_target,
                ..
            } => {
                f(then_target);
                f(else_target);
            }
            Self::Switch {
                cases, fallthrough, ..
            } => {
                for (_, target) in cases {
                    f(target);
                }
                f(fallthrough);
            }
            _ => {}
        }
    }

    /// Returns `true` if removing this instruction could change observable
    /// behavior even when its result is unused.
    #[must_use]
    pub fn has_side_effects(&self) -> bool {
        match self {
            Self::ConstInt { .. }
            | Self::ConstString { .. }
            | Self::ConstNull { .. }
            | Self::Move { .. }
            | Self::Neg { .. }
            | Self::InstanceOf { .. } => false,
            Self::Binary { op, .. } => op.can_throw(),
            // Everything else can throw, allocate, store, initialize a
            // class, or transfer control. A pass that proves a particular
            // throwing load redundant removes it itself.
            _ => true,
        }
    }
}
