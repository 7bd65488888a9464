//! Basic blocks and phi nodes.

use crate::ir::{Instr, ValueId};

/// Handle to a basic block inside one method's IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// A phi node resolving multiple reaching definitions at a block entry.
///
/// One operand per reaching predecessor; operands are appended as
/// predecessors complete during construction, so a phi may be *incomplete*
/// until the builder finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// Defined value.
    pub dest: ValueId,
    /// `(predecessor, incoming value)` pairs.
    pub operands: Vec<(BlockId, ValueId)>,
}

impl Phi {
    /// The incoming value for a given predecessor, if recorded.
    #[must_use]
    pub fn operand_for(&self, pred: BlockId) -> Option<ValueId> {
        self.operands
            .iter()
            .find(|&&(p, _)| p == pred)
            .map(|&(_, v)| v)
    }

    /// Returns the single value all operands agree on (ignoring self
    /// references), if the phi is trivial.
    #[must_use]
    pub fn trivial_value(&self) -> Option<ValueId> {
        let mut unique = None;
        for &(_, v) in &self.operands {
            if v == self.dest {
                continue;
            }
            match unique {
                None => unique = Some(v),
                Some(u) if u == v => {}
                Some(_) => return None,
            }
        }
        unique
    }
}

/// One basic block: phis at entry, straight-line instructions, a terminator
/// last.
#[derive(Debug, Clone, Default)]
pub struct IrBlock {
    /// Phi nodes, conceptually executed in parallel at block entry.
    pub phis: Vec<Phi>,
    /// Instructions; the last one is the terminator once construction is
    /// complete.
    pub instrs: Vec<Instr>,
    /// Predecessor blocks, exceptional edges included.
    pub preds: Vec<BlockId>,
}

impl IrBlock {
    /// The block terminator.
    ///
    /// # Panics
    ///
    /// Panics if the block has no instructions; valid IR always terminates
    /// its blocks.
    #[must_use]
    pub fn terminator(&self) -> &Instr {
        self.instrs.last().expect("block must be terminated")
    }

    /// Successor blocks via the terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        self.instrs
            .last()
            .map(Instr::successors)
            .unwrap_or_default()
    }
}
