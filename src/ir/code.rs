//! The per-method IR container.
//!
//! An [`IrCode`] owns a method's control-flow graph, its SSA value arena and
//! its argument values. It is the working representation of a method body:
//! built once from the stack-based input form, rewritten by optimization
//! passes, and finally lowered to register code by the encoder.

use std::collections::HashMap;

use crate::{
    ir::{BlockId, Instr, IrBlock, Phi, ValueId, ValueInfo},
    model::{MethodRef, Type},
};

/// An exceptional control-flow edge: an exception raised anywhere in `from`
/// transfers control to `handler`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcEdge {
    /// Protected block.
    pub from: BlockId,
    /// Handler entry block.
    pub handler: BlockId,
    /// Caught type; `None` is a catch-all.
    pub catch_type: Option<Type>,
}

/// A method body in SSA form.
#[derive(Debug, Clone)]
pub struct IrCode {
    /// The method this body belongs to.
    pub method: MethodRef,
    blocks: Vec<IrBlock>,
    values: Vec<ValueInfo>,
    /// Argument values in declaration order, receiver first for instance
    /// methods. Defined at method entry.
    args: Vec<ValueId>,
    /// Exceptional edges; parallel to the normal successor graph.
    pub exc_edges: Vec<ExcEdge>,
}

impl IrCode {
    /// Creates an empty body for `method`.
    #[must_use]
    pub fn new(method: MethodRef) -> Self {
        Self {
            method,
            blocks: Vec::new(),
            values: Vec::new(),
            args: Vec::new(),
            exc_edges: Vec::new(),
        }
    }

    /// Recomputes predecessors from terminators and the stored exceptional
    /// edges.
    pub fn recompute_all_preds(&mut self) {
        let exceptional: Vec<(BlockId, BlockId)> = self
            .exc_edges
            .iter()
            .map(|e| (e.from, e.handler))
            .collect();
        self.recompute_preds(&exceptional);
    }

    /// Allocates a fresh SSA value of type `ty`.
    pub fn new_value(&mut self, ty: Type) -> ValueId {
        #[allow(clippy::cast_possible_truncation)]
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueInfo { ty });
        id
    }

    /// Allocates a fresh argument value of type `ty`.
    pub fn new_argument(&mut self, ty: Type) -> ValueId {
        let id = self.new_value(ty);
        self.args.push(id);
        id
    }

    /// Appends an empty block, returning its id.
    pub fn add_block(&mut self) -> BlockId {
        #[allow(clippy::cast_possible_truncation)]
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(IrBlock::default());
        id
    }

    /// The entry block. Always block 0.
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Argument values in declaration order.
    #[must_use]
    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub(crate) fn args_mut(&mut self) -> &mut Vec<ValueId> {
        &mut self.args
    }

    pub(crate) fn values_mut(&mut self) -> &mut Vec<ValueInfo> {
        &mut self.values
    }

    /// The declared type of a value.
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> Type {
        self.values[value.index()].ty
    }

    /// Overwrites the declared type of a value.
    pub fn set_value_type(&mut self, value: ValueId, ty: Type) {
        self.values[value.index()].ty = ty;
    }

    /// Number of allocated values, arguments included.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// All value handles, in allocation order. Owned, so the body can
    /// be mutated while iterating.
    #[must_use]
    pub fn value_ids(&self) -> Vec<ValueId> {
        #[allow(clippy::cast_possible_truncation)]
        (0..self.values.len() as u32).map(ValueId).collect()
    }

    /// Immutable block access.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &IrBlock {
        &self.blocks[id.index()]
    }

    /// Mutable block access.
    pub fn block_mut(&mut self, id: BlockId) -> &mut IrBlock {
        &mut self.blocks[id.index()]
    }

    /// All blocks in id order.
    #[must_use]
    pub fn blocks(&self) -> &[IrBlock] {
        &self.blocks
    }

    /// All blocks, mutable.
    pub fn blocks_mut(&mut self) -> &mut Vec<IrBlock> {
        &mut self.blocks
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Block ids in id order.
    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        #[allow(clippy::cast_possible_truncation)]
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Total instruction count across blocks (phis excluded). Used as the
    /// inlining size budget.
    #[must_use]
    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }

    /// Iterates over `(block, instruction)` pairs in block order.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &Instr)> {
        self.blocks.iter().enumerate().flat_map(|(i, block)| {
            #[allow(clippy::cast_possible_truncation)]
            let id = BlockId(i as u32);
            block.instrs.iter().map(move |instr| (id, instr))
        })
    }

    /// Reverse postorder over reachable blocks, entry first.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut state = vec![0u8; self.blocks.len()]; // 0 unseen, 1 open, 2 done
        let mut postorder = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(self.entry(), 0usize)];
        state[self.entry().index()] = 1;

        while let Some(&mut (block, next)) = stack.last_mut() {
            let succs = self.blocks[block.index()].successors();
            if next < succs.len() {
                stack.last_mut().expect("non-empty").1 += 1;
                let succ = succs[next];
                if state[succ.index()] == 0 {
                    state[succ.index()] = 1;
                    stack.push((succ, 0));
                }
            } else {
                state[block.index()] = 2;
                postorder.push(block);
                stack.pop();
            }
        }

        postorder.reverse();
        postorder
    }

    /// Recomputes every block's predecessor list from the terminators, plus
    /// the given extra (exceptional) edges.
    pub fn recompute_preds(&mut self, exceptional_edges: &[(BlockId, BlockId)]) {
        for block in &mut self.blocks {
            block.preds.clear();
        }
        let mut edges: Vec<(BlockId, BlockId)> = Vec::new();
        for (i, block) in self.blocks.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let from = BlockId(i as u32);
            for to in block.successors() {
                edges.push((from, to));
            }
        }
        edges.extend_from_slice(exceptional_edges);
        for (from, to) in edges {
            let preds = &mut self.blocks[to.index()].preds;
            if !preds.contains(&from) {
                preds.push(from);
            }
        }
    }

    /// Replaces every use of `from` with `to` across the whole body,
    /// phis included. Definitions are left alone.
    pub fn replace_uses(&mut self, from: ValueId, to: ValueId) {
        for block in &mut self.blocks {
            for phi in &mut block.phis {
                for (_, operand) in &mut phi.operands {
                    if *operand == from {
                        *operand = to;
                    }
                }
            }
            for instr in &mut block.instrs {
                let dest = instr.dest();
                instr.visit_values_mut(&mut |v| {
                    if *v == from && Some(*v) != dest {
                        *v = to;
                    }
                });
            }
        }
    }

    /// Counts uses of every value (phi operands included).
    #[must_use]
    pub fn use_counts(&self) -> HashMap<ValueId, usize> {
        let mut counts: HashMap<ValueId, usize> = HashMap::new();
        for block in &self.blocks {
            for phi in &block.phis {
                for &(_, operand) in &phi.operands {
                    *counts.entry(operand).or_default() += 1;
                }
            }
            for instr in &block.instrs {
                for used in instr.uses() {
                    *counts.entry(used).or_default() += 1;
                }
            }
        }
        counts
    }

    /// Removes phis whose operands all agree, substituting the agreed value.
    /// Repeats until stable, since removing one phi can make another
    /// trivial. Returns the number of phis removed.
    pub fn remove_trivial_phis(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let mut substitution: Option<(ValueId, ValueId)> = None;
            'outer: for block in &self.blocks {
                for phi in &block.phis {
                    if let Some(value) = phi.trivial_value() {
                        substitution = Some((phi.dest, value));
                        break 'outer;
                    }
                }
            }
            let Some((dest, value)) = substitution else {
                return removed;
            };
            for block in &mut self.blocks {
                block.phis.retain(|phi| phi.dest != dest);
            }
            self.replace_uses(dest, value);
            removed += 1;
        }
    }

    /// Adds a phi to a block and returns it for operand filling.
    pub fn add_phi(&mut self, block: BlockId, dest: ValueId) {
        self.blocks[block.index()].phis.push(Phi {
            dest,
            operands: Vec::new(),
        });
    }
}
