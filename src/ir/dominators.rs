//! Dominator tree computation.
//!
//! Iterative dataflow over reverse postorder (Cooper/Harvey/Kennedy).
//! Used by the SSA verifier and by passes that need dominance queries.

use std::collections::HashMap;

use crate::ir::{BlockId, IrCode};

/// Immediate-dominator table for one method body.
#[derive(Debug)]
pub struct Dominators {
    /// `idom[b]` for every reachable block; the entry maps to itself.
    idom: HashMap<BlockId, BlockId>,
    /// Reverse-postorder rank, for intersection walks.
    rank: HashMap<BlockId, usize>,
}

impl Dominators {
    /// Computes the dominator tree of `code`'s reachable blocks.
    #[must_use]
    pub fn compute(code: &IrCode) -> Self {
        let rpo = code.reverse_postorder();
        let rank: HashMap<BlockId, usize> = rpo.iter().copied().zip(0..).collect();
        let entry = code.entry();

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);

        let intersect = |idom: &HashMap<BlockId, BlockId>, mut a: BlockId, mut b: BlockId| {
            while a != b {
                while rank[&a] > rank[&b] {
                    a = idom[&a];
                }
                while rank[&b] > rank[&a] {
                    b = idom[&b];
                }
            }
            a
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &code.block(block).preds {
                    if !idom.contains_key(&pred) {
                        continue; // pred not yet processed or unreachable
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, current, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { idom, rank }
    }

    /// Returns `true` if `a` dominates `b` (reflexively).
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            let Some(&parent) = self.idom.get(&current) else {
                return false;
            };
            if parent == current {
                return false; // reached the entry
            }
            current = parent;
        }
    }

    /// The immediate dominator of a reachable non-entry block.
    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied()
    }

    /// Returns `true` if the block was reachable when the tree was built.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rank.contains_key(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::IfCond,
        ir::Instr,
        model::Pools,
    };

    #[test]
    fn test_diamond_dominance() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/T;").unwrap();
        let method = pools.method(holder, "f", wk.void, &[]);

        let mut code = crate::ir::IrCode::new(method);
        let b0 = code.add_block();
        let b1 = code.add_block();
        let b2 = code.add_block();
        let b3 = code.add_block();

        let c = code.new_value(wk.int);
        code.block_mut(b0)
            .instrs
            .push(Instr::ConstInt { dest: c, value: 0 });
        code.block_mut(b0).instrs.push(Instr::If {
            cond: IfCond::Eq,
            lhs: c,
            rhs: None,
            then_target: b1,
            else_target: b2,
        });
        code.block_mut(b1).instrs.push(Instr::Goto { target: b3 });
        code.block_mut(b2).instrs.push(Instr::Goto { target: b3 });
        code.block_mut(b3).instrs.push(Instr::Return { value: None });
        code.recompute_preds(&[]);

        let dom = Dominators::compute(&code);
        assert!(dom.dominates(b0, b3));
        assert!(dom.dominates(b0, b1));
        assert!(!dom.dominates(b1, b3));
        assert!(!dom.dominates(b2, b3));
        assert_eq!(dom.idom(b3), Some(b0));
    }
}
