//! SSA to register-code lowering.
//!
//! Each SSA value gets its own register; no coalescing is performed, the
//! runtime's verifier does not care and container size is dominated by the
//! pool sections. Phis are eliminated by copies: an edge into a block with
//! phis is routed through a trampoline holding the moves, so critical edges
//! never execute another edge's copies. Phis at exception-handler entries
//! take their operands from the protected block's entry state, so their
//! copies are placed at the top of the protected block instead.
//!
//! All pool references pass through the graph lens here; lowering is the
//! single point where the accumulated renaming becomes ground truth.

use std::collections::HashMap;

use crate::{
    bytecode::InvokeKind,
    ir::{BlockId, Instr, IrCode, ValueId},
    model::Pools,
    optimize::GraphLens,
    Error, Result,
};

use super::{LoweredHandler, LoweredMethod, RegOp};

/// Register count ceiling of the code-item encoding; the count is
/// stored in sixteen bits, so a body may use at most this many.
pub const REGISTER_LIMIT: usize = u16::MAX as usize;

/// Lowers one SSA body to flat register code.
///
/// # Errors
///
/// [`Error::RegisterOverflow`] when the body needs more registers than the
/// encoding can address; [`Error::Internal`] on malformed IR (unterminated
/// blocks, phi operands missing a predecessor entry).
pub fn lower_method(body: &IrCode, pools: &Pools, lens: &GraphLens) -> Result<LoweredMethod> {
    Lowering::new(body, pools, lens)?.run()
}

struct Lowering<'a> {
    body: &'a IrCode,
    pools: &'a Pools,
    lens: &'a GraphLens,
    next_temp: usize,
}

impl<'a> Lowering<'a> {
    fn new(body: &'a IrCode, pools: &'a Pools, lens: &'a GraphLens) -> Result<Self> {
        if body.value_count() > REGISTER_LIMIT {
            return Err(Error::RegisterOverflow {
                method: pools.describe_method(body.method),
                required: body.value_count(),
                limit: REGISTER_LIMIT,
            });
        }
        Ok(Self {
            body,
            pools,
            lens,
            next_temp: body.value_count(),
        })
    }

    fn reg(&self, value: ValueId) -> u16 {
        #[allow(clippy::cast_possible_truncation)]
        {
            value.index() as u16
        }
    }

    fn temp(&mut self) -> Result<u16> {
        let reg = self.next_temp;
        self.next_temp += 1;
        if self.next_temp > REGISTER_LIMIT {
            return Err(Error::RegisterOverflow {
                method: self.pools.describe_method(self.body.method),
                required: self.next_temp,
                limit: REGISTER_LIMIT,
            });
        }
        #[allow(clippy::cast_possible_truncation)]
        Ok(reg as u16)
    }

    fn run(mut self) -> Result<LoweredMethod> {
        let layout = self.layout();

        // Targets are encoded as block ordinals first; trampolines get
        // ordinals past the real blocks and everything is patched to
        // instruction indices after concatenation.
        let mut block_ops: Vec<Vec<RegOp>> = Vec::with_capacity(layout.len());
        let mut ordinal_of: HashMap<BlockId, u32> = HashMap::new();
        for (ordinal, &block) in layout.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            ordinal_of.insert(block, ordinal as u32);
        }

        let mut trampolines: Vec<Vec<RegOp>> = Vec::new();
        for &block in &layout {
            let ops = self.emit_block(block, &ordinal_of, &mut trampolines, &layout)?;
            block_ops.push(ops);
        }
        self.insert_handler_copies(&mut block_ops, &ordinal_of)?;

        // Concatenate, recording where every ordinal starts.
        let mut starts: Vec<u32> = Vec::with_capacity(block_ops.len() + trampolines.len());
        let mut ends: Vec<u32> = Vec::with_capacity(block_ops.len());
        let mut ops: Vec<RegOp> = Vec::new();
        for block in &block_ops {
            #[allow(clippy::cast_possible_truncation)]
            starts.push(ops.len() as u32);
            ops.extend_from_slice(block);
            #[allow(clippy::cast_possible_truncation)]
            ends.push(ops.len() as u32);
        }
        for tramp in &trampolines {
            #[allow(clippy::cast_possible_truncation)]
            starts.push(ops.len() as u32);
            ops.extend_from_slice(tramp);
        }
        for op in &mut ops {
            op.retarget(&mut |target| *target = starts[*target as usize]);
        }

        let handlers = self.handler_table(&ordinal_of, &starts, &ends)?;

        #[allow(clippy::cast_possible_truncation)]
        Ok(LoweredMethod {
            // Both bounds checks keep next_temp within the limit, so
            // the cast cannot truncate.
            registers: self.next_temp as u16,
            ops,
            handlers,
        })
    }

    /// Emission order: reverse postorder over normal edges, then handler
    /// blocks (reachable only exceptionally) with their normal closure.
    fn layout(&self) -> Vec<BlockId> {
        let mut layout = self.body.reverse_postorder();
        let mut seen: Vec<bool> = vec![false; self.body.block_count()];
        for &block in &layout {
            seen[block.index()] = true;
        }
        let mut worklist: Vec<BlockId> = self
            .body
            .exc_edges
            .iter()
            .filter(|e| seen[e.from.index()])
            .map(|e| e.handler)
            .collect();
        while let Some(block) = worklist.pop() {
            if seen[block.index()] {
                continue;
            }
            seen[block.index()] = true;
            layout.push(block);
            for succ in self.body.block(block).successors() {
                worklist.push(succ);
            }
            for edge in &self.body.exc_edges {
                if edge.from == block {
                    worklist.push(edge.handler);
                }
            }
        }
        layout
    }

    /// Resolves the edge `from -> to`, routing through a trampoline when
    /// `to` has phis to fill for this predecessor.
    fn edge_target(
        &mut self,
        from: BlockId,
        to: BlockId,
        ordinal_of: &HashMap<BlockId, u32>,
        trampolines: &mut Vec<Vec<RegOp>>,
        layout_len: usize,
    ) -> Result<u32> {
        let direct = *ordinal_of
            .get(&to)
            .ok_or_else(|| internal_error!("branch into unreachable block {to}"))?;
        let phis = &self.body.block(to).phis;
        if phis.is_empty() {
            return Ok(direct);
        }

        let mut moves = self.phi_moves(from, to)?;
        moves.push(RegOp::Goto { target: direct });
        #[allow(clippy::cast_possible_truncation)]
        let ordinal = (layout_len + trampolines.len()) as u32;
        trampolines.push(moves);
        Ok(ordinal)
    }

    /// Parallel-copy sequence filling `to`'s phis for predecessor `from`.
    /// Multiple phis go through temporaries so one phi's destination can
    /// never clobber another's source.
    fn phi_moves(&mut self, from: BlockId, to: BlockId) -> Result<Vec<RegOp>> {
        let phis = &self.body.block(to).phis;
        let mut pairs: Vec<(u16, u16)> = Vec::with_capacity(phis.len());
        for phi in phis {
            let src = phi.operand_for(from).ok_or_else(|| {
                internal_error!(
                    "phi in {to} has no operand for predecessor {from} in {}",
                    self.pools.describe_method(self.body.method)
                )
            })?;
            let (dest, src) = (self.reg(phi.dest), self.reg(src));
            if dest != src {
                pairs.push((dest, src));
            }
        }

        let mut moves = Vec::new();
        if pairs.len() == 1 {
            let (dest, src) = pairs[0];
            moves.push(RegOp::Move { dest, src });
        } else if !pairs.is_empty() {
            let temps: Vec<u16> = pairs
                .iter()
                .map(|&(_, src)| {
                    let temp = self.temp()?;
                    moves.push(RegOp::Move { dest: temp, src });
                    Ok(temp)
                })
                .collect::<Result<_>>()?;
            for (&(dest, _), &temp) in pairs.iter().zip(&temps) {
                moves.push(RegOp::Move { dest, src: temp });
            }
        }
        Ok(moves)
    }

    fn emit_block(
        &mut self,
        block: BlockId,
        ordinal_of: &HashMap<BlockId, u32>,
        trampolines: &mut Vec<Vec<RegOp>>,
        layout: &[BlockId],
    ) -> Result<Vec<RegOp>> {
        let mut ops = Vec::new();
        let count = self.body.block(block).instrs.len();
        for position in 0..count {
            let instr = self.body.block(block).instrs[position].clone();
            self.emit_instr(block, &instr, ordinal_of, trampolines, layout.len(), &mut ops)?;
        }
        Ok(ops)
    }

    #[allow(clippy::too_many_lines)]
    fn emit_instr(
        &mut self,
        block: BlockId,
        instr: &Instr,
        ordinal_of: &HashMap<BlockId, u32>,
        trampolines: &mut Vec<Vec<RegOp>>,
        layout_len: usize,
        ops: &mut Vec<RegOp>,
    ) -> Result<()> {
        match instr {
            Instr::ConstInt { dest, value } => ops.push(RegOp::Const {
                dest: self.reg(*dest),
                value: *value,
            }),
            Instr::ConstString { dest, value } => ops.push(RegOp::ConstString {
                dest: self.reg(*dest),
                string: *value,
            }),
            Instr::ConstNull { dest } => ops.push(RegOp::ConstNull {
                dest: self.reg(*dest),
            }),
            Instr::Move { dest, src } => ops.push(RegOp::Move {
                dest: self.reg(*dest),
                src: self.reg(*src),
            }),
            Instr::Neg { dest, src } => ops.push(RegOp::Neg {
                dest: self.reg(*dest),
                src: self.reg(*src),
            }),
            Instr::Binary { dest, op, lhs, rhs } => ops.push(RegOp::Binary {
                op: *op,
                dest: self.reg(*dest),
                lhs: self.reg(*lhs),
                rhs: self.reg(*rhs),
            }),
            Instr::ArrayGet { dest, array, index } => ops.push(RegOp::ArrayGet {
                dest: self.reg(*dest),
                array: self.reg(*array),
                index: self.reg(*index),
            }),
            Instr::ArrayPut {
                array,
                index,
                value,
            } => ops.push(RegOp::ArrayPut {
                array: self.reg(*array),
                index: self.reg(*index),
                value: self.reg(*value),
            }),
            Instr::ArrayLength { dest, array } => ops.push(RegOp::ArrayLength {
                dest: self.reg(*dest),
                array: self.reg(*array),
            }),
            Instr::NewInstance { dest, ty } => ops.push(RegOp::NewInstance {
                dest: self.reg(*dest),
                ty: self.lens.lookup_type(*ty),
            }),
            Instr::NewArray { dest, ty, length } => ops.push(RegOp::NewArray {
                dest: self.reg(*dest),
                ty: self.lens.lookup_type(*ty),
                length: self.reg(*length),
            }),
            Instr::CheckCast { dest, src, ty } => ops.push(RegOp::CheckCast {
                dest: self.reg(*dest),
                src: self.reg(*src),
                ty: self.lens.lookup_type(*ty),
            }),
            Instr::InstanceOf { dest, src, ty } => ops.push(RegOp::InstanceOf {
                dest: self.reg(*dest),
                src: self.reg(*src),
                ty: self.lens.lookup_type(*ty),
            }),
            Instr::StaticGet { dest, field } => ops.push(RegOp::StaticGet {
                dest: self.reg(*dest),
                field: self.lens.lookup_field(*field, self.pools),
            }),
            Instr::StaticPut { field, value } => ops.push(RegOp::StaticPut {
                field: self.lens.lookup_field(*field, self.pools),
                value: self.reg(*value),
            }),
            Instr::InstanceGet {
                dest,
                field,
                object,
            } => ops.push(RegOp::InstanceGet {
                dest: self.reg(*dest),
                field: self.lens.lookup_field(*field, self.pools),
                object: self.reg(*object),
            }),
            Instr::InstancePut {
                field,
                object,
                value,
            } => ops.push(RegOp::InstancePut {
                field: self.lens.lookup_field(*field, self.pools),
                object: self.reg(*object),
                value: self.reg(*value),
            }),
            Instr::Invoke {
                dest,
                kind,
                method,
                args,
            } => {
                let lookup = self.lens.lookup_method(*method, self.pools);
                let mut regs: Vec<u16> = args.iter().map(|&a| self.reg(a)).collect();
                // Removed-argument positions index the declared parameter
                // list; instance kinds carry the receiver in front.
                let receiver = usize::from(*kind != InvokeKind::Static);
                for &position in lookup.prototype.removed_args.iter().rev() {
                    let at = position + receiver;
                    if at < regs.len() {
                        regs.remove(at);
                    }
                }
                ops.push(RegOp::Invoke {
                    kind: *kind,
                    method: lookup.target,
                    args: regs,
                });
                if let Some(dest) = dest {
                    ops.push(RegOp::MoveResult {
                        dest: self.reg(*dest),
                    });
                }
            }
            Instr::MonitorEnter { object } => ops.push(RegOp::MonitorEnter {
                object: self.reg(*object),
            }),
            Instr::MonitorExit { object } => ops.push(RegOp::MonitorExit {
                object: self.reg(*object),
            }),
            Instr::CaughtException { dest } => ops.push(RegOp::MoveException {
                dest: self.reg(*dest),
            }),
            Instr::Throw { exception } => ops.push(RegOp::Throw {
                exception: self.reg(*exception),
            }),
            Instr::Goto { target } => {
                let target = self.edge_target(block, *target, ordinal_of, trampolines, layout_len)?;
                ops.push(RegOp::Goto { target });
            }
            Instr::If {
                cond,
                lhs,
                rhs,
                then_target,
                else_target,
            } => {
                let then_at =
                    self.edge_target(block, *then_target, ordinal_of, trampolines, layout_len)?;
                let else_at =
                    self.edge_target(block, *else_target, ordinal_of, trampolines, layout_len)?;
                ops.push(RegOp::If {
                    cond: *cond,
                    lhs: self.reg(*lhs),
                    rhs: rhs.map(|r| self.reg(r)),
                    target: then_at,
                });
                ops.push(RegOp::Goto { target: else_at });
            }
            Instr::Switch {
                value,
                cases,
                fallthrough,
            } => {
                let mut lowered_cases = Vec::with_capacity(cases.len());
                for &(key, target) in cases {
                    let at =
                        self.edge_target(block, target, ordinal_of, trampolines, layout_len)?;
                    lowered_cases.push((key, at));
                }
                let default =
                    self.edge_target(block, *fallthrough, ordinal_of, trampolines, layout_len)?;
                ops.push(RegOp::Switch {
                    value: self.reg(*value),
                    cases: lowered_cases,
                });
                ops.push(RegOp::Goto { target: default });
            }
            Instr::Return { value } => match value {
                Some(value) => ops.push(RegOp::Return {
                    src: self.reg(*value),
                }),
                None => ops.push(RegOp::ReturnVoid),
            },
        }
        Ok(())
    }

    /// Handler-entry phis take the protected block's entry state; their
    /// copies run before anything in the protected block can throw.
    fn insert_handler_copies(
        &mut self,
        block_ops: &mut [Vec<RegOp>],
        ordinal_of: &HashMap<BlockId, u32>,
    ) -> Result<()> {
        for edge in &self.body.exc_edges {
            let Some(&ordinal) = ordinal_of.get(&edge.from) else {
                continue;
            };
            if self.body.block(edge.handler).phis.is_empty() {
                continue;
            }
            let moves = self.phi_moves(edge.from, edge.handler)?;
            let ops = &mut block_ops[ordinal as usize];
            // A protected block that is itself a handler starts with
            // move-exception, which must stay first.
            let at = usize::from(matches!(ops.first(), Some(RegOp::MoveException { .. })));
            ops.splice(at..at, moves);
        }
        Ok(())
    }

    fn handler_table(
        &self,
        ordinal_of: &HashMap<BlockId, u32>,
        starts: &[u32],
        ends: &[u32],
    ) -> Result<Vec<LoweredHandler>> {
        let mut handlers = Vec::with_capacity(self.body.exc_edges.len());
        for edge in &self.body.exc_edges {
            let (Some(&from), Some(&handler)) =
                (ordinal_of.get(&edge.from), ordinal_of.get(&edge.handler))
            else {
                // Edges out of pruned blocks carry no runtime behavior.
                continue;
            };
            let start = starts[from as usize];
            let end = ends[from as usize];
            if start == end {
                continue;
            }
            handlers.push(LoweredHandler {
                start,
                end,
                handler: starts[handler as usize],
                catch_type: edge.catch_type.map(|ty| self.lens.lookup_type(ty)),
            });
        }
        Ok(handlers)
    }
}
