//! Stack-based bytecode to SSA construction.
//!
//! The builder converts one method's [`StackCode`] into an [`IrCode`] in
//! three steps:
//!
//! 1. **Block discovery**: basic block boundaries are computed from branch
//!    targets, fallthrough points after branches, and exception-handler
//!    boundaries.
//! 2. **Abstract interpretation**: blocks are simulated over a worklist,
//!    tracking the operand stack and local-variable slots as SSA values.
//!    A block entered from several predecessors receives phi nodes for each
//!    stack slot and live local; phis are resolved eagerly when only one
//!    predecessor is known and back-patched as the remaining predecessors
//!    complete (the incomplete-phi discipline).
//! 3. **Finalization**: blocks never reached by any control path are
//!    pruned, trivial phis are substituted away, and predecessor lists are
//!    recomputed (exceptional edges included).
//!
//! Exception-handler entry blocks receive a synthetic caught-exception
//! value. Malformed input (stack underflow, inconsistent entry shapes,
//! branches out of range) is reported as a compilation error naming the
//! method and instruction, never as a panic.

use std::collections::VecDeque;

use crate::{
    bytecode::{InvokeKind, StackCode, StackOp},
    ir::{BlockId, ExcEdge, Instr, IrCode, ValueId},
    model::{Hierarchy, MethodFlags, MethodRef, Pools, Type, TypeKind},
    Error, Result,
};

/// Converts stack-based method bodies into SSA form.
pub struct IrBuilder<'a> {
    pools: &'a Pools,
    hierarchy: &'a Hierarchy,
}

/// Abstract machine state at a block boundary.
#[derive(Debug, Clone, Default)]
struct Frame {
    stack: Vec<ValueId>,
    locals: Vec<Option<ValueId>>,
}

impl<'a> IrBuilder<'a> {
    /// Creates a builder over the compilation's pools and hierarchy.
    #[must_use]
    pub fn new(pools: &'a Pools, hierarchy: &'a Hierarchy) -> Self {
        Self { pools, hierarchy }
    }

    /// Builds SSA for `method`.
    ///
    /// # Errors
    ///
    /// [`Error::Malformed`] or [`Error::StackShape`] on invalid input
    /// bytecode.
    pub fn build(
        &self,
        method: MethodRef,
        flags: MethodFlags,
        code: &StackCode,
    ) -> Result<IrCode> {
        Construction::new(self.pools, self.hierarchy, method, flags, code)?.run()
    }
}

/// One in-progress conversion.
struct Construction<'a> {
    pools: &'a Pools,
    hierarchy: &'a Hierarchy,
    method: MethodRef,
    code: &'a StackCode,

    ir: IrCode,
    /// Sorted instruction indices starting a block; `leaders[i]` starts
    /// block `i + base`.
    leaders: Vec<u32>,
    /// 1 when a synthetic preheader block precedes the bytecode blocks.
    ///
    /// Needed when instruction 0 is itself a branch target (or handler
    /// entry): the method-entry frame is not a CFG edge, so phis at the
    /// loop header need a real predecessor block to name.
    base: usize,
    /// Static predecessor count per block, exceptional edges included.
    pred_counts: Vec<usize>,
    /// Exceptional successors per block.
    exc_succs: Vec<Vec<(usize, Option<Type>)>>,
    /// Blocks that are handler entries.
    is_handler: Vec<bool>,
    /// Entry frame per block, once known.
    entries: Vec<Option<Frame>>,
    /// Blocks already simulated.
    simulated: Vec<bool>,
    worklist: VecDeque<usize>,
}

impl<'a> Construction<'a> {
    fn new(
        pools: &'a Pools,
        hierarchy: &'a Hierarchy,
        method: MethodRef,
        flags: MethodFlags,
        code: &'a StackCode,
    ) -> Result<Self> {
        if code.ops.is_empty() {
            return Err(malformed_error!(
                "{}: empty method body",
                pools.describe_method(method)
            ));
        }

        let len = code.ops.len() as u32;
        let mut leaders = vec![0u32];
        for (i, op) in code.ops.iter().enumerate() {
            for target in op.branch_targets() {
                if target >= len {
                    return Err(malformed_error!(
                        "{}: branch target {} out of range",
                        pools.describe_method(method),
                        target
                    ));
                }
                leaders.push(target);
            }
            #[allow(clippy::cast_possible_truncation)]
            let next = i as u32 + 1;
            if op.is_branch() && next < len {
                leaders.push(next);
            }
        }
        for handler in &code.handlers {
            if handler.handler >= len || handler.start >= len || handler.end > len {
                return Err(malformed_error!(
                    "{}: exception handler range out of bounds",
                    pools.describe_method(method)
                ));
            }
            leaders.push(handler.start);
            leaders.push(handler.handler);
            if handler.end < len {
                leaders.push(handler.end);
            }
        }
        leaders.sort_unstable();
        leaders.dedup();

        let entry_is_target = code
            .ops
            .iter()
            .any(|op| op.branch_targets().contains(&0))
            || code.handlers.iter().any(|h| h.handler == 0);
        let base = usize::from(entry_is_target);

        let block_count = leaders.len() + base;
        let mut ir = IrCode::new(method);
        for _ in 0..block_count {
            ir.add_block();
        }

        let mut this = Self {
            pools,
            hierarchy,
            method,
            code,
            ir,
            leaders,
            base,
            pred_counts: vec![0; block_count],
            exc_succs: vec![Vec::new(); block_count],
            is_handler: vec![false; block_count],
            entries: vec![None; block_count],
            simulated: vec![false; block_count],
            worklist: VecDeque::new(),
        };
        this.compute_static_edges();
        this.seed_entry(flags)?;
        Ok(this)
    }

    /// Instruction index range of a bytecode block.
    fn range(&self, block: usize) -> (usize, usize) {
        let ordinal = block - self.base;
        let lo = self.leaders[ordinal] as usize;
        let hi = self
            .leaders
            .get(ordinal + 1)
            .map_or(self.code.ops.len(), |&l| l as usize);
        (lo, hi)
    }

    /// Block ordinal containing an instruction index.
    fn block_of(&self, index: u32) -> usize {
        let ordinal = match self.leaders.binary_search(&index) {
            Ok(ordinal) => ordinal,
            Err(insertion) => insertion - 1,
        };
        ordinal + self.base
    }

    fn compute_static_edges(&mut self) {
        let block_count = self.leaders.len() + self.base;
        if self.base == 1 {
            let first = self.block_of(0);
            self.pred_counts[first] += 1;
        }
        for block in self.base..block_count {
            for succ in self.normal_successors(block) {
                self.pred_counts[succ] += 1;
            }
            let (lo, hi) = self.range(block);
            for handler in &self.code.handlers {
                let (hs, he) = (handler.start as usize, handler.end as usize);
                let overlaps = lo < he && hs < hi;
                let throws = overlaps
                    && self.code.ops[lo.max(hs)..hi.min(he)]
                        .iter()
                        .any(StackOp::can_throw);
                if throws {
                    let target = self.block_of(handler.handler);
                    if !self.exc_succs[block].iter().any(|&(b, _)| b == target) {
                        self.exc_succs[block].push((target, handler.catch_type));
                        self.pred_counts[target] += 1;
                        self.is_handler[target] = true;
                    }
                }
            }
        }
    }

    /// Static successors of a block from its final instruction.
    fn normal_successors(&self, block: usize) -> Vec<usize> {
        let (_, hi) = self.range(block);
        let last = &self.code.ops[hi - 1];
        match last {
            StackOp::Goto(t) => vec![self.block_of(*t)],
            StackOp::If(_, t) | StackOp::IfZero(_, t) => {
                let mut out = vec![self.block_of(*t)];
                if hi < self.code.ops.len() {
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(self.block_of(hi as u32));
                }
                out
            }
            StackOp::Switch { cases } => {
                let mut out: Vec<usize> = cases.iter().map(|&(_, t)| self.block_of(t)).collect();
                if hi < self.code.ops.len() {
                    #[allow(clippy::cast_possible_truncation)]
                    out.push(self.block_of(hi as u32));
                }
                out
            }
            StackOp::Return | StackOp::ReturnVoid | StackOp::Throw => Vec::new(),
            _ if hi < self.code.ops.len() => {
                #[allow(clippy::cast_possible_truncation)]
                vec![self.block_of(hi as u32)]
            }
            _ => Vec::new(),
        }
    }

    /// Creates argument values and the entry block frame.
    fn seed_entry(&mut self, flags: MethodFlags) -> Result<()> {
        let data = *self.pools.method_data(self.method);
        let proto = self.pools.protos.get(data.proto).clone();

        let mut locals: Vec<Option<ValueId>> = vec![None; self.code.max_locals as usize];
        let mut slot = 0usize;
        if !flags.contains(MethodFlags::STATIC) {
            let receiver = self.ir.new_argument(data.holder);
            *locals.get_mut(slot).ok_or_else(|| {
                malformed_error!(
                    "{}: max_locals too small for arguments",
                    self.pools.describe_method(self.method)
                )
            })? = Some(receiver);
            slot += 1;
        }
        for &param in &*proto.parameters {
            let value = self.ir.new_argument(param);
            *locals.get_mut(slot).ok_or_else(|| {
                malformed_error!(
                    "{}: max_locals too small for arguments",
                    self.pools.describe_method(self.method)
                )
            })? = Some(value);
            slot += 1;
        }

        self.entries[0] = Some(Frame {
            stack: Vec::new(),
            locals,
        });
        self.worklist.push_back(0);
        Ok(())
    }

    /// Runs the worklist to completion and finalizes the body.
    fn run(mut self) -> Result<IrCode> {
        while let Some(block) = self.worklist.pop_front() {
            if self.simulated[block] {
                continue;
            }
            self.simulated[block] = true;
            self.simulate(block)?;
        }
        self.finalize()
    }

    /// Merges predecessor `pred`'s frame into `succ`'s entry state.
    ///
    /// First contact with a multi-predecessor block allocates phis for every
    /// slot; later contacts back-patch operands.
    fn merge_into(&mut self, pred: usize, succ: usize, frame: &Frame) -> Result<()> {
        if self.is_handler[succ] {
            return Err(malformed_error!(
                "{}: handler entry block {} reachable by normal control flow",
                self.pools.describe_method(self.method),
                succ
            ));
        }
        self.merge_frame(pred, succ, frame, false)
    }

    fn merge_frame(
        &mut self,
        pred: usize,
        succ: usize,
        frame: &Frame,
        exceptional: bool,
    ) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let pred_id = BlockId(pred as u32);
        #[allow(clippy::cast_possible_truncation)]
        let succ_id = BlockId(succ as u32);

        if self.entries[succ].is_none() {
            // First contact decides the entry shape.
            let entry = if self.pred_counts[succ] > 1 {
                let mut entry = Frame::default();
                if !exceptional {
                    for &incoming in &frame.stack {
                        let ty = self.ir.value_type(incoming);
                        let dest = self.ir.new_value(ty);
                        self.ir.add_phi(succ_id, dest);
                        let phi = self.ir.block_mut(succ_id).phis.last_mut().expect("just added");
                        phi.operands.push((pred_id, incoming));
                        entry.stack.push(dest);
                    }
                }
                for slot in &frame.locals {
                    match slot {
                        Some(incoming) => {
                            let ty = self.ir.value_type(*incoming);
                            let dest = self.ir.new_value(ty);
                            self.ir.add_phi(succ_id, dest);
                            let phi =
                                self.ir.block_mut(succ_id).phis.last_mut().expect("just added");
                            phi.operands.push((pred_id, *incoming));
                            entry.locals.push(Some(dest));
                        }
                        None => entry.locals.push(None),
                    }
                }
                entry
            } else {
                // Single known predecessor: resolve eagerly, no phis.
                let mut entry = frame.clone();
                if exceptional {
                    entry.stack.clear();
                }
                entry
            };
            self.entries[succ] = Some(entry);
            self.worklist.push_back(succ);
            return Ok(());
        }

        // Back-patch phis with this predecessor's values.
        let entry = self.entries[succ].clone().expect("checked above");
        let expected_stack = entry.stack.len();
        if !exceptional && frame.stack.len() != expected_stack {
            return Err(Error::StackShape(format!(
                "{}: block {} entered with stack depth {} vs {}",
                self.pools.describe_method(self.method),
                succ,
                frame.stack.len(),
                expected_stack
            )));
        }

        let incoming: Vec<(ValueId, ValueId)> = {
            let mut pairs = Vec::new();
            if !exceptional {
                for (i, &dest) in entry.stack.iter().enumerate() {
                    pairs.push((dest, frame.stack[i]));
                }
            }
            for (i, slot) in entry.locals.iter().enumerate() {
                if let Some(dest) = slot {
                    let Some(Some(value)) = frame.locals.get(i) else {
                        return Err(Error::StackShape(format!(
                            "{}: local slot {} uninitialized on one path into block {}",
                            self.pools.describe_method(self.method),
                            i,
                            succ
                        )));
                    };
                    pairs.push((*dest, *value));
                }
            }
            pairs
        };

        for (dest, value) in incoming {
            // Entry values of multi-pred blocks are phis in allocation
            // order; walk them in step.
            let block = self.ir.block_mut(succ_id);
            let Some(phi) = block.phis.iter_mut().find(|p| p.dest == dest) else {
                return Err(Error::StackShape(format!(
                    "{}: unexpected second predecessor for single-entry block {}",
                    self.pools.describe_method(self.method),
                    succ
                )));
            };
            if phi.operand_for(pred_id).is_none() {
                phi.operands.push((pred_id, value));
            }

            // Widen the phi type at the merge point.
            let dest_ty = self.ir.value_type(dest);
            let value_ty = self.ir.value_type(value);
            if dest_ty != value_ty {
                let joined = self.join_types(dest_ty, value_ty, succ)?;
                self.ir.set_value_type(dest, joined);
            }
        }
        Ok(())
    }

    /// Verifier-style widening at merge points.
    fn join_types(&self, a: Type, b: Type, block: usize) -> Result<Type> {
        let types = &self.pools.types;
        let object = types.well_known().object;
        match (types.get(a).kind, types.get(b).kind) {
            (TypeKind::Primitive(pa), TypeKind::Primitive(pb)) if pa == pb => Ok(a),
            (TypeKind::Class | TypeKind::Array, TypeKind::Class | TypeKind::Array) => {
                Ok(self.hierarchy.join(a, b, object))
            }
            _ => Err(Error::StackShape(format!(
                "{}: incompatible types {} and {} merge at block {}",
                self.pools.describe_method(self.method),
                types.descriptor(a),
                types.descriptor(b),
                block
            ))),
        }
    }

    /// Simulates one block's instruction range.
    #[allow(clippy::too_many_lines)]
    fn simulate(&mut self, block: usize) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let block_id = BlockId(block as u32);
        let mut frame = self.entries[block].clone().expect("enqueued with entry");

        if self.base == 1 && block == 0 {
            // Synthetic preheader: forward the argument frame.
            let succ = self.block_of(0);
            #[allow(clippy::cast_possible_truncation)]
            self.ir.block_mut(block_id).instrs.push(Instr::Goto {
                target: BlockId(succ as u32),
            });
            return self.merge_into(block, succ, &frame);
        }

        let entry_locals = frame.locals.clone();
        let (lo, hi) = self.range(block);
        let wk = *self.pools.types.well_known();

        // Exceptional merges use the entry state: the conservative model is
        // that the exception may be raised before any effect of the block.
        let exc_succs = self.exc_succs[block].clone();
        for &(handler, catch_type) in &exc_succs {
            let handler_frame = Frame {
                stack: Vec::new(),
                locals: entry_locals.clone(),
            };
            self.prepare_handler_entry(block, handler, catch_type, &handler_frame)?;
        }

        if self.is_handler[block] {
            let entry = self.entries[block].as_ref().expect("handler entry");
            let exc = entry.stack[0];
            self.ir
                .block_mut(block_id)
                .instrs
                .push(Instr::CaughtException { dest: exc });
            frame = entry.clone();
        }

        macro_rules! pop {
            () => {
                frame.stack.pop().ok_or_else(|| {
                    malformed_error!(
                        "{}: stack underflow in block {}",
                        self.pools.describe_method(self.method),
                        block
                    )
                })?
            };
        }
        macro_rules! emit {
            ($instr:expr) => {
                self.ir.block_mut(block_id).instrs.push($instr)
            };
        }

        let mut terminated = false;
        for index in lo..hi {
            let op = self.code.ops[index].clone();
            match op {
                StackOp::PushInt(value) => {
                    let dest = self.ir.new_value(wk.int);
                    emit!(Instr::ConstInt { dest, value });
                    frame.stack.push(dest);
                }
                StackOp::PushString(value) => {
                    let dest = self.ir.new_value(wk.string);
                    emit!(Instr::ConstString { dest, value });
                    frame.stack.push(dest);
                }
                StackOp::PushNull => {
                    let dest = self.ir.new_value(wk.object);
                    emit!(Instr::ConstNull { dest });
                    frame.stack.push(dest);
                }
                StackOp::Load(slot) => {
                    let value = frame
                        .locals
                        .get(slot as usize)
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            malformed_error!(
                                "{}: load of uninitialized local {}",
                                self.pools.describe_method(self.method),
                                slot
                            )
                        })?;
                    frame.stack.push(value);
                }
                StackOp::Store(slot) => {
                    let value = pop!();
                    let Some(entry) = frame.locals.get_mut(slot as usize) else {
                        return Err(malformed_error!(
                            "{}: store to local {} beyond max_locals",
                            self.pools.describe_method(self.method),
                            slot
                        ));
                    };
                    *entry = Some(value);
                }
                StackOp::Dup => {
                    let top = *frame.stack.last().ok_or_else(|| {
                        malformed_error!(
                            "{}: stack underflow in block {}",
                            self.pools.describe_method(self.method),
                            block
                        )
                    })?;
                    frame.stack.push(top);
                }
                StackOp::Pop => {
                    let _ = pop!();
                }
                StackOp::Swap => {
                    let a = pop!();
                    let b = pop!();
                    frame.stack.push(a);
                    frame.stack.push(b);
                }
                StackOp::Binary(op) => {
                    let rhs = pop!();
                    let lhs = pop!();
                    let dest = self.ir.new_value(wk.int);
                    emit!(Instr::Binary { dest, op, lhs, rhs });
                    frame.stack.push(dest);
                }
                StackOp::Neg => {
                    let src = pop!();
                    let dest = self.ir.new_value(wk.int);
                    emit!(Instr::Neg { dest, src });
                    frame.stack.push(dest);
                }
                StackOp::GetStatic(field) => {
                    let ty = self.pools.field_data(field).ty;
                    let dest = self.ir.new_value(ty);
                    emit!(Instr::StaticGet { dest, field });
                    frame.stack.push(dest);
                }
                StackOp::PutStatic(field) => {
                    let value = pop!();
                    emit!(Instr::StaticPut { field, value });
                }
                StackOp::GetField(field) => {
                    let object = pop!();
                    let ty = self.pools.field_data(field).ty;
                    let dest = self.ir.new_value(ty);
                    emit!(Instr::InstanceGet {
                        dest,
                        field,
                        object
                    });
                    frame.stack.push(dest);
                }
                StackOp::PutField(field) => {
                    let value = pop!();
                    let object = pop!();
                    emit!(Instr::InstancePut {
                        field,
                        object,
                        value
                    });
                }
                StackOp::Invoke(kind, method) => {
                    let proto = self.pools.method_proto(method).clone();
                    let mut argc = proto.parameters.len();
                    if kind != InvokeKind::Static {
                        argc += 1;
                    }
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(pop!());
                    }
                    args.reverse();
                    let dest = if proto.return_type == wk.void {
                        None
                    } else {
                        Some(self.ir.new_value(proto.return_type))
                    };
                    emit!(Instr::Invoke {
                        dest,
                        kind,
                        method,
                        args
                    });
                    if let Some(dest) = dest {
                        frame.stack.push(dest);
                    }
                }
                StackOp::New(ty) => {
                    let dest = self.ir.new_value(ty);
                    emit!(Instr::NewInstance { dest, ty });
                    frame.stack.push(dest);
                }
                StackOp::NewArray(ty) => {
                    let length = pop!();
                    let array_ty = self.pools.types.array_of(ty)?;
                    let dest = self.ir.new_value(array_ty);
                    emit!(Instr::NewArray {
                        dest,
                        ty: array_ty,
                        length
                    });
                    frame.stack.push(dest);
                }
                StackOp::ArrayLoad => {
                    let index_value = pop!();
                    let array = pop!();
                    let element = self
                        .pools
                        .types
                        .element_of(self.ir.value_type(array))?
                        .unwrap_or(wk.object);
                    let dest = self.ir.new_value(element);
                    emit!(Instr::ArrayGet {
                        dest,
                        array,
                        index: index_value
                    });
                    frame.stack.push(dest);
                }
                StackOp::ArrayStore => {
                    let value = pop!();
                    let index_value = pop!();
                    let array = pop!();
                    emit!(Instr::ArrayPut {
                        array,
                        index: index_value,
                        value
                    });
                }
                StackOp::ArrayLength => {
                    let array = pop!();
                    let dest = self.ir.new_value(wk.int);
                    emit!(Instr::ArrayLength { dest, array });
                    frame.stack.push(dest);
                }
                StackOp::CheckCast(ty) => {
                    let src = pop!();
                    let dest = self.ir.new_value(ty);
                    emit!(Instr::CheckCast { dest, src, ty });
                    frame.stack.push(dest);
                }
                StackOp::InstanceOf(ty) => {
                    let src = pop!();
                    let dest = self.ir.new_value(wk.boolean);
                    emit!(Instr::InstanceOf { dest, src, ty });
                    frame.stack.push(dest);
                }
                StackOp::MonitorEnter => {
                    let object = pop!();
                    emit!(Instr::MonitorEnter { object });
                }
                StackOp::MonitorExit => {
                    let object = pop!();
                    emit!(Instr::MonitorExit { object });
                }
                StackOp::Goto(target) => {
                    let succ = self.block_of(target);
                    #[allow(clippy::cast_possible_truncation)]
                    emit!(Instr::Goto {
                        target: BlockId(succ as u32)
                    });
                    self.merge_into(block, succ, &frame)?;
                    terminated = true;
                }
                StackOp::If(cond, target) | StackOp::IfZero(cond, target) => {
                    let is_zero_form = matches!(self.code.ops[index], StackOp::IfZero(..));
                    let (lhs, rhs) = if is_zero_form {
                        (pop!(), None)
                    } else {
                        let rhs = pop!();
                        (pop!(), Some(rhs))
                    };
                    let then_block = self.block_of(target);
                    if hi >= self.code.ops.len() {
                        return Err(malformed_error!(
                            "{}: conditional branch falls off the end of the method",
                            self.pools.describe_method(self.method)
                        ));
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let else_block = self.block_of(hi as u32);
                    #[allow(clippy::cast_possible_truncation)]
                    emit!(Instr::If {
                        cond,
                        lhs,
                        rhs,
                        then_target: BlockId(then_block as u32),
                        else_target: BlockId(else_block as u32)
                    });
                    self.merge_into(block, then_block, &frame)?;
                    self.merge_into(block, else_block, &frame)?;
                    terminated = true;
                }
                StackOp::Switch { ref cases } => {
                    let value = pop!();
                    if hi >= self.code.ops.len() {
                        return Err(malformed_error!(
                            "{}: switch falls off the end of the method",
                            self.pools.describe_method(self.method)
                        ));
                    }
                    #[allow(clippy::cast_possible_truncation)]
                    let fallthrough = self.block_of(hi as u32);
                    #[allow(clippy::cast_possible_truncation)]
                    let ir_cases: Vec<(i32, BlockId)> = cases
                        .iter()
                        .map(|&(key, t)| (key, BlockId(self.block_of(t) as u32)))
                        .collect();
                    #[allow(clippy::cast_possible_truncation)]
                    emit!(Instr::Switch {
                        value,
                        cases: ir_cases,
                        fallthrough: BlockId(fallthrough as u32)
                    });
                    for &(_, t) in cases {
                        self.merge_into(block, self.block_of(t), &frame)?;
                    }
                    self.merge_into(block, fallthrough, &frame)?;
                    terminated = true;
                }
                StackOp::Return => {
                    let value = pop!();
                    emit!(Instr::Return { value: Some(value) });
                    terminated = true;
                }
                StackOp::ReturnVoid => {
                    emit!(Instr::Return { value: None });
                    terminated = true;
                }
                StackOp::Throw => {
                    let exception = pop!();
                    emit!(Instr::Throw { exception });
                    terminated = true;
                }
            }
        }

        if !terminated {
            if hi >= self.code.ops.len() {
                return Err(malformed_error!(
                    "{}: control falls off the end of the method",
                    self.pools.describe_method(self.method)
                ));
            }
            #[allow(clippy::cast_possible_truncation)]
            let fallthrough = self.block_of(hi as u32);
            #[allow(clippy::cast_possible_truncation)]
            emit!(Instr::Goto {
                target: BlockId(fallthrough as u32)
            });
            self.merge_into(block, fallthrough, &frame)?;
        }

        Ok(())
    }

    /// Creates or back-patches a handler block's entry.
    fn prepare_handler_entry(
        &mut self,
        pred: usize,
        handler: usize,
        catch_type: Option<Type>,
        frame: &Frame,
    ) -> Result<()> {
        let throwable = self.pools.types.well_known().throwable;
        if self.entries[handler].is_none() {
            // The synthetic caught-exception value enters through the
            // entry stack rather than through a phi.
            let exc_ty = catch_type.unwrap_or(throwable);
            let exc = self.ir.new_value(exc_ty);
            self.merge_frame(pred, handler, frame, true)?;
            let entry = self.entries[handler].as_mut().expect("just created");
            entry.stack = vec![exc];
        } else {
            self.merge_frame(pred, handler, frame, true)?;
        }
        Ok(())
    }

    /// Prunes unreachable blocks, substitutes trivial phis and fixes
    /// predecessor lists.
    fn finalize(mut self) -> Result<IrCode> {
        let block_count = self.ir.block_count();
        let reachable: Vec<bool> = (0..block_count).map(|b| self.simulated[b]).collect();

        // Remap surviving ordinals to dense ids.
        let mut remap: Vec<Option<BlockId>> = vec![None; block_count];
        let mut kept = 0u32;
        for (ordinal, &alive) in reachable.iter().enumerate() {
            if alive {
                remap[ordinal] = Some(BlockId(kept));
                kept += 1;
            }
        }

        let mut pruned = IrCode::new(self.method);
        for _ in 0..kept {
            pruned.add_block();
        }
        // Transplant values and argument bookkeeping wholesale.
        std::mem::swap(pruned.values_mut(), self.ir.values_mut());
        std::mem::swap(pruned.args_mut(), self.ir.args_mut());

        for ordinal in 0..block_count {
            let Some(new_id) = remap[ordinal] else {
                continue;
            };
            #[allow(clippy::cast_possible_truncation)]
            let old_id = BlockId(ordinal as u32);
            let mut block = std::mem::take(self.ir.block_mut(old_id));
            for phi in &mut block.phis {
                phi.operands.retain(|&(pred, _)| remap[pred.index()].is_some());
                for (pred, _) in &mut phi.operands {
                    *pred = remap[pred.index()].expect("retained");
                }
            }
            for instr in &mut block.instrs {
                instr.retarget(&mut |target| {
                    *target = remap[target.index()].unwrap_or(*target);
                });
            }
            block.preds.clear();
            *pruned.block_mut(new_id) = block;
        }

        for (block, succs) in self.exc_succs.iter().enumerate() {
            let Some(from) = remap[block] else { continue };
            for &(handler, catch_type) in succs {
                if let Some(handler) = remap[handler] {
                    pruned.exc_edges.push(ExcEdge {
                        from,
                        handler,
                        catch_type,
                    });
                }
            }
        }

        pruned.remove_trivial_phis();
        pruned.recompute_all_preds();
        Ok(pruned)
    }
}
