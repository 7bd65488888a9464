//! Dead code elimination and branch folding.

use std::collections::HashMap;

use crate::{
    bytecode::IfCond,
    ir::{BlockId, Instr, IrCode, ValueId},
    model::{Application, MethodRef},
    optimize::{CompilerContext, IrPass},
    Result,
};

/// Removes instructions whose result is unused and whose execution has
/// no observable effect, and folds branches whose condition is a
/// compile-time constant.
///
/// Constant folding of a conditional turns it into a goto; the phi
/// operands naming the abandoned edge are dropped here so the body is
/// consistent before the scheduler's normalization step.
#[derive(Debug, Default)]
pub struct DeadCodePass;

impl IrPass for DeadCodePass {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn run_on_method(
        &self,
        body: &mut IrCode,
        _method: MethodRef,
        _ctx: &CompilerContext,
        _app: &Application,
    ) -> Result<bool> {
        let mut changed = false;
        changed |= fold_constant_branches(body);
        // Each removal can strand further defs, so sweep to fixpoint.
        while sweep_unused(body) {
            changed = true;
        }
        Ok(changed)
    }
}

/// Integer constants that reach each value, method-wide. Sound because
/// SSA values have a single definition.
fn constant_values(body: &IrCode) -> HashMap<ValueId, i32> {
    let mut constants = HashMap::new();
    for (_, instr) in body.instructions() {
        if let Instr::ConstInt { dest, value } = instr {
            constants.insert(*dest, *value);
        }
    }
    constants
}

fn evaluate(cond: IfCond, lhs: i32, rhs: i32) -> bool {
    match cond {
        IfCond::Eq => lhs == rhs,
        IfCond::Ne => lhs != rhs,
        IfCond::Lt => lhs < rhs,
        IfCond::Ge => lhs >= rhs,
        IfCond::Gt => lhs > rhs,
        IfCond::Le => lhs <= rhs,
    }
}

fn fold_constant_branches(body: &mut IrCode) -> bool {
    let constants = constant_values(body);
    let mut rewrites: Vec<(BlockId, Instr, Vec<BlockId>)> = Vec::new();

    for block in body.block_ids() {
        let Some(last) = body.block(block).instrs.last() else {
            continue;
        };
        match last {
            Instr::If {
                cond,
                lhs,
                rhs,
                then_target,
                else_target,
            } => {
                let Some(&lhs_value) = constants.get(lhs) else {
                    continue;
                };
                let rhs_value = match rhs {
                    Some(rhs) => match constants.get(rhs) {
                        Some(&v) => v,
                        None => continue,
                    },
                    None => 0,
                };
                let (taken, abandoned) = if evaluate(*cond, lhs_value, rhs_value) {
                    (*then_target, *else_target)
                } else {
                    (*else_target, *then_target)
                };
                let dropped = if taken == abandoned {
                    Vec::new()
                } else {
                    vec![abandoned]
                };
                rewrites.push((block, Instr::Goto { target: taken }, dropped));
            }
            Instr::Switch {
                value,
                cases,
                fallthrough,
            } => {
                let Some(&selector) = constants.get(value) else {
                    continue;
                };
                let taken = cases
                    .iter()
                    .find(|&&(key, _)| key == selector)
                    .map_or(*fallthrough, |&(_, target)| target);
                let dropped: Vec<BlockId> = cases
                    .iter()
                    .map(|&(_, t)| t)
                    .chain(std::iter::once(*fallthrough))
                    .filter(|&t| t != taken)
                    .collect();
                rewrites.push((block, Instr::Goto { target: taken }, dropped));
            }
            _ => {}
        }
    }

    let changed = !rewrites.is_empty();
    for (block, replacement, dropped) in rewrites {
        *body.block_mut(block).instrs.last_mut().expect("matched above") = replacement;
        for target in dropped {
            let operands_from = block;
            body.block_mut(target)
                .phis
                .iter_mut()
                .for_each(|phi| phi.operands.retain(|&(pred, _)| pred != operands_from));
        }
    }
    changed
}

/// Removes one round of unused, effect-free definitions.
fn sweep_unused(body: &mut IrCode) -> bool {
    let uses = body.use_counts();
    let mut removed = false;
    for block in body.blocks_mut() {
        block.instrs.retain(|instr| {
            let dead = instr
                .dest()
                .is_some_and(|dest| uses.get(&dest).copied().unwrap_or(0) == 0)
                && !instr.has_side_effects();
            if dead {
                removed = true;
            }
            !dead
        });
        block.phis.retain(|phi| {
            let dead = uses.get(&phi.dest).copied().unwrap_or(0) == 0;
            if dead {
                removed = true;
            }
            !dead
        });
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, IfCond, StackCode, StackOp};
    use crate::ir::IrBuilder;
    use crate::model::{Hierarchy, MethodFlags, Pools};
    use crate::options::CompileOptions;
    use std::sync::Arc;

    fn build(pools: &Arc<Pools>, ops: Vec<StackOp>, max_locals: u16) -> IrCode {
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Main;").unwrap();
        let method = pools.method(holder, "f", wk.int, &[wk.int]);
        let hierarchy = Hierarchy::default();
        IrBuilder::new(pools, &hierarchy)
            .build(
                method,
                MethodFlags::PUBLIC | MethodFlags::STATIC,
                &StackCode::new(max_locals, ops),
            )
            .unwrap()
    }

    fn run(body: &mut IrCode, pools: Arc<Pools>) -> bool {
        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        let classes = vec![crate::model::ClassDef::new(
            pools.class_type("Lapp/Main;").unwrap(),
            crate::model::ClassFlags::PUBLIC,
            Some(pools.types.well_known().object),
        )];
        let app = Application::build(pools, classes, Vec::new()).unwrap();
        let method = body.method;
        DeadCodePass
            .run_on_method(body, method, &ctx, &app)
            .unwrap()
    }

    #[test]
    fn test_unused_pure_computation_removed() {
        let pools = Pools::new();
        let mut body = build(
            &pools,
            vec![
                StackOp::Load(0),
                StackOp::Load(0),
                StackOp::Binary(BinaryOp::Add),
                StackOp::Pop,
                StackOp::Load(0),
                StackOp::Return,
            ],
            1,
        );
        assert!(run(&mut body, pools));
        assert_eq!(body.instr_count(), 1, "only the return survives");
    }

    #[test]
    fn test_constant_condition_becomes_goto() {
        let pools = Pools::new();
        let mut body = build(
            &pools,
            vec![
                StackOp::PushInt(1),
                StackOp::IfZero(IfCond::Ne, 4),
                StackOp::PushInt(0),
                StackOp::Return,
                StackOp::PushInt(42),
                StackOp::Return,
            ],
            1,
        );
        assert!(run(&mut body, pools));
        let has_if = body
            .instructions()
            .any(|(_, i)| matches!(i, Instr::If { .. }));
        assert!(!has_if);
    }

    #[test]
    fn test_effectful_instruction_kept() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Main;").unwrap();
        let field = pools.field(holder, "counter", wk.int);
        let mut body = build(
            &pools,
            vec![
                StackOp::GetStatic(field),
                StackOp::Pop,
                StackOp::Load(0),
                StackOp::Return,
            ],
            1,
        );
        // The static read can run a class initializer; it stays even
        // though its value is unused.
        run(&mut body, pools);
        let has_get = body
            .instructions()
            .any(|(_, i)| matches!(i, Instr::StaticGet { .. }));
        assert!(has_get);
    }
}
