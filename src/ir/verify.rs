//! SSA well-formedness checks.
//!
//! Run after construction and between optimization passes in debug
//! builds. A violation is always a compiler bug, never an input error,
//! so failures surface as [`Error::Internal`].

use std::collections::HashMap;

use crate::{
    ir::{BlockId, Dominators, IrCode, ValueId},
    Error, Result,
};

/// Checks the single-definition and dominance properties of a body.
///
/// Every value must be defined exactly once (as an argument, a phi dest
/// or an instruction dest), every instruction use must be dominated by
/// its definition, and every phi operand must be defined on a path to
/// the naming predecessor.
///
/// # Errors
///
/// [`Error::Internal`] describing the first violation found.
pub fn verify_ssa(code: &IrCode) -> Result<()> {
    let mut def_site: HashMap<ValueId, Option<BlockId>> = HashMap::new();
    for &arg in code.args() {
        if def_site.insert(arg, None).is_some() {
            return Err(duplicate(code, arg));
        }
    }
    for block in code.block_ids() {
        for phi in &code.block(block).phis {
            if def_site.insert(phi.dest, Some(block)).is_some() {
                return Err(duplicate(code, phi.dest));
            }
        }
        for instr in &code.block(block).instrs {
            if let Some(dest) = instr.dest() {
                if def_site.insert(dest, Some(block)).is_some() {
                    return Err(duplicate(code, dest));
                }
            }
        }
    }

    let doms = Dominators::compute(code);

    // Position of each in-block definition, phis counting as position 0.
    let mut order: HashMap<ValueId, usize> = HashMap::new();
    for block in code.block_ids() {
        for phi in &code.block(block).phis {
            order.insert(phi.dest, 0);
        }
        for (i, instr) in code.block(block).instrs.iter().enumerate() {
            if let Some(dest) = instr.dest() {
                order.insert(dest, i + 1);
            }
        }
    }

    for block in code.block_ids() {
        if !doms.is_reachable(block) {
            continue;
        }
        for (i, instr) in code.block(block).instrs.iter().enumerate() {
            for used in instr.uses() {
                check_use(code, &def_site, &doms, &order, used, block, i + 1)?;
            }
        }
        for phi in &code.block(block).phis {
            for &(pred, value) in &phi.operands {
                // A phi operand must be available at the end of its
                // predecessor.
                if !doms.is_reachable(pred) {
                    continue;
                }
                check_use(
                    code,
                    &def_site,
                    &doms,
                    &order,
                    value,
                    pred,
                    usize::MAX,
                )?;
            }
        }
    }
    Ok(())
}

fn check_use(
    code: &IrCode,
    def_site: &HashMap<ValueId, Option<BlockId>>,
    doms: &Dominators,
    order: &HashMap<ValueId, usize>,
    used: ValueId,
    at_block: BlockId,
    at_position: usize,
) -> Result<()> {
    let Some(site) = def_site.get(&used) else {
        return Err(Error::Internal(format!(
            "ssa violation in method {:?}: {used} used but never defined",
            code.method
        )));
    };
    let Some(def_block) = site else {
        return Ok(()); // arguments dominate everything
    };
    let dominated = if *def_block == at_block {
        order.get(&used).copied().unwrap_or(0) < at_position
    } else {
        doms.dominates(*def_block, at_block)
    };
    if !dominated {
        return Err(Error::Internal(format!(
            "ssa violation in method {:?}: use of {used} in {at_block} not dominated by its definition in {def_block}",
            code.method
        )));
    }
    Ok(())
}

fn duplicate(code: &IrCode, value: ValueId) -> Error {
    Error::Internal(format!(
        "ssa violation in method {:?}: {value} defined more than once",
        code.method
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::BinaryOp;
    use crate::ir::Instr;
    use crate::model::Pools;

    fn tiny_body() -> (IrCode, ValueId) {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Main;").unwrap();
        let method = pools.method(holder, "f", wk.int, &[wk.int]);

        let mut code = IrCode::new(method);
        let arg = code.new_argument(wk.int);
        let entry = code.add_block();
        let dest = code.new_value(wk.int);
        code.block_mut(entry).instrs.push(Instr::Binary {
            dest,
            op: BinaryOp::Add,
            lhs: arg,
            rhs: arg,
        });
        code.block_mut(entry)
            .instrs
            .push(Instr::Return { value: Some(dest) });
        (code, dest)
    }

    #[test]
    fn test_well_formed_body_passes() {
        let (code, _) = tiny_body();
        verify_ssa(&code).unwrap();
    }

    #[test]
    fn test_use_before_def_rejected() {
        let (mut code, dest) = tiny_body();
        let entry = code.entry();
        // Move the return in front of the definition it consumes.
        code.block_mut(entry).instrs.swap(0, 1);
        let _ = dest;
        assert!(matches!(verify_ssa(&code), Err(Error::Internal(_))));
    }

    #[test]
    fn test_double_definition_rejected() {
        let (mut code, dest) = tiny_body();
        let entry = code.entry();
        code.block_mut(entry).instrs.insert(
            0,
            Instr::ConstInt {
                dest,
                value: 1,
            },
        );
        assert!(matches!(verify_ssa(&code), Err(Error::Internal(_))));
    }
}
