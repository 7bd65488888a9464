//! Call-site inlining.
//!
//! Deliberately modest: only single-block callees within the configured
//! instruction budget are spliced, which covers accessors, forwarders
//! and small helpers without any need to merge control flow. The
//! removed call edge is queued as a retraction; when it was the
//! callee's last justification, the callee itself dies at the end of
//! the wave.

use std::collections::HashMap;

use crate::{
    bytecode::InvokeKind,
    ir::{Instr, IrCode, ValueId},
    model::{Application, MethodFlags, MethodRef, Resolution},
    optimize::{CompilerContext, IrPass},
    trace::{Reason, Retraction},
    Result,
};

/// Inlines small static and direct calls.
#[derive(Debug, Default)]
pub struct InlinerPass;

/// A call site chosen for inlining.
struct Candidate {
    block: crate::ir::BlockId,
    index: usize,
    target: MethodRef,
}

impl IrPass for InlinerPass {
    fn name(&self) -> &'static str {
        "inliner"
    }

    fn run_on_method(
        &self,
        body: &mut IrCode,
        method: MethodRef,
        ctx: &CompilerContext,
        app: &Application,
    ) -> Result<bool> {
        if !ctx.options.enable_inlining {
            return Ok(false);
        }
        let mut changed = false;
        // One candidate at a time: splicing shifts instruction indices.
        while let Some(candidate) = self.find_candidate(body, method, ctx, app)? {
            let Some(callee_body) = ctx.ir_bodies.get(&candidate.target).map(|b| b.clone())
            else {
                // Another worker holds the body right now; a later wave
                // will see it again.
                break;
            };
            splice(body, &candidate, &callee_body, ctx, method, app);
            ctx.retractions.push(Retraction::CallEdge {
                caller: method,
                callee: candidate.target,
            });
            changed = true;
        }
        Ok(changed)
    }
}

impl InlinerPass {
    /// Scans for the first call site whose callee qualifies.
    fn find_candidate(
        &self,
        body: &IrCode,
        caller: MethodRef,
        ctx: &CompilerContext,
        app: &Application,
    ) -> Result<Option<Candidate>> {
        for block in body.block_ids() {
            // Splicing under a live handler would silently extend the
            // protected region over the callee's code.
            if body.exc_edges.iter().any(|edge| edge.from == block) {
                continue;
            }
            for (index, instr) in body.block(block).instrs.iter().enumerate() {
                let Instr::Invoke { kind, method, .. } = instr else {
                    continue;
                };
                if !matches!(kind, InvokeKind::Static | InvokeKind::Direct) {
                    continue;
                }
                let Resolution::Program(target) = app.resolve_method(*method) else {
                    continue;
                };
                if target == caller {
                    continue; // recursion
                }
                if self.qualifies(target, ctx, app)? {
                    return Ok(Some(Candidate {
                        block,
                        index,
                        target,
                    }));
                }
            }
        }
        Ok(None)
    }

    fn qualifies(
        &self,
        target: MethodRef,
        ctx: &CompilerContext,
        app: &Application,
    ) -> Result<bool> {
        let definition = app.definition_of(target)?;
        if definition
            .flags
            .intersects(MethodFlags::CONSTRUCTOR | MethodFlags::NATIVE | MethodFlags::SYNCHRONIZED)
        {
            return Ok(false);
        }
        let Some(body) = ctx.ir_bodies.get(&target) else {
            return Ok(false);
        };
        if body.block_count() != 1 || !body.exc_edges.is_empty() {
            return Ok(false);
        }
        if body.instr_count() > ctx.options.inline_budget {
            return Ok(false);
        }
        // Monitor operations and throws need their own frame semantics.
        let unsplicable = body.instructions().any(|(_, i)| {
            matches!(
                i,
                Instr::MonitorEnter { .. }
                    | Instr::MonitorExit { .. }
                    | Instr::Throw { .. }
                    | Instr::CaughtException { .. }
            )
        });
        if unsplicable {
            return Ok(false);
        }
        // Splicing moves the callee's platform references into the
        // caller; anything newer than the floor has to stay put.
        let min_api = ctx.options.min_api;
        for (_, instr) in body.instructions() {
            let Instr::Invoke { method, .. } = instr else {
                continue;
            };
            if matches!(app.resolve_method(*method), Resolution::Program(_)) {
                continue;
            }
            let data = ctx.pools.method_data(*method);
            let holder = ctx.pools.types.descriptor(data.holder);
            let name = ctx.pools.strings.get(data.name);
            if !ctx.api.method_available(holder, name, min_api) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Splices the callee's single block in place of the call instruction.
fn splice(
    body: &mut IrCode,
    candidate: &Candidate,
    callee_body: &IrCode,
    ctx: &CompilerContext,
    caller: MethodRef,
    app: &Application,
) {
    let call = body.block(candidate.block).instrs[candidate.index].clone();
    let Instr::Invoke { dest, args, .. } = call else {
        return;
    };

    // Callee values map to fresh caller values; parameters map to the
    // call arguments directly.
    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    for (param, arg) in callee_body.args().iter().zip(args.iter()) {
        value_map.insert(*param, *arg);
    }

    let callee_block = callee_body.block(callee_body.entry());
    let mut spliced: Vec<Instr> = Vec::with_capacity(callee_block.instrs.len());
    let mut returned: Option<ValueId> = None;
    for instr in &callee_block.instrs {
        if let Instr::Return { value } = instr {
            returned = (*value).map(|v| value_map.get(&v).copied().unwrap_or(v));
            continue;
        }
        let mut copy = instr.clone();
        let dest_before = copy.dest();
        copy.visit_values_mut(&mut |value| {
            if Some(*value) == dest_before {
                return; // defs are remapped below
            }
            if let Some(&mapped) = value_map.get(value) {
                *value = mapped;
            }
        });
        if let Some(old_dest) = copy.dest() {
            let fresh = body.new_value(callee_body.value_type(old_dest));
            value_map.insert(old_dest, fresh);
            copy.visit_values_mut(&mut |value| {
                if *value == old_dest {
                    *value = fresh;
                }
            });
        }
        // Call sites moving into the caller keep the call graph and the
        // justifications truthful.
        if let Instr::Invoke { kind, method, .. } = &copy {
            if matches!(kind, InvokeKind::Static | InvokeKind::Direct) {
                if let Resolution::Program(target) = app.resolve_method(*method) {
                    ctx.callgraph.add_edge(caller, target);
                    ctx.facts.justify(target, Reason::DirectCall(caller));
                }
            }
        }
        spliced.push(copy);
    }

    let instrs = &mut body.block_mut(candidate.block).instrs;
    instrs.splice(candidate.index..=candidate.index, spliced);

    if let (Some(dest), Some(returned)) = (dest, returned) {
        body.replace_uses(dest, returned);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{BinaryOp, InvokeKind, StackCode, StackOp};
    use crate::ir::IrBuilder;
    use crate::model::{ClassDef, ClassFlags, Hierarchy, MethodDef, Pools};
    use crate::options::CompileOptions;
    use std::sync::Arc;

    /// A caller invoking `twice(x)` where `twice` doubles its argument.
    fn fixture() -> (Application, CompilerContext, MethodRef, MethodRef) {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Math;").unwrap();
        let twice = pools.method(holder, "twice", wk.int, &[wk.int]);
        let caller = pools.method(holder, "compute", wk.int, &[wk.int]);

        let twice_code = StackCode::new(
            1,
            vec![
                StackOp::Load(0),
                StackOp::Load(0),
                StackOp::Binary(BinaryOp::Add),
                StackOp::Return,
            ],
        );
        let caller_code = StackCode::new(
            1,
            vec![
                StackOp::Load(0),
                StackOp::Invoke(InvokeKind::Static, twice),
                StackOp::Return,
            ],
        );

        let mut class = ClassDef::new(holder, ClassFlags::PUBLIC, Some(wk.object));
        class.methods.push(MethodDef {
            reference: twice,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(twice_code.clone()),
        });
        class.methods.push(MethodDef {
            reference: caller,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(caller_code.clone()),
        });

        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        let app = Application::build(pools, vec![class], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);
        let builder = IrBuilder::new(app.pools(), &hierarchy);
        let flags = MethodFlags::PUBLIC | MethodFlags::STATIC;
        ctx.ir_bodies
            .insert(twice, builder.build(twice, flags, &twice_code).unwrap());
        ctx.ir_bodies
            .insert(caller, builder.build(caller, flags, &caller_code).unwrap());
        ctx.callgraph.add_edge(caller, twice);
        (app, ctx, caller, twice)
    }

    #[test]
    fn test_small_static_callee_inlined() {
        let (app, ctx, caller, twice) = fixture();
        let (_, mut body) = ctx.ir_bodies.remove(&caller).unwrap();

        let changed = InlinerPass
            .run_on_method(&mut body, caller, &ctx, &app)
            .unwrap();
        assert!(changed);

        let has_invoke = body
            .instructions()
            .any(|(_, i)| matches!(i, Instr::Invoke { .. }));
        assert!(!has_invoke, "the call site is gone");
        let has_add = body
            .instructions()
            .any(|(_, i)| matches!(i, Instr::Binary { .. }));
        assert!(has_add, "the callee's add was spliced in");
        assert_eq!(ctx.retractions.pending(), 1);
        let _ = twice;
    }

    #[test]
    fn test_budget_blocks_inlining() {
        let (app, ctx, caller, _) = fixture();
        let mut opts = ctx.options.clone();
        opts.inline_budget = 0;
        let small_ctx = CompilerContext::new(Arc::clone(&ctx.pools), opts);
        for entry in ctx.ir_bodies.iter() {
            small_ctx.ir_bodies.insert(*entry.key(), entry.value().clone());
        }
        let (_, mut body) = small_ctx.ir_bodies.remove(&caller).unwrap();

        let changed = InlinerPass
            .run_on_method(&mut body, caller, &small_ctx, &app)
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn test_platform_reference_above_floor_blocks_inlining() {
        use crate::api::ApiTable;

        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let math = pools.types.intern("Ljava/lang/Math;").unwrap();
        let add_exact = pools.method(math, "addExact", wk.int, &[wk.int, wk.int]);
        let holder = pools.class_type("Lapp/Math;").unwrap();
        let helper = pools.method(holder, "helper", wk.int, &[wk.int]);
        let caller = pools.method(holder, "compute", wk.int, &[wk.int]);

        let helper_code = StackCode::new(
            1,
            vec![
                StackOp::Load(0),
                StackOp::Load(0),
                StackOp::Invoke(InvokeKind::Static, add_exact),
                StackOp::Return,
            ],
        );
        let caller_code = StackCode::new(
            1,
            vec![
                StackOp::Load(0),
                StackOp::Invoke(InvokeKind::Static, helper),
                StackOp::Return,
            ],
        );

        let mut class = ClassDef::new(holder, ClassFlags::PUBLIC, Some(wk.object));
        for (reference, code) in [(helper, &helper_code), (caller, &caller_code)] {
            class.methods.push(MethodDef {
                reference,
                flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
                code: Some(code.clone()),
            });
        }

        let table = ApiTable::from_entries(vec![("Ljava/lang/Math;->addExact".to_owned(), 26)]);
        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default())
            .with_api(Arc::new(table));
        assert_eq!(ctx.options.min_api, 21);

        let app = Application::build(pools, vec![class], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);
        let builder = IrBuilder::new(app.pools(), &hierarchy);
        let flags = MethodFlags::PUBLIC | MethodFlags::STATIC;
        ctx.ir_bodies
            .insert(helper, builder.build(helper, flags, &helper_code).unwrap());
        let mut body = builder.build(caller, flags, &caller_code).unwrap();
        ctx.ir_bodies.insert(caller, body.clone());

        let changed = InlinerPass
            .run_on_method(&mut body, caller, &ctx, &app)
            .unwrap();
        assert!(!changed, "a newer platform reference pins the callee");
    }

    #[test]
    fn test_recursive_call_not_inlined() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Rec;").unwrap();
        let rec = pools.method(holder, "rec", wk.int, &[wk.int]);
        let code = StackCode::new(
            1,
            vec![
                StackOp::Load(0),
                StackOp::Invoke(InvokeKind::Static, rec),
                StackOp::Return,
            ],
        );
        let mut class = ClassDef::new(holder, ClassFlags::PUBLIC, Some(wk.object));
        class.methods.push(MethodDef {
            reference: rec,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(code.clone()),
        });
        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        let app = Application::build(pools, vec![class], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);
        let mut body = IrBuilder::new(app.pools(), &hierarchy)
            .build(rec, MethodFlags::PUBLIC | MethodFlags::STATIC, &code)
            .unwrap();
        ctx.ir_bodies.insert(rec, body.clone());

        let changed = InlinerPass.run_on_method(&mut body, rec, &ctx, &app).unwrap();
        assert!(!changed);
    }
}
