//! Field value propagation.
//!
//! Two cooperating rewrites:
//!
//! - Static final fields whose value is a compile-time constant and
//!   that live code never writes are materialized as constants at their
//!   read sites.
//! - Within a block, a repeated read of the same field with no possible
//!   intervening write reuses the first read's value, and the repeated
//!   load is deleted. Loads that might throw may only be removed this
//!   way, when an identical earlier load proves they cannot.

use std::collections::HashMap;

use crate::{
    ir::{Instr, IrCode, ValueId},
    model::{Application, ConstValue, FieldFlags, FieldRef, MethodRef},
    optimize::{CompilerContext, IrPass},
    Result,
};

/// Propagates known field values into readers.
#[derive(Debug, Default)]
pub struct FieldValuePass {
    /// Static final fields with a known constant value, collected at
    /// initialization from class definitions.
    constants: HashMap<FieldRef, ConstValue>,
}

impl IrPass for FieldValuePass {
    fn name(&self) -> &'static str {
        "field-values"
    }

    fn initialize(&mut self, ctx: &CompilerContext, app: &Application) -> Result<()> {
        self.constants.clear();
        for class in app.classes() {
            for field in &class.fields {
                let is_final_static = field
                    .flags
                    .contains(FieldFlags::STATIC | FieldFlags::FINAL);
                if !is_final_static {
                    continue;
                }
                // A write anywhere in live code disqualifies the field;
                // <clinit> assignments surface through static_value.
                if ctx.facts.fields_written.contains(&field.reference) {
                    continue;
                }
                if let Some(value) = field.static_value {
                    self.constants.insert(field.reference, value);
                }
            }
        }
        Ok(())
    }

    fn run_on_method(
        &self,
        body: &mut IrCode,
        _method: MethodRef,
        _ctx: &CompilerContext,
        _app: &Application,
    ) -> Result<bool> {
        let mut changed = false;
        changed |= self.materialize_constants(body);
        changed |= forward_field_loads(body);
        Ok(changed)
    }
}

impl FieldValuePass {
    fn materialize_constants(&self, body: &mut IrCode) -> bool {
        let mut changed = false;
        for block in body.blocks_mut() {
            for instr in &mut block.instrs {
                let Instr::StaticGet { dest, field } = *instr else {
                    continue;
                };
                let Some(value) = self.constants.get(&field) else {
                    continue;
                };
                *instr = match *value {
                    ConstValue::Int(value) => Instr::ConstInt { dest, value },
                    ConstValue::String(value) => Instr::ConstString { dest, value },
                    ConstValue::Null => Instr::ConstNull { dest },
                };
                changed = true;
            }
        }
        changed
    }
}

/// Key for one available field value: the field plus the receiver for
/// instance reads.
type FieldKey = (FieldRef, Option<ValueId>);

fn forward_field_loads(body: &mut IrCode) -> bool {
    let mut replacements: Vec<(ValueId, ValueId)> = Vec::new();

    for block in body.blocks_mut() {
        let mut available: HashMap<FieldKey, ValueId> = HashMap::new();
        let mut delete: Vec<usize> = Vec::new();
        for (index, instr) in block.instrs.iter().enumerate() {
            match *instr {
                Instr::StaticGet { dest, field } => {
                    match available.get(&(field, None)) {
                        Some(&known) => {
                            replacements.push((dest, known));
                            delete.push(index);
                        }
                        None => {
                            available.insert((field, None), dest);
                        }
                    }
                }
                Instr::InstanceGet {
                    dest,
                    field,
                    object,
                } => match available.get(&(field, Some(object))) {
                    Some(&known) => {
                        replacements.push((dest, known));
                        delete.push(index);
                    }
                    None => {
                        available.insert((field, Some(object)), dest);
                    }
                },
                Instr::StaticPut { field, value } => {
                    // Store-to-load forwarding for the same field; other
                    // receivers of this field may alias, so drop them.
                    available.retain(|&(f, _), _| f != field);
                    available.insert((field, None), value);
                }
                Instr::InstancePut {
                    field,
                    object,
                    value,
                } => {
                    available.retain(|&(f, _), _| f != field);
                    available.insert((field, Some(object)), value);
                }
                Instr::Invoke { .. }
                | Instr::MonitorEnter { .. }
                | Instr::MonitorExit { .. } => {
                    // Anything behind a call or a fence may have changed.
                    available.clear();
                }
                _ => {}
            }
        }
        for index in delete.into_iter().rev() {
            block.instrs.remove(index);
        }
    }

    let changed = !replacements.is_empty();
    for (from, to) in replacements {
        body.replace_uses(from, to);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{StackCode, StackOp};
    use crate::ir::IrBuilder;
    use crate::model::{
        Application, ClassDef, ClassFlags, FieldDef, Hierarchy, MethodFlags, Pools,
    };
    use crate::options::CompileOptions;
    use std::sync::Arc;

    fn fixture() -> (Application, CompilerContext, FieldRef, MethodRef) {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Config;").unwrap();
        let field = pools.field(holder, "LIMIT", wk.int);
        let method = pools.method(holder, "read", wk.int, &[]);

        let mut class = ClassDef::new(holder, ClassFlags::PUBLIC, Some(wk.object));
        class.fields.push(FieldDef {
            reference: field,
            flags: FieldFlags::PUBLIC | FieldFlags::STATIC | FieldFlags::FINAL,
            static_value: Some(ConstValue::Int(99)),
        });
        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        let app = Application::build(pools, vec![class], Vec::new()).unwrap();
        (app, ctx, field, method)
    }

    fn body_reading_field(app: &Application, field: FieldRef, method: MethodRef) -> IrCode {
        let hierarchy = Hierarchy::build(app);
        IrBuilder::new(app.pools(), &hierarchy)
            .build(
                method,
                MethodFlags::PUBLIC | MethodFlags::STATIC,
                &StackCode::new(0, vec![StackOp::GetStatic(field), StackOp::Return]),
            )
            .unwrap()
    }

    #[test]
    fn test_final_static_constant_materialized() {
        let (app, ctx, field, method) = fixture();
        let mut body = body_reading_field(&app, field, method);

        let mut pass = FieldValuePass::default();
        pass.initialize(&ctx, &app).unwrap();
        assert!(pass.run_on_method(&mut body, method, &ctx, &app).unwrap());

        let materialized = body
            .instructions()
            .any(|(_, i)| matches!(i, Instr::ConstInt { value: 99, .. }));
        assert!(materialized);
    }

    #[test]
    fn test_written_field_not_propagated() {
        let (app, ctx, field, method) = fixture();
        let mut body = body_reading_field(&app, field, method);

        // A surviving write anywhere blocks propagation.
        ctx.facts.fields_written.insert(field);
        let mut pass = FieldValuePass::default();
        pass.initialize(&ctx, &app).unwrap();
        assert!(!pass.run_on_method(&mut body, method, &ctx, &app).unwrap());
    }

    #[test]
    fn test_repeated_load_forwarded() {
        let (app, ctx, field, method) = fixture();
        ctx.facts.fields_written.insert(field); // keep constants out of the way
        let hierarchy = Hierarchy::build(&app);
        let mut body = IrBuilder::new(app.pools(), &hierarchy)
            .build(
                method,
                MethodFlags::PUBLIC | MethodFlags::STATIC,
                &StackCode::new(
                    0,
                    vec![
                        StackOp::GetStatic(field),
                        StackOp::Pop,
                        StackOp::GetStatic(field),
                        StackOp::Return,
                    ],
                ),
            )
            .unwrap();

        let mut pass = FieldValuePass::default();
        pass.initialize(&ctx, &app).unwrap();
        assert!(pass.run_on_method(&mut body, method, &ctx, &app).unwrap());

        let loads = body
            .instructions()
            .filter(|(_, i)| matches!(i, Instr::StaticGet { .. }))
            .count();
        assert_eq!(loads, 1);
    }
}
