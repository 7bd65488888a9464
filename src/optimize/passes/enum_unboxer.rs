//! Enum unboxing.
//!
//! An enum class whose values never escape its closed protocol is an
//! expensive way to spell an integer. This pass proves that for each
//! candidate by scanning every live body, then rewrites the protocol:
//! constant loads become ordinal constants, `ordinal()` and
//! `hashCode()` collapse to their receiver, `equals()` becomes an int
//! compare, `name()`/`toString()` on a known constant becomes a string
//! constant, enum arrays become int arrays, flowing values retype to
//! `int` and the class is removed. Any use outside the allowed set
//! disqualifies the candidate; correctness never depends on the proof
//! succeeding.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    bytecode::{BinaryOp, IfCond},
    ir::{Instr, IrCode, ValueId},
    model::{Application, FieldFlags, FieldRef, MethodRef, Type},
    optimize::{CompilerContext, IrPass},
    Result,
};

/// Replaces provably-closed enums with integer ordinals.
#[derive(Debug, Default)]
pub struct EnumUnboxerPass;

impl IrPass for EnumUnboxerPass {
    fn name(&self) -> &'static str {
        "enum-unboxer"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn run_global(&mut self, ctx: &CompilerContext, app: &mut Application) -> Result<bool> {
        if !ctx.options.enable_enum_unboxing {
            return Ok(false);
        }
        let mut changed = false;
        for candidate in candidates(ctx, app) {
            let Some(ordinals) = prove_unboxable(candidate, ctx, app) else {
                continue;
            };
            debug!(
                class = ctx.pools.types.descriptor(candidate),
                constants = ordinals.len(),
                "unboxing enum"
            );
            unbox(candidate, &ordinals, ctx, app)?;
            changed = true;
        }
        Ok(changed)
    }
}

/// Program enum classes extending the library enum root, neither pinned
/// nor instantiated outside their own initializer.
fn candidates(ctx: &CompilerContext, app: &Application) -> Vec<Type> {
    app.classes()
        .filter(|class| {
            class.is_enum()
                && !ctx.facts.pinned.contains(&class.ty)
                && class
                    .superclass
                    .is_some_and(|s| ctx.pools.types.descriptor(s) == "Ljava/lang/Enum;")
                && class.interfaces.is_empty()
        })
        .map(|class| class.ty)
        .collect()
}

/// The ordinal of each enum constant, in declaration order.
fn constant_ordinals(enum_ty: Type, app: &Application) -> HashMap<FieldRef, i32> {
    let mut ordinals = HashMap::new();
    if let Some(class) = app.class(enum_ty) {
        let mut next = 0i32;
        for field in &class.fields {
            if field.flags.contains(FieldFlags::ENUM) {
                ordinals.insert(field.reference, next);
                next += 1;
            }
        }
    }
    ordinals
}

/// Checks every live body outside the enum itself for disallowed uses.
/// Returns the ordinal table when the enum is closed.
fn prove_unboxable(
    enum_ty: Type,
    ctx: &CompilerContext,
    app: &Application,
) -> Option<HashMap<FieldRef, i32>> {
    let ordinals = constant_ordinals(enum_ty, app);
    if ordinals.is_empty() {
        return None;
    }
    for entry in ctx.ir_bodies.iter() {
        let holder = ctx.pools.method_data(*entry.key()).holder;
        if holder == enum_ty {
            continue; // removed with the class
        }
        if !body_stays_closed(entry.value(), enum_ty, &ordinals, ctx) {
            return None;
        }
    }
    Some(ordinals)
}

/// Whether a type is the enum or carries it inside an array.
fn involves(ctx: &CompilerContext, ty: Type, enum_ty: Type) -> bool {
    let mut current = ty;
    loop {
        if current == enum_ty {
            return true;
        }
        match ctx.pools.types.element_of(current) {
            Ok(Some(element)) => current = element,
            _ => return false,
        }
    }
}

/// Whether a call targets the enum's own surface or its library roots.
fn targets_enum_api(ctx: &CompilerContext, holder: Type, enum_ty: Type) -> bool {
    holder == enum_ty
        || matches!(
            ctx.pools.types.descriptor(holder),
            "Ljava/lang/Enum;" | "Ljava/lang/Object;"
        )
}

/// Values defined by a constant load of this enum, per body.
fn constant_defs(body: &IrCode, ordinals: &HashMap<FieldRef, i32>) -> HashMap<ValueId, FieldRef> {
    body.instructions()
        .filter_map(|(_, instr)| match instr {
            Instr::StaticGet { dest, field } if ordinals.contains_key(field) => {
                Some((*dest, *field))
            }
            _ => None,
        })
        .collect()
}

/// An `equals` result can only be rewritten to an int compare when
/// every use is a zero test whose sense the rewrite can flip.
fn result_only_zero_tested(body: &IrCode, dest: Option<ValueId>) -> bool {
    // A result-less call cannot be rewritten into a compare.
    let Some(dest) = dest else {
        return false;
    };
    for block in body.blocks() {
        if block
            .phis
            .iter()
            .any(|phi| phi.operands.iter().any(|&(_, v)| v == dest))
        {
            return false;
        }
    }
    body.instructions()
        .filter(|(_, instr)| instr.uses().contains(&dest))
        .all(|(_, instr)| {
            matches!(
                instr,
                Instr::If {
                    rhs: None,
                    cond: IfCond::Eq | IfCond::Ne,
                    ..
                }
            )
        })
}

fn body_stays_closed(
    body: &IrCode,
    enum_ty: Type,
    ordinals: &HashMap<FieldRef, i32>,
    ctx: &CompilerContext,
) -> bool {
    let constants = constant_defs(body, ordinals);
    for (_, instr) in body.instructions() {
        let uses_enum = instr
            .uses()
            .into_iter()
            .any(|v| involves(ctx, body.value_type(v), enum_ty));
        match instr {
            // Loading a constant is the entry point of every allowed use.
            Instr::StaticGet { field, .. } if ordinals.contains_key(field) => {}
            Instr::StaticGet { field, .. } | Instr::StaticPut { field, .. }
                if ctx.pools.field_data(*field).holder == enum_ty =>
            {
                return false;
            }
            // Identity comparison of two enum values.
            Instr::If { .. } => {}
            Instr::Move { .. } => {}
            // Enum arrays become int arrays; the element accesses
            // survive the rewrite untouched.
            Instr::NewArray { ty, .. } if involves(ctx, *ty, enum_ty) => {}
            Instr::ArrayGet { array, .. } | Instr::ArrayLength { array, .. }
                if involves(ctx, body.value_type(*array), enum_ty) => {}
            Instr::ArrayPut { array, .. }
                if involves(ctx, body.value_type(*array), enum_ty) => {}
            Instr::Invoke {
                dest, method, args, ..
            } => {
                let data = ctx.pools.method_data(*method);
                let name = ctx.pools.strings.get(data.name);
                let receiver_is_enum = args
                    .first()
                    .is_some_and(|&a| body.value_type(a) == enum_ty);
                let on_enum = targets_enum_api(ctx, data.holder, enum_ty) && receiver_is_enum;
                let allowed = match (name, args.len()) {
                    ("ordinal" | "hashCode", 1) => on_enum,
                    ("equals", 2) => {
                        on_enum
                            && body.value_type(args[1]) == enum_ty
                            && result_only_zero_tested(body, *dest)
                    }
                    // The receiver must be a known constant so the
                    // result collapses to a string literal.
                    ("name" | "toString", 1) => on_enum && constants.contains_key(&args[0]),
                    _ => false,
                };
                if uses_enum && !allowed {
                    return false;
                }
            }
            _ if uses_enum => return false,
            _ => {}
        }
        // A fresh instance outside the enum means reflection or a
        // malformed model either way.
        if let Instr::NewInstance { ty, .. } = instr {
            if *ty == enum_ty {
                return false;
            }
        }
    }
    // Phi merges of enum values are fine; they become int phis.
    true
}

/// Applies the rewrite to every live body and removes the class.
fn unbox(
    enum_ty: Type,
    ordinals: &HashMap<FieldRef, i32>,
    ctx: &CompilerContext,
    app: &mut Application,
) -> Result<()> {
    let int_ty = ctx.pools.types.well_known().int;

    let methods: Vec<MethodRef> = ctx.ir_bodies.iter().map(|e| *e.key()).collect();
    for method in methods {
        let holder = ctx.pools.method_data(method).holder;
        if holder == enum_ty {
            ctx.ir_bodies.remove(&method);
            ctx.facts.live_methods.remove(&method);
            continue;
        }
        let Some((_, mut body)) = ctx.ir_bodies.remove(&method) else {
            continue;
        };
        rewrite_body(&mut body, enum_ty, ordinals, ctx, int_ty)?;
        ctx.ir_bodies.insert(method, body);
    }

    app.retain_classes(|class| class.ty != enum_ty);
    let lens = ctx
        .lens()?
        .with_types(HashMap::from([(enum_ty, int_ty)]));
    ctx.publish_lens(lens)
}

/// The int rendition of a type touched by the unboxed enum: the enum
/// itself becomes `int`, enum arrays become int arrays of the same
/// dimension, everything else is left alone.
fn unboxed_type(
    ctx: &CompilerContext,
    ty: Type,
    enum_ty: Type,
    int_ty: Type,
) -> Result<Option<Type>> {
    if ty == enum_ty {
        return Ok(Some(int_ty));
    }
    let types = &ctx.pools.types;
    match types
        .descriptor(ty)
        .strip_suffix(types.descriptor(enum_ty))
    {
        Some(dims) if !dims.is_empty() && dims.bytes().all(|b| b == b'[') => {
            Ok(Some(types.intern(&format!("{dims}I"))?))
        }
        _ => Ok(None),
    }
}

/// Flips the sense of every zero test reading `value`. Used when a
/// rewrite turns "nonzero means true" into "zero means equal".
fn flip_zero_tests(body: &mut IrCode, value: ValueId) {
    for block in body.block_ids().collect::<Vec<_>>() {
        for instr in &mut body.block_mut(block).instrs {
            if let Instr::If {
                cond,
                lhs,
                rhs: None,
                ..
            } = instr
            {
                if *lhs == value {
                    *cond = match *cond {
                        IfCond::Eq => IfCond::Ne,
                        _ => IfCond::Eq,
                    };
                }
            }
        }
    }
}

fn rewrite_body(
    body: &mut IrCode,
    enum_ty: Type,
    ordinals: &HashMap<FieldRef, i32>,
    ctx: &CompilerContext,
    int_ty: Type,
) -> Result<()> {
    // Calls first; the name()/toString() rewrite needs the defining
    // constant load before it collapses to a plain int.
    let constants = constant_defs(body, ordinals);
    let mut collapse = Vec::new();
    let mut to_string = Vec::new();
    let mut to_compare = Vec::new();
    for (block, instr) in body.instructions() {
        let Instr::Invoke {
            dest: Some(dest),
            method,
            args,
            ..
        } = instr
        else {
            continue;
        };
        let data = ctx.pools.method_data(*method);
        if !targets_enum_api(ctx, data.holder, enum_ty)
            || args.first().is_none_or(|&a| body.value_type(a) != enum_ty)
        {
            continue;
        }
        match (ctx.pools.strings.get(data.name), args.len()) {
            ("ordinal" | "hashCode", 1) => collapse.push((block, *dest, args[0])),
            ("name" | "toString", 1) => {
                if let Some(field) = constants.get(&args[0]) {
                    let name = ctx.pools.field_data(*field).name;
                    to_string.push((block, *dest, name));
                }
            }
            ("equals", 2) if body.value_type(args[1]) == enum_ty => {
                to_compare.push((block, *dest, args[0], args[1]));
            }
            _ => {}
        }
    }
    for (block, dest, receiver) in collapse {
        body.block_mut(block).instrs.retain(|i| i.dest() != Some(dest));
        body.replace_uses(dest, receiver);
    }
    for (block, dest, name) in to_string {
        for instr in &mut body.block_mut(block).instrs {
            if instr.dest() == Some(dest) {
                *instr = Instr::ConstString { dest, value: name };
            }
        }
    }
    for (block, dest, lhs, rhs) in to_compare {
        for instr in &mut body.block_mut(block).instrs {
            if instr.dest() == Some(dest) {
                *instr = Instr::Binary {
                    dest,
                    op: BinaryOp::Xor,
                    lhs,
                    rhs,
                };
            }
        }
        // Zero now means equal, so the consuming tests invert.
        flip_zero_tests(body, dest);
        body.set_value_type(dest, int_ty);
    }

    // Constant loads become ordinal constants.
    for block in body.block_ids().collect::<Vec<_>>() {
        for instr in &mut body.block_mut(block).instrs {
            if let Instr::StaticGet { dest, field } = *instr {
                if let Some(&ordinal) = ordinals.get(&field) {
                    *instr = Instr::ConstInt {
                        dest,
                        value: ordinal,
                    };
                }
            }
        }
    }

    // Allocations of enum arrays become int array allocations.
    for block in body.block_ids().collect::<Vec<_>>() {
        for instr in &mut body.block_mut(block).instrs {
            if let Instr::NewArray { ty, .. } = instr {
                if let Some(rewritten) = unboxed_type(ctx, *ty, enum_ty, int_ty)? {
                    *ty = rewritten;
                }
            }
        }
    }

    // Everything still typed as the enum (or an array of it) is now int.
    for value in body.value_ids() {
        if let Some(rewritten) = unboxed_type(ctx, body.value_type(value), enum_ty, int_ty)? {
            body.set_value_type(value, rewritten);
        }
    }
    Ok(())
}
