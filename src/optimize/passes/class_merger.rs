//! Static class merging.
//!
//! Classes that exist only as namespaces for static members carry a
//! whole class definition each into the output. Folding them into a
//! synthetic holder removes that overhead. Merged members keep their
//! bodies; every reference to a moved item resolves through the lens
//! layer this pass appends, so no other method is touched here. The
//! holder itself enters the model at the next wave boundary.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{
    model::{Application, ClassDef, ClassFlags, MethodFlags, MethodRef, Pools, Type},
    optimize::{CompilerContext, IrPass, MethodMapping, PrototypeChanges},
    synthetic::SyntheticItems,
    Result,
};

/// Merges static-only, unkept classes into a synthetic holder.
#[derive(Debug, Default)]
pub struct ClassMergerPass {
    /// Set once; merging twice would just churn names.
    merged: bool,
}

impl IrPass for ClassMergerPass {
    fn name(&self) -> &'static str {
        "class-merger"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn run_global(&mut self, ctx: &CompilerContext, app: &mut Application) -> Result<bool> {
        if !ctx.options.enable_class_merging || self.merged {
            return Ok(false);
        }
        self.merged = true;

        let candidates = self.candidates(ctx, app);
        if candidates.len() < 2 {
            return Ok(false);
        }

        let pools = &ctx.pools;
        // The holder name hashes over the full absorbed set, so the
        // same input folds into the same holder on every build.
        let content: String = candidates
            .iter()
            .map(|&ty| pools.types.descriptor(ty))
            .collect();
        let descriptor =
            SyntheticItems::descriptor_for(pools, candidates[0], "Holder", &content);

        let mut method_map: HashMap<MethodRef, MethodMapping> = HashMap::new();
        let mut field_map = HashMap::new();

        let object = pools.types.well_known().object;
        let holder = ctx.synthetics.register(pools, &*app, &descriptor, |ty| {
            let mut class = ClassDef::new(
                ty,
                ClassFlags::PUBLIC | ClassFlags::FINAL | ClassFlags::SYNTHETIC,
                Some(object),
            );
            // Signatures already claimed in the holder, for
            // collision-free renaming of moved members.
            let mut taken: HashSet<String> = HashSet::new();
            for &source in &candidates {
                let Some(def) = app.class(source) else {
                    continue;
                };
                for method in def.methods.clone() {
                    let new_ref = relocated_method(pools, method.reference, ty, &mut taken);
                    method_map.insert(
                        method.reference,
                        MethodMapping {
                            target: new_ref,
                            prototype: PrototypeChanges::default(),
                        },
                    );
                    let mut moved = method;
                    moved.reference = new_ref;
                    class.methods.push(moved);
                }
                for field in def.fields.clone() {
                    let data = *pools.field_data(field.reference);
                    let name = pools.strings.get(data.name).to_owned();
                    let new_ref = pools.field(ty, &name, data.ty);
                    field_map.insert(field.reference, new_ref);
                    let mut moved = field;
                    moved.reference = new_ref;
                    class.fields.push(moved);
                }
            }
            class
        })?;
        debug!(
            count = candidates.len(),
            into = pools.types.descriptor(holder),
            "merging static-only classes"
        );

        let type_map: HashMap<Type, Type> =
            candidates.iter().map(|&source| (source, holder)).collect();
        let absorbed: HashSet<Type> = candidates.iter().copied().collect();
        app.retain_classes(|class| !absorbed.contains(&class.ty));

        // Bodies follow their methods; in-body references keep the old
        // identities and resolve through the lens.
        for (old, mapping) in &method_map {
            if let Some((_, body)) = ctx.ir_bodies.remove(old) {
                let mut body = body;
                body.method = mapping.target;
                ctx.ir_bodies.insert(mapping.target, body);
            }
            if ctx.facts.live_methods.remove(old).is_some() {
                ctx.facts.live_methods.insert(mapping.target);
            }
        }
        for (old, new) in &field_map {
            if ctx.facts.fields_read.remove(old).is_some() {
                ctx.facts.fields_read.insert(*new);
            }
            if ctx.facts.fields_written.remove(old).is_some() {
                ctx.facts.fields_written.insert(*new);
            }
        }

        // Member layers go in before the type layer. Layers resolve
        // oldest first, and the member maps are keyed by pre-merge
        // references; a type layer underneath them would re-intern
        // those references against the holder before the maps are
        // consulted, losing every collision rename.
        let lens = ctx
            .lens()?
            .with_methods(method_map)
            .with_fields(field_map)
            .with_types(type_map);
        ctx.publish_lens(lens)?;
        Ok(true)
    }
}

impl ClassMergerPass {
    /// Static-only, uninstantiated, unkept leaf classes, in canonical
    /// order. The first is the merge target.
    fn candidates(&self, ctx: &CompilerContext, app: &Application) -> Vec<Type> {
        let pools = &ctx.pools;
        let mut out = Vec::new();
        for class in app.classes() {
            if class.is_interface() || class.is_enum() {
                continue;
            }
            if ctx.facts.pinned.contains(&class.ty)
                || ctx.facts.instantiated.contains(&class.ty)
            {
                continue;
            }
            if class.superclass != Some(pools.types.well_known().object) {
                continue;
            }
            let all_static = class
                .methods
                .iter()
                .all(|m| m.flags.contains(MethodFlags::STATIC))
                && class
                    .fields
                    .iter()
                    .all(|f| f.flags.contains(crate::model::FieldFlags::STATIC));
            if !all_static {
                continue;
            }
            // A live class initializer has ordering semantics tied to
            // the class identity; merging would change when it runs.
            let has_clinit = class
                .methods
                .iter()
                .any(|m| pools.method_name(m.reference) == "<clinit>");
            if has_clinit {
                continue;
            }
            out.push(class.ty);
        }
        out
    }
}

/// Re-interns a method under the new holder, renaming on collision.
fn relocated_method(
    pools: &Pools,
    method: MethodRef,
    holder: Type,
    taken: &mut HashSet<String>,
) -> MethodRef {
    let data = *pools.method_data(method);
    let proto = pools.protos.get(data.proto).clone();
    let base = pools.strings.get(data.name).to_owned();

    let mut name = base.clone();
    let mut suffix = 1;
    loop {
        let key = format!("{}{}", name, proto.shorty);
        if taken.insert(key) {
            break;
        }
        name = format!("{base}${suffix}");
        suffix += 1;
    }
    pools.method(holder, &name, proto.return_type, &proto.parameters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{StackCode, StackOp};
    use crate::model::{ClassDef, ClassFlags, MethodDef, Phase, Pools};
    use crate::options::CompileOptions;
    use std::sync::Arc;

    fn static_class(pools: &Pools, descriptor: &str, method_name: &str) -> (ClassDef, MethodRef) {
        let wk = *pools.types.well_known();
        let ty = pools.class_type(descriptor).unwrap();
        let method = pools.method(ty, method_name, wk.int, &[]);
        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        class.methods.push(MethodDef {
            reference: method,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: Some(StackCode::new(
                0,
                vec![StackOp::PushInt(1), StackOp::Return],
            )),
        });
        (class, method)
    }

    #[test]
    fn test_static_only_classes_fold_into_one() {
        let pools = Pools::new();
        let (a, method_a) = static_class(&pools, "Lapp/A;", "fa");
        let (b, method_b) = static_class(&pools, "Lapp/B;", "fb");
        let a_ty = a.ty;
        let b_ty = b.ty;

        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        let mut app = Application::build(pools, vec![a, b], Vec::new()).unwrap();
        app.set_phase(Phase::Optimization);

        let mut pass = ClassMergerPass::default();
        assert!(pass.run_global(&ctx, &mut app).unwrap());

        // Both sources are gone; the holder is pending until the wave
        // boundary commits it.
        assert_eq!(app.class_count(), 0);
        assert_eq!(ctx.synthetics.pending_count(), 1);
        assert_eq!(ctx.synthetics.commit(&mut app).unwrap(), 1);
        assert_eq!(app.class_count(), 1);

        let lens = ctx.lens().unwrap();
        let holder = lens.lookup_type(a_ty);
        assert_ne!(holder, a_ty);
        assert_eq!(lens.lookup_type(b_ty), holder);
        assert!(ctx
            .pools
            .types
            .descriptor(holder)
            .starts_with("Lapp/A$$Holder$"));

        let holder_class = app.class(holder).unwrap();
        assert!(holder_class.flags.contains(ClassFlags::SYNTHETIC));
        assert_eq!(holder_class.methods.len(), 2);

        for method in [method_a, method_b] {
            let moved = lens.lookup_method(method, &ctx.pools).target;
            assert_eq!(ctx.pools.method_data(moved).holder, holder);
        }
    }

    #[test]
    fn test_name_collision_renamed() {
        let pools = Pools::new();
        let (a, method_a) = static_class(&pools, "Lapp/A;", "get");
        let (b, method_b) = static_class(&pools, "Lapp/B;", "get");
        let a_ty = a.ty;

        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        let mut app = Application::build(pools, vec![a, b], Vec::new()).unwrap();
        app.set_phase(Phase::Optimization);

        let mut pass = ClassMergerPass::default();
        assert!(pass.run_global(&ctx, &mut app).unwrap());

        let lens = ctx.lens().unwrap();
        let holder = lens.lookup_type(a_ty);
        let kept = lens.lookup_method(method_a, &ctx.pools).target;
        assert_eq!(ctx.pools.method_name(kept), "get");
        let moved = lens.lookup_method(method_b, &ctx.pools).target;
        let data = ctx.pools.method_data(moved);
        assert_eq!(data.holder, holder);
        assert_eq!(ctx.pools.strings.get(data.name), "get$1");
    }

    #[test]
    fn test_instantiated_class_kept_apart() {
        let pools = Pools::new();
        let (a, _) = static_class(&pools, "Lapp/A;", "fa");
        let (b, _) = static_class(&pools, "Lapp/B;", "fb");
        let b_ty = b.ty;

        let ctx = CompilerContext::new(Arc::clone(&pools), CompileOptions::default());
        ctx.facts.instantiated.insert(b_ty);
        let mut app = Application::build(pools, vec![a, b], Vec::new()).unwrap();
        app.set_phase(Phase::Optimization);

        let mut pass = ClassMergerPass::default();
        assert!(!pass.run_global(&ctx, &mut app).unwrap());
        assert_eq!(app.class_count(), 2);
    }
}
