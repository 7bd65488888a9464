//! Original-to-final name mapping.
//!
//! Merging and renaming leave the output unreadable next to a stack
//! trace from the field. The mapping artifact records every identity
//! the lens changed, in the original program's order, so a crash in
//! `Lapp/A$$Holder$1a2b3c4d;->fb$1` can be traced back to `Lapp/B;->fb`.

use std::fmt::Write;

use crate::{
    model::{Application, FieldRef, MethodRef, Pools, Type},
    optimize::GraphLens,
};

/// The program's identities as they were before optimization.
///
/// Captured from the model right after the trace, while every class
/// still carries its input name.
#[derive(Debug, Default)]
pub struct MappingSnapshot {
    classes: Vec<ClassSnapshot>,
}

#[derive(Debug)]
struct ClassSnapshot {
    ty: Type,
    methods: Vec<MethodRef>,
    fields: Vec<FieldRef>,
}

impl MappingSnapshot {
    /// Records every program class and member reference.
    #[must_use]
    pub fn capture(app: &Application) -> Self {
        let classes = app
            .classes()
            .map(|class| ClassSnapshot {
                ty: class.ty,
                methods: class.methods.iter().map(|m| m.reference).collect(),
                fields: class.fields.iter().map(|f| f.reference).collect(),
            })
            .collect();
        Self { classes }
    }

    /// Renders the mapping for everything the lens changed.
    ///
    /// Returns `None` when nothing was renamed, merged or removed, so
    /// no artifact is emitted for a build where names survived intact.
    #[must_use]
    pub fn render(&self, lens: &GraphLens, pools: &Pools) -> Option<String> {
        if lens.is_identity() {
            return None;
        }
        let mut out = String::new();
        for class in &self.classes {
            let final_ty = lens.lookup_type(class.ty);
            let mut lines = Vec::new();

            for &field in &class.fields {
                let mapped = lens.lookup_field(field, pools);
                if mapped != field {
                    lines.push(format!(
                        "    {} -> {}",
                        pools.describe_field(field),
                        pools.describe_field(mapped)
                    ));
                }
            }
            for &method in &class.methods {
                let lookup = lens.lookup_method(method, pools);
                if lookup.target != method || !lookup.prototype.is_identity() {
                    lines.push(format!(
                        "    {} -> {}",
                        pools.describe_method(method),
                        pools.describe_method(lookup.target)
                    ));
                }
            }

            if final_ty == class.ty && lines.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "{} -> {}:",
                pools.types.descriptor(class.ty),
                pools.types.descriptor(final_ty)
            );
            for line in lines {
                let _ = writeln!(out, "{line}");
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::model::{ClassDef, ClassFlags, MethodDef, MethodFlags};
    use crate::optimize::{MethodMapping, PrototypeChanges};

    fn two_class_app() -> (Application, MethodRef, Type, Type) {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let a = pools.class_type("Lapp/A;").unwrap();
        let b = pools.class_type("Lapp/B;").unwrap();
        let fb = pools.method(b, "fb", wk.int, &[]);
        let mut class_b = ClassDef::new(b, ClassFlags::PUBLIC, Some(wk.object));
        class_b.methods.push(MethodDef {
            reference: fb,
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            code: None,
        });
        let class_a = ClassDef::new(a, ClassFlags::PUBLIC, Some(wk.object));
        let app = Application::build(Arc::clone(&pools), vec![class_a, class_b], Vec::new())
            .unwrap();
        (app, fb, a, b)
    }

    #[test]
    fn test_identity_lens_yields_no_artifact() {
        let (app, _, _, _) = two_class_app();
        let snapshot = MappingSnapshot::capture(&app);
        assert!(snapshot
            .render(&GraphLens::identity(), app.pools())
            .is_none());
    }

    #[test]
    fn test_merged_class_and_moved_method_rendered() {
        let (app, fb, a, b) = two_class_app();
        let pools = app.pools();
        let snapshot = MappingSnapshot::capture(&app);

        let wk = *pools.types.well_known();
        let moved = pools.method(a, "fb", wk.int, &[]);
        let lens = GraphLens::identity()
            .with_types(HashMap::from([(b, a)]))
            .with_methods(HashMap::from([(
                fb,
                MethodMapping {
                    target: moved,
                    prototype: PrototypeChanges::default(),
                },
            )]));

        let text = snapshot.render(&lens, pools).unwrap();
        assert!(text.contains("Lapp/B; -> Lapp/A;:"));
        assert!(text.contains("    Lapp/B;->fb()I -> Lapp/A;->fb()I"));
        assert!(!text.contains("Lapp/A; -> Lapp/A;:"));
    }
}
