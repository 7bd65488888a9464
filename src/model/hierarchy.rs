//! Explicit class hierarchy graph.
//!
//! Virtual dispatch is resolved as a graph query over this structure rather
//! than through any host-language dispatch: given a call site's static
//! receiver type and the set of instantiated classes, the hierarchy answers
//! which method definitions the call can reach.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::{Application, MethodRef, Type};

/// Immutable snapshot of the subtype graph over program and library types.
///
/// Built once after model construction; rebuilt only when class merging
/// changes the set of program types.
#[derive(Debug, Default)]
pub struct Hierarchy {
    /// Direct supertypes (superclass plus interfaces) per type.
    supertypes: HashMap<Type, Vec<Type>>,
    /// Direct subtypes per type, in canonical input order.
    subtypes: HashMap<Type, Vec<Type>>,
}

impl Hierarchy {
    /// Builds the hierarchy from the current application model.
    #[must_use]
    pub fn build(app: &Application) -> Self {
        let mut supertypes: HashMap<Type, Vec<Type>> = HashMap::new();
        let mut subtypes: HashMap<Type, Vec<Type>> = HashMap::new();

        fn record(
            supertypes: &mut HashMap<Type, Vec<Type>>,
            subtypes: &mut HashMap<Type, Vec<Type>>,
            ty: Type,
            supers: Vec<Type>,
        ) {
            for &sup in &supers {
                subtypes.entry(sup).or_default().push(ty);
            }
            supertypes.insert(ty, supers);
        }

        for class in app.classes() {
            let mut supers = Vec::with_capacity(1 + class.interfaces.len());
            supers.extend(class.superclass);
            supers.extend(class.interfaces.iter().copied());
            record(&mut supertypes, &mut subtypes, class.ty, supers);
        }
        for ty in app.class_types() {
            // Library supertype chains of program classes, transitively.
            let mut current = app.superclass_of(ty);
            while let Some(sup) = current {
                if supertypes.contains_key(&sup) {
                    break;
                }
                let Some(stub) = app.library_class(sup) else {
                    break;
                };
                let mut supers = Vec::with_capacity(1 + stub.interfaces.len());
                supers.extend(stub.superclass);
                supers.extend(stub.interfaces.iter().copied());
                let next = stub.superclass;
                record(&mut supertypes, &mut subtypes, sup, supers);
                current = next;
            }
        }

        Self {
            supertypes,
            subtypes,
        }
    }

    /// Returns `true` if `sub` is `sup` or a transitive subtype of it.
    #[must_use]
    pub fn is_subtype(&self, sub: Type, sup: Type) -> bool {
        if sub == sup {
            return true;
        }
        let mut queue = VecDeque::from([sub]);
        let mut seen = HashSet::new();
        while let Some(ty) = queue.pop_front() {
            let Some(supers) = self.supertypes.get(&ty) else {
                continue;
            };
            for &s in supers {
                if s == sup {
                    return true;
                }
                if seen.insert(s) {
                    queue.push_back(s);
                }
            }
        }
        false
    }

    /// All transitive subtypes of `ty`, excluding `ty` itself, in
    /// deterministic order.
    #[must_use]
    pub fn transitive_subtypes(&self, ty: Type) -> Vec<Type> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([ty]);
        while let Some(current) = queue.pop_front() {
            let Some(subs) = self.subtypes.get(&current) else {
                continue;
            };
            for &sub in subs {
                if seen.insert(sub) {
                    out.push(sub);
                    queue.push_back(sub);
                }
            }
        }
        out
    }

    /// Resolves the set of definitions a virtual call site can dispatch to,
    /// given the call's static receiver type and the instantiated classes
    /// known to liveness analysis.
    ///
    /// The result is deduplicated and deterministic. An empty result means
    /// dispatch escapes into library code.
    #[must_use]
    pub fn dispatch_targets(
        &self,
        receiver: Type,
        method: MethodRef,
        app: &Application,
        instantiated: &HashSet<Type>,
    ) -> Vec<MethodRef> {
        let mut targets = Vec::new();
        let mut candidates: Vec<Type> = Vec::new();
        candidates.push(receiver);
        candidates.extend(self.transitive_subtypes(receiver));

        for class_ty in candidates {
            if !instantiated.contains(&class_ty) {
                continue;
            }
            if let Some(target) = app.lookup_virtual_target(class_ty, method) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    /// Least-effort join of two reference types for phi typing: the first
    /// common superclass on `a`'s chain, or the root object type.
    #[must_use]
    pub fn join(&self, a: Type, b: Type, object: Type) -> Type {
        if a == b {
            return a;
        }
        let mut chain = HashSet::new();
        let mut current = Some(a);
        while let Some(ty) = current {
            chain.insert(ty);
            current = self
                .supertypes
                .get(&ty)
                .and_then(|supers| supers.first().copied());
        }
        let mut current = Some(b);
        while let Some(ty) = current {
            if chain.contains(&ty) {
                return ty;
            }
            current = self
                .supertypes
                .get(&ty)
                .and_then(|supers| supers.first().copied());
        }
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassDef, ClassFlags, MethodDef, MethodFlags, Pools};

    fn class_with_super(pools: &Pools, descriptor: &str, superclass: Option<Type>) -> ClassDef {
        let ty = pools.class_type(descriptor).unwrap();
        ClassDef::new(ty, ClassFlags::PUBLIC, superclass)
    }

    #[test]
    fn test_subtype_query() {
        let pools = Pools::new();
        let object = pools.types.well_known().object;
        let base = class_with_super(&pools, "Lapp/Base;", Some(object));
        let base_ty = base.ty;
        let derived = class_with_super(&pools, "Lapp/Derived;", Some(base_ty));
        let derived_ty = derived.ty;

        let app = Application::build(pools, vec![base, derived], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);

        assert!(hierarchy.is_subtype(derived_ty, base_ty));
        assert!(hierarchy.is_subtype(derived_ty, object));
        assert!(!hierarchy.is_subtype(base_ty, derived_ty));
        assert_eq!(hierarchy.transitive_subtypes(base_ty), vec![derived_ty]);
    }

    #[test]
    fn test_dispatch_respects_instantiation() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();

        let mut base = class_with_super(&pools, "Lapp/Base;", Some(wk.object));
        let base_run = pools.method(base.ty, "run", wk.void, &[]);
        base.methods.push(MethodDef {
            reference: base_run,
            flags: MethodFlags::PUBLIC,
            code: None,
        });
        let base_ty = base.ty;

        let mut derived = class_with_super(&pools, "Lapp/Derived;", Some(base_ty));
        let derived_run = pools.method(derived.ty, "run", wk.void, &[]);
        derived.methods.push(MethodDef {
            reference: derived_run,
            flags: MethodFlags::PUBLIC,
            code: None,
        });
        let derived_ty = derived.ty;

        let app = Application::build(pools, vec![base, derived], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);

        let only_base: HashSet<Type> = [base_ty].into();
        assert_eq!(
            hierarchy.dispatch_targets(base_ty, base_run, &app, &only_base),
            vec![base_run]
        );

        let both: HashSet<Type> = [base_ty, derived_ty].into();
        assert_eq!(
            hierarchy.dispatch_targets(base_ty, base_run, &app, &both),
            vec![base_run, derived_run]
        );

        // Static receiver narrows the candidate set.
        assert_eq!(
            hierarchy.dispatch_targets(derived_ty, derived_run, &app, &both),
            vec![derived_run]
        );
    }

    #[test]
    fn test_join_meets_at_common_super() {
        let pools = Pools::new();
        let object = pools.types.well_known().object;
        let base = class_with_super(&pools, "Lapp/Base;", Some(object));
        let base_ty = base.ty;
        let left = class_with_super(&pools, "Lapp/Left;", Some(base_ty));
        let right = class_with_super(&pools, "Lapp/Right;", Some(base_ty));
        let (left_ty, right_ty) = (left.ty, right.ty);

        let app = Application::build(pools, vec![base, left, right], Vec::new()).unwrap();
        let hierarchy = Hierarchy::build(&app);

        assert_eq!(hierarchy.join(left_ty, right_ty, object), base_ty);
        assert_eq!(hierarchy.join(left_ty, left_ty, object), left_ty);
    }
}
