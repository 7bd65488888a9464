//! The application: all program and library classes of one compilation.
//!
//! This is the substrate every other component reads and rewrites. Lookup by
//! reference is O(1) expected; iteration over program classes follows the
//! canonical input order deterministically across runs.
//!
//! # Mutation phases
//!
//! The application moves through three phases:
//!
//! - [`Phase::Analysis`] - read-only; the whole-program trace runs here
//! - [`Phase::Optimization`] - structural mutation allowed at wave
//!   boundaries (each rayon task owns only its own method's IR; class-level
//!   mutation is sequential)
//! - [`Phase::Frozen`] - read-only again; encoding consumes the final model
//!
//! Mutating accessors assert the phase in debug builds.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    model::{ClassDef, FieldDef, FieldRef, LibraryClass, MethodDef, MethodRef, Pools},
    Error, Result,
};

/// Mutation phase of the application model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Read-only; whole-program analysis in progress.
    Analysis,
    /// Structural mutation permitted between optimization waves.
    Optimization,
    /// Read-only; ready for encoding.
    Frozen,
}

/// Outcome of resolving a member reference against the hierarchy.
///
/// Distinguishes the *known-missing* case (library or undefined holder:
/// a normal outcome, callers treat the target as opaque) from definitions
/// the program actually provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Resolved to a program definition; the reference names the defining
    /// class, which may be a supertype of the queried holder.
    Program(MethodRef),
    /// Resolved into library code; opaque to optimization.
    Library,
    /// No definition in the model. Conservatively opaque.
    Unknown,
}

/// The in-memory program model for one compilation run.
pub struct Application {
    pools: Arc<Pools>,
    classes: Vec<ClassDef>,
    class_index: HashMap<crate::model::Type, usize>,
    library: HashMap<crate::model::Type, LibraryClass>,
    phase: Phase,
}

impl Application {
    /// Builds the application from input definitions.
    ///
    /// # Errors
    ///
    /// [`Error::Empty`] when no program classes were provided;
    /// [`Error::DuplicateType`] when two inputs define the same type;
    /// [`Error::Malformed`] when the superclass graph contains a cycle.
    pub fn build(
        pools: Arc<Pools>,
        classes: Vec<ClassDef>,
        library: Vec<LibraryClass>,
    ) -> Result<Self> {
        if classes.is_empty() {
            return Err(Error::Empty);
        }

        let mut class_index = HashMap::with_capacity(classes.len());
        for (position, class) in classes.iter().enumerate() {
            if class_index.insert(class.ty, position).is_some() {
                return Err(Error::DuplicateType(
                    pools.types.descriptor(class.ty).to_string(),
                ));
            }
        }

        let mut library_index = HashMap::with_capacity(library.len());
        for stub in library {
            library_index.insert(stub.ty, stub);
        }

        // Chain walks throughout the compiler assume the superclass
        // graph is acyclic; cyclic input is rejected here, once.
        let superclass_of = |ty: crate::model::Type| {
            class_index
                .get(&ty)
                .map(|&position| classes[position].superclass)
                .or_else(|| library_index.get(&ty).map(|stub| stub.superclass))
                .flatten()
        };
        let mut verified: HashSet<crate::model::Type> = HashSet::new();
        for class in &classes {
            let mut seen = Vec::new();
            let mut current = Some(class.ty);
            while let Some(ty) = current {
                if verified.contains(&ty) {
                    break;
                }
                if seen.contains(&ty) {
                    return Err(malformed_error!(
                        "superclass cycle through {}",
                        pools.types.descriptor(ty)
                    ));
                }
                seen.push(ty);
                current = superclass_of(ty);
            }
            verified.extend(seen);
        }

        Ok(Self {
            pools,
            classes,
            class_index,
            library: library_index,
            phase: Phase::Analysis,
        })
    }

    /// The interning pools of this compilation.
    #[must_use]
    pub fn pools(&self) -> &Arc<Pools> {
        &self.pools
    }

    /// Current mutation phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Advances the mutation phase.
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Program classes in canonical input order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.classes.iter()
    }

    /// Program class types in canonical input order.
    pub fn class_types(&self) -> impl Iterator<Item = crate::model::Type> + '_ {
        self.classes.iter().map(|c| c.ty)
    }

    /// Number of program classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Looks up a program class definition.
    #[must_use]
    pub fn class(&self, ty: crate::model::Type) -> Option<&ClassDef> {
        self.class_index.get(&ty).map(|&i| &self.classes[i])
    }

    /// Looks up a program class definition for mutation.
    pub fn class_mut(&mut self, ty: crate::model::Type) -> Option<&mut ClassDef> {
        debug_assert_eq!(self.phase, Phase::Optimization, "model is read-only");
        self.class_index.get(&ty).map(|&i| &mut self.classes[i])
    }

    /// Looks up a library stub.
    #[must_use]
    pub fn library_class(&self, ty: crate::model::Type) -> Option<&LibraryClass> {
        self.library.get(&ty)
    }

    /// Returns `true` if `ty` is defined by the program.
    #[must_use]
    pub fn is_program_type(&self, ty: crate::model::Type) -> bool {
        self.class_index.contains_key(&ty)
    }

    /// Superclass of `ty` across program and library definitions.
    #[must_use]
    pub fn superclass_of(&self, ty: crate::model::Type) -> Option<crate::model::Type> {
        if let Some(class) = self.class(ty) {
            class.superclass
        } else {
            self.library.get(&ty).and_then(|stub| stub.superclass)
        }
    }

    /// Adds a class to the model (synthetic commit point).
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateType`] if the type is already defined.
    pub fn add_class(&mut self, class: ClassDef) -> Result<()> {
        debug_assert_eq!(self.phase, Phase::Optimization, "model is read-only");
        if self.class_index.contains_key(&class.ty) || self.library.contains_key(&class.ty) {
            return Err(Error::DuplicateType(
                self.pools.types.descriptor(class.ty).to_string(),
            ));
        }
        self.class_index.insert(class.ty, self.classes.len());
        self.classes.push(class);
        Ok(())
    }

    /// Removes classes not satisfying `keep`, preserving canonical order.
    pub fn retain_classes(&mut self, mut keep: impl FnMut(&ClassDef) -> bool) {
        debug_assert_eq!(self.phase, Phase::Optimization, "model is read-only");
        self.classes.retain(|c| keep(c));
        self.class_index = self
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.ty, i))
            .collect();
    }

    /// Returns the program definition a method reference names directly.
    ///
    /// This is the strict lookup for references liveness facts claim to be
    /// program-defined: a miss is an internal inconsistency, not a normal
    /// outcome.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when the holder or the definition is missing.
    pub fn definition_of(&self, method: MethodRef) -> Result<&MethodDef> {
        let holder = self.pools.method_data(method).holder;
        let class = self.class(holder).ok_or_else(|| {
            internal_error!(
                "no program class for supposedly live method {}",
                self.pools.describe_method(method)
            )
        })?;
        class.method(method).ok_or_else(|| {
            internal_error!(
                "missing definition for supposedly live method {}",
                self.pools.describe_method(method)
            )
        })
    }

    /// Returns the program field definition a field reference names.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] when the holder or the definition is missing.
    pub fn field_definition_of(&self, field: FieldRef) -> Result<&FieldDef> {
        let holder = self.pools.field_data(field).holder;
        let class = self.class(holder).ok_or_else(|| {
            internal_error!(
                "no program class for supposedly live field {}",
                self.pools.describe_field(field)
            )
        })?;
        class.field(field).ok_or_else(|| {
            internal_error!(
                "missing definition for supposedly live field {}",
                self.pools.describe_field(field)
            )
        })
    }

    /// Resolves a method reference by walking the superclass chain from the
    /// referenced holder, as dispatch resolution does.
    #[must_use]
    pub fn resolve_method(&self, method: MethodRef) -> Resolution {
        let data = *self.pools.method_data(method);
        let mut current = Some(data.holder);
        while let Some(ty) = current {
            if let Some(class) = self.class(ty) {
                let resolved = self.pools.members.method(ty, data.name, data.proto);
                if class.method(resolved).is_some() {
                    return Resolution::Program(resolved);
                }
                current = class.superclass;
            } else if self.library.contains_key(&ty) {
                // Library chains are opaque; assume present on device.
                return Resolution::Library;
            } else {
                return Resolution::Unknown;
            }
        }
        Resolution::Unknown
    }

    /// Finds the virtual dispatch target for an instantiated receiver class,
    /// walking from `receiver` towards the root.
    #[must_use]
    pub fn lookup_virtual_target(
        &self,
        receiver: crate::model::Type,
        method: MethodRef,
    ) -> Option<MethodRef> {
        let data = *self.pools.method_data(method);
        let mut current = Some(receiver);
        while let Some(ty) = current {
            if let Some(class) = self.class(ty) {
                let candidate = self.pools.members.method(ty, data.name, data.proto);
                if let Some(def) = class.method(candidate) {
                    if def.flags.is_virtual() {
                        return Some(candidate);
                    }
                }
                current = class.superclass;
            } else {
                // Dispatch escaped into the library.
                return None;
            }
        }
        None
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("classes", &self.classes.len())
            .field("library", &self.library.len())
            .field("phase", &self.phase)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassFlags, MethodFlags};

    fn empty_class(pools: &Pools, descriptor: &str) -> ClassDef {
        let ty = pools.class_type(descriptor).unwrap();
        ClassDef::new(ty, ClassFlags::PUBLIC, Some(pools.types.well_known().object))
    }

    #[test]
    fn test_duplicate_types_rejected() {
        let pools = Pools::new();
        let a = empty_class(&pools, "Lapp/A;");
        let b = empty_class(&pools, "Lapp/A;");
        let err = Application::build(pools, vec![a, b], Vec::new()).unwrap_err();
        assert!(matches!(err, Error::DuplicateType(_)));
    }

    #[test]
    fn test_superclass_cycle_rejected() {
        let pools = Pools::new();
        let mut a = empty_class(&pools, "Lapp/A;");
        let mut b = empty_class(&pools, "Lapp/B;");
        a.superclass = Some(b.ty);
        b.superclass = Some(a.ty);
        let err = Application::build(pools, vec![a, b], Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_cycle_through_library_chain_rejected() {
        let pools = Pools::new();
        let lib_ty = pools.class_type("Llib/Base;").unwrap();

        let mut sub = empty_class(&pools, "Lapp/Sub;");
        sub.superclass = Some(lib_ty);
        let sub_ty = sub.ty;
        let stub = LibraryClass::new(lib_ty, ClassFlags::PUBLIC, Some(sub_ty));

        let err = Application::build(pools, vec![sub], vec![stub]).unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }

    #[test]
    fn test_empty_program_rejected() {
        let pools = Pools::new();
        let err = Application::build(pools, Vec::new(), Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Empty));
    }

    #[test]
    fn test_resolution_walks_superclass_chain() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();

        let mut base = empty_class(&pools, "Lapp/Base;");
        let base_run = pools.method(base.ty, "run", wk.void, &[]);
        base.methods.push(MethodDef {
            reference: base_run,
            flags: MethodFlags::PUBLIC,
            code: None,
        });

        let mut derived = empty_class(&pools, "Lapp/Derived;");
        derived.superclass = Some(base.ty);
        let derived_ty = derived.ty;

        let app = Application::build(pools.clone(), vec![base, derived], Vec::new()).unwrap();

        // A reference through the subclass resolves to the base definition.
        let through_derived = pools.method(derived_ty, "run", wk.void, &[]);
        assert_eq!(
            app.resolve_method(through_derived),
            Resolution::Program(base_run)
        );
        assert_eq!(
            app.lookup_virtual_target(derived_ty, through_derived),
            Some(base_run)
        );
    }

    #[test]
    fn test_known_missing_vs_internal() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let class = empty_class(&pools, "Lapp/A;");
        let class_ty = class.ty;
        let app = Application::build(pools.clone(), vec![class], Vec::new()).unwrap();

        // Reference into an unmodeled type: a normal, known-missing outcome.
        let phantom_holder = pools.class_type("Llib/Phantom;").unwrap();
        let phantom = pools.method(phantom_holder, "x", wk.void, &[]);
        assert_eq!(app.resolve_method(phantom), Resolution::Unknown);

        // A strict definition lookup on a program class that lacks the
        // member is an internal inconsistency.
        let missing = pools.method(class_ty, "missing", wk.void, &[]);
        assert!(matches!(
            app.definition_of(missing),
            Err(Error::Internal(_))
        ));
    }
}
