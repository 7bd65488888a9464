//! Output containers and their index budgets.
//!
//! A container is one bounded output artifact. It tracks the distinct
//! string/type/proto/field/method indices its classes would occupy and
//! refuses a class whose footprint would push any category past the
//! platform ceiling. The state machine is one-way: OPEN accepts classes,
//! FULL is sealed for packing, WRITTEN has produced bytes.

use std::collections::{BTreeSet, HashMap};

use crate::{
    model::{ClassDef, ConstValue, FieldRef, MethodRef, Pools, Proto, StringId, Type},
    Result,
};

use super::{LoweredMethod, RegOp};

/// Distinct-index ceiling per pool category.
pub const INDEX_LIMIT: usize = 65536;

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Accepting classes.
    Open,
    /// Sealed; no further classes.
    Full,
    /// Bytes emitted.
    Written,
}

/// Every pool reference one class drags into a container.
#[derive(Debug, Clone)]
pub struct ClassFootprint {
    /// The class this footprint belongs to.
    pub class: Type,
    pub(super) strings: BTreeSet<StringId>,
    pub(super) types: BTreeSet<Type>,
    pub(super) protos: BTreeSet<Proto>,
    pub(super) fields: BTreeSet<FieldRef>,
    pub(super) methods: BTreeSet<MethodRef>,
}

impl ClassFootprint {
    /// Collects the footprint of `class` and its lowered bodies.
    pub fn collect(
        class: &ClassDef,
        bodies: &HashMap<MethodRef, LoweredMethod>,
        pools: &Pools,
    ) -> Result<Self> {
        let mut fp = Self {
            class: class.ty,
            strings: BTreeSet::new(),
            types: BTreeSet::new(),
            protos: BTreeSet::new(),
            fields: BTreeSet::new(),
            methods: BTreeSet::new(),
        };
        fp.add_type(class.ty, pools)?;
        if let Some(superclass) = class.superclass {
            fp.add_type(superclass, pools)?;
        }
        for &interface in &class.interfaces {
            fp.add_type(interface, pools)?;
        }
        if let Some(source) = class.source_file {
            fp.strings.insert(source);
        }
        for field in &class.fields {
            fp.add_field(field.reference, pools)?;
            if let Some(ConstValue::String(s)) = field.static_value {
                fp.strings.insert(s);
            }
        }
        for method in &class.methods {
            fp.add_method(method.reference, pools)?;
            if let Some(body) = bodies.get(&method.reference) {
                fp.add_body(body, pools)?;
            }
        }
        Ok(fp)
    }

    fn add_type(&mut self, ty: Type, pools: &Pools) -> Result<()> {
        if self.types.insert(ty) {
            // The type section names its descriptor through the string pool.
            self.strings.insert(pools.name(pools.types.descriptor(ty)));
        }
        Ok(())
    }

    fn add_proto(&mut self, proto: Proto, pools: &Pools) -> Result<()> {
        if !self.protos.insert(proto) {
            return Ok(());
        }
        let data = pools.protos.get(proto).clone();
        self.add_type(data.return_type, pools)?;
        for &param in &*data.parameters {
            self.add_type(param, pools)?;
        }
        Ok(())
    }

    fn add_method(&mut self, method: MethodRef, pools: &Pools) -> Result<()> {
        if !self.methods.insert(method) {
            return Ok(());
        }
        let data = *pools.method_data(method);
        self.add_type(data.holder, pools)?;
        self.add_proto(data.proto, pools)?;
        self.strings.insert(data.name);
        Ok(())
    }

    fn add_field(&mut self, field: FieldRef, pools: &Pools) -> Result<()> {
        if !self.fields.insert(field) {
            return Ok(());
        }
        let data = *pools.field_data(field);
        self.add_type(data.holder, pools)?;
        self.add_type(data.ty, pools)?;
        self.strings.insert(data.name);
        Ok(())
    }

    fn add_body(&mut self, body: &LoweredMethod, pools: &Pools) -> Result<()> {
        for op in &body.ops {
            match op {
                RegOp::ConstString { string, .. } => {
                    self.strings.insert(*string);
                }
                RegOp::NewInstance { ty, .. }
                | RegOp::NewArray { ty, .. }
                | RegOp::CheckCast { ty, .. }
                | RegOp::InstanceOf { ty, .. } => self.add_type(*ty, pools)?,
                RegOp::StaticGet { field, .. }
                | RegOp::StaticPut { field, .. }
                | RegOp::InstanceGet { field, .. }
                | RegOp::InstancePut { field, .. } => self.add_field(*field, pools)?,
                RegOp::Invoke { method, .. } => self.add_method(*method, pools)?,
                _ => {}
            }
        }
        for handler in &body.handlers {
            if let Some(ty) = handler.catch_type {
                self.add_type(ty, pools)?;
            }
        }
        Ok(())
    }

    /// `(category, distinct count)` pairs of this footprint.
    #[must_use]
    pub fn counts(&self) -> [(&'static str, usize); 5] {
        [
            ("string", self.strings.len()),
            ("type", self.types.len()),
            ("proto", self.protos.len()),
            ("field", self.fields.len()),
            ("method", self.methods.len()),
        ]
    }

    /// True when this class alone cannot fit an empty container.
    #[must_use]
    pub fn oversized(&self) -> bool {
        self.counts().iter().any(|&(_, count)| count > INDEX_LIMIT)
    }
}

/// One bounded-capacity output bucket of classes.
#[derive(Debug, Default)]
pub struct Container {
    state: ContainerStateInner,
    classes: Vec<Type>,
    pub(super) strings: BTreeSet<StringId>,
    pub(super) types: BTreeSet<Type>,
    pub(super) protos: BTreeSet<Proto>,
    pub(super) fields: BTreeSet<FieldRef>,
    pub(super) methods: BTreeSet<MethodRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ContainerStateInner {
    #[default]
    Open,
    Full,
    Written,
}

impl Container {
    /// Creates an empty, open container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        match self.state {
            ContainerStateInner::Open => ContainerState::Open,
            ContainerStateInner::Full => ContainerState::Full,
            ContainerStateInner::Written => ContainerState::Written,
        }
    }

    /// Classes packed so far, in addition order.
    #[must_use]
    pub fn classes(&self) -> &[Type] {
        &self.classes
    }

    /// True when no class has been packed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// The first category `footprint` would push past the ceiling, with the
    /// distinct count the union would need. `None` when the class fits.
    #[must_use]
    pub fn blocking_category(&self, footprint: &ClassFootprint) -> Option<(&'static str, usize)> {
        let unions = [
            (
                "string",
                self.strings.union(&footprint.strings).count(),
            ),
            ("type", self.types.union(&footprint.types).count()),
            ("proto", self.protos.union(&footprint.protos).count()),
            ("field", self.fields.union(&footprint.fields).count()),
            ("method", self.methods.union(&footprint.methods).count()),
        ];
        unions.into_iter().find(|&(_, count)| count > INDEX_LIMIT)
    }

    /// Packs a class, returning `false` when it does not fit.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Internal`] when the container is no longer open.
    pub fn try_add(&mut self, footprint: &ClassFootprint) -> Result<bool> {
        if self.state != ContainerStateInner::Open {
            return Err(internal_error!(
                "class added to a {:?} container",
                self.state()
            ));
        }
        if self.blocking_category(footprint).is_some() {
            return Ok(false);
        }
        self.classes.push(footprint.class);
        self.strings.extend(&footprint.strings);
        self.types.extend(&footprint.types);
        self.protos.extend(&footprint.protos);
        self.fields.extend(&footprint.fields);
        self.methods.extend(&footprint.methods);
        Ok(true)
    }

    /// Seals the container; no further classes are accepted.
    pub fn seal(&mut self) {
        if self.state == ContainerStateInner::Open {
            self.state = ContainerStateInner::Full;
        }
    }

    /// Records that bytes were emitted for this container.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Internal`] unless the container was sealed first.
    pub fn mark_written(&mut self) -> Result<()> {
        if self.state != ContainerStateInner::Full {
            return Err(internal_error!(
                "container written from state {:?}",
                self.state()
            ));
        }
        self.state = ContainerStateInner::Written;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassFlags, FieldFlags, MethodFlags};

    fn footprint_of(descriptor: &str, pools: &Pools) -> ClassFootprint {
        let wk = *pools.types.well_known();
        let ty = pools.class_type(descriptor).unwrap();
        let mut class = ClassDef::new(ty, ClassFlags::PUBLIC, Some(wk.object));
        class.fields.push(crate::model::FieldDef {
            reference: pools.field(ty, "count", wk.int),
            flags: FieldFlags::STATIC,
            static_value: None,
        });
        class.methods.push(crate::model::MethodDef {
            reference: pools.method(ty, "run", wk.void, &[]),
            flags: MethodFlags::PUBLIC,
            code: None,
        });
        ClassFootprint::collect(&class, &HashMap::new(), pools).unwrap()
    }

    #[test]
    fn test_footprint_covers_member_closure() {
        let pools = Pools::new();
        let fp = footprint_of("Lapp/A;", &pools);
        // Own type, superclass, field type, void return type.
        assert!(fp.types.len() >= 4);
        assert_eq!(fp.fields.len(), 1);
        assert_eq!(fp.methods.len(), 1);
        // Member names and every descriptor string.
        assert!(fp.strings.len() >= fp.types.len() + 2);
        assert!(!fp.oversized());
    }

    #[test]
    fn test_sealed_container_rejects() {
        let pools = Pools::new();
        let fp = footprint_of("Lapp/A;", &pools);
        let mut container = Container::new();
        assert!(container.try_add(&fp).unwrap());
        container.seal();
        assert_eq!(container.state(), ContainerState::Full);
        assert!(container.try_add(&fp).is_err());

        container.mark_written().unwrap();
        assert_eq!(container.state(), ContainerState::Written);
    }

    #[test]
    fn test_written_requires_seal() {
        let mut container = Container::new();
        assert!(container.mark_written().is_err());
        container.seal();
        assert!(container.mark_written().is_ok());
    }

    #[test]
    fn test_shared_references_count_once() {
        let pools = Pools::new();
        let a = footprint_of("Lapp/A;", &pools);
        let b = footprint_of("Lapp/B;", &pools);
        let mut container = Container::new();
        container.try_add(&a).unwrap();
        let before = container.types.len();
        container.try_add(&b).unwrap();
        // B shares object, int and void with A; only its own type and
        // descriptor-induced strings are new.
        assert_eq!(container.types.len(), before + 1);
        assert_eq!(container.classes().len(), 2);
    }
}
