//! Interned method and field references.
//!
//! A *reference* names a member symbolically (holder type, name, signature)
//! and is distinct from the member's *definition*, which lives in a
//! [`crate::model::ClassDef`]. Optimization passes rewrite references through
//! the graph lens; definitions move only at phase boundaries.

use dashmap::DashMap;

use crate::model::{Proto, StringId, Type};

/// Handle to an interned method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef(pub(crate) u32);

impl MethodRef {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to an interned field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef(pub(crate) u32);

impl FieldRef {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned data for a method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodRefData {
    /// The class or interface the reference names.
    pub holder: Type,
    /// Method name.
    pub name: StringId,
    /// Method signature.
    pub proto: Proto,
}

/// Interned data for a field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRefData {
    /// The class the reference names.
    pub holder: Type,
    /// Field name.
    pub name: StringId,
    /// Declared field type.
    pub ty: Type,
}

/// Append-only interning pool for member references.
pub struct MemberPool {
    method_index: DashMap<(Type, StringId, Proto), MethodRef>,
    methods: boxcar::Vec<MethodRefData>,
    field_index: DashMap<(Type, StringId, Type), FieldRef>,
    fields: boxcar::Vec<FieldRefData>,
}

impl MemberPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            method_index: DashMap::new(),
            methods: boxcar::Vec::new(),
            field_index: DashMap::new(),
            fields: boxcar::Vec::new(),
        }
    }

    /// Interns the method reference `holder.name:proto`.
    pub fn method(&self, holder: Type, name: StringId, proto: Proto) -> MethodRef {
        let key = (holder, name, proto);
        if let Some(existing) = self.method_index.get(&key) {
            return *existing;
        }
        *self.method_index.entry(key).or_insert_with(|| {
            #[allow(clippy::cast_possible_truncation)]
            MethodRef(self.methods.push(MethodRefData {
                holder,
                name,
                proto,
            }) as u32)
        })
    }

    /// Interns the field reference `holder.name:ty`.
    pub fn field(&self, holder: Type, name: StringId, ty: Type) -> FieldRef {
        let key = (holder, name, ty);
        if let Some(existing) = self.field_index.get(&key) {
            return *existing;
        }
        *self.field_index.entry(key).or_insert_with(|| {
            #[allow(clippy::cast_possible_truncation)]
            FieldRef(self.fields.push(FieldRefData { holder, name, ty }) as u32)
        })
    }

    /// Returns the interned data for a method reference.
    #[must_use]
    pub fn method_data(&self, m: MethodRef) -> &MethodRefData {
        &self.methods[m.index()]
    }

    /// Returns the interned data for a field reference.
    #[must_use]
    pub fn field_data(&self, f: FieldRef) -> &FieldRefData {
        &self.fields[f.index()]
    }

    /// Number of interned method references.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.count()
    }

    /// Number of interned field references.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.count()
    }
}

impl Default for MemberPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemberPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberPool")
            .field("methods", &self.method_count())
            .field("fields", &self.field_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProtoPool, StringPool, TypeRegistry};

    #[test]
    fn test_member_identity() {
        let types = TypeRegistry::new();
        let strings = StringPool::new();
        let protos = ProtoPool::new();
        let members = MemberPool::new();
        let wk = *types.well_known();

        let holder = types.intern("Lapp/Main;").unwrap();
        let name = strings.intern("run");
        let proto = protos.intern(wk.void, &[], &types);

        let a = members.method(holder, name, proto);
        let b = members.method(holder, name, proto);
        assert_eq!(a, b);

        let other_proto = protos.intern(wk.int, &[], &types);
        let c = members.method(holder, name, other_proto);
        assert_ne!(a, c);

        let f = members.field(holder, strings.intern("count"), wk.int);
        let g = members.field(holder, strings.intern("count"), wk.int);
        assert_eq!(f, g);
        assert_eq!(members.field_data(f).ty, wk.int);
    }
}
