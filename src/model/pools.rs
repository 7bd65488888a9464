//! The combined interning context threaded through every component.
//!
//! [`Pools`] bundles the four interners (strings, types, prototypes, member
//! references) into one explicit context object. It is created once per
//! compilation, shared by `Arc`, and torn down at run end; there is no global
//! interner state anywhere in the crate.

use std::sync::Arc;

use crate::{
    model::{
        FieldRef, FieldRefData, MemberPool, MethodRef, MethodRefData, Proto, ProtoData, ProtoPool,
        StringId, StringPool, Type, TypeRegistry,
    },
    Result,
};

/// Shared interning pools for one compilation run.
#[derive(Debug, Default)]
pub struct Pools {
    /// Interned strings.
    pub strings: StringPool,
    /// Interned type references.
    pub types: TypeRegistry,
    /// Interned prototypes.
    pub protos: ProtoPool,
    /// Interned member references.
    pub members: MemberPool,
}

impl Pools {
    /// Creates a fresh set of pools with the well-known types seeded.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            strings: StringPool::new(),
            types: TypeRegistry::new(),
            protos: ProtoPool::new(),
            members: MemberPool::new(),
        })
    }

    /// Interns a method reference from its parts.
    pub fn method(
        &self,
        holder: Type,
        name: &str,
        return_type: Type,
        parameters: &[Type],
    ) -> MethodRef {
        let name = self.strings.intern(name);
        let proto = self.protos.intern(return_type, parameters, &self.types);
        self.members.method(holder, name, proto)
    }

    /// Interns a field reference from its parts.
    pub fn field(&self, holder: Type, name: &str, ty: Type) -> FieldRef {
        let name = self.strings.intern(name);
        self.members.field(holder, name, ty)
    }

    /// Interns a class type from its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor.
    pub fn class_type(&self, descriptor: &str) -> Result<Type> {
        self.types.intern(descriptor)
    }

    /// Returns the interned data of a method reference.
    #[must_use]
    pub fn method_data(&self, m: MethodRef) -> &MethodRefData {
        self.members.method_data(m)
    }

    /// Returns the interned data of a field reference.
    #[must_use]
    pub fn field_data(&self, f: FieldRef) -> &FieldRefData {
        self.members.field_data(f)
    }

    /// Returns the name of a method reference.
    #[must_use]
    pub fn method_name(&self, m: MethodRef) -> &str {
        self.strings.get(self.members.method_data(m).name)
    }

    /// Returns the prototype data of a method reference.
    #[must_use]
    pub fn method_proto(&self, m: MethodRef) -> &ProtoData {
        self.protos.get(self.members.method_data(m).proto)
    }

    /// Renders a method reference as `Lholder;->name(params)ret`.
    #[must_use]
    pub fn describe_method(&self, m: MethodRef) -> String {
        let data = self.members.method_data(m);
        let proto = self.protos.get(data.proto);
        let mut out = String::new();
        out.push_str(self.types.descriptor(data.holder));
        out.push_str("->");
        out.push_str(self.strings.get(data.name));
        out.push('(');
        for &param in &proto.parameters {
            out.push_str(self.types.descriptor(param));
        }
        out.push(')');
        out.push_str(self.types.descriptor(proto.return_type));
        out
    }

    /// Renders a field reference as `Lholder;->name:type`.
    #[must_use]
    pub fn describe_field(&self, f: FieldRef) -> String {
        let data = self.members.field_data(f);
        format!(
            "{}->{}:{}",
            self.types.descriptor(data.holder),
            self.strings.get(data.name),
            self.types.descriptor(data.ty)
        )
    }

    /// Re-interns `m` with a different holder type, keeping name and proto.
    #[must_use]
    pub fn method_with_holder(&self, m: MethodRef, holder: Type) -> MethodRef {
        let data = *self.members.method_data(m);
        self.members.method(holder, data.name, data.proto)
    }

    /// Re-interns `f` with a different holder type, keeping name and type.
    #[must_use]
    pub fn field_with_holder(&self, f: FieldRef, holder: Type) -> FieldRef {
        let data = *self.members.field_data(f);
        self.members.field(holder, data.name, data.ty)
    }

    /// Re-interns `m` with a different prototype, keeping holder and name.
    #[must_use]
    pub fn method_with_proto(&self, m: MethodRef, proto: Proto) -> MethodRef {
        let data = *self.members.method_data(m);
        self.members.method(data.holder, data.name, proto)
    }

    /// Returns the interned name id for `name`.
    pub fn name(&self, name: &str) -> StringId {
        self.strings.intern(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_method() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let holder = pools.class_type("Lapp/Main;").unwrap();
        let m = pools.method(holder, "sum", wk.int, &[wk.int, wk.int]);
        assert_eq!(pools.describe_method(m), "Lapp/Main;->sum(II)I");
    }

    #[test]
    fn test_rewrite_holder_reinterns() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let a = pools.class_type("Lapp/A;").unwrap();
        let b = pools.class_type("Lapp/B;").unwrap();
        let m = pools.method(a, "go", wk.void, &[]);
        let moved = pools.method_with_holder(m, b);
        assert_ne!(m, moved);
        assert_eq!(pools.method_data(moved).holder, b);
        assert_eq!(pools.method_name(moved), "go");
    }
}
