//! Class, method and field definitions.
//!
//! Program classes are mutable between phases: optimization may add, remove
//! or rewrite their members. Library classes are read-only stand-ins that
//! describe the platform API surface the program compiles against; they are
//! never mutated and never emitted.

use crate::{
    bytecode::StackCode,
    model::{ClassFlags, FieldFlags, FieldRef, MethodFlags, MethodRef, StringId, Type},
};

/// A constant value attached to a static field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstValue {
    /// 32-bit integer constant.
    Int(i32),
    /// Interned string constant.
    String(StringId),
    /// The null reference.
    Null,
}

/// A field definition inside a program class.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The interned reference naming this field.
    pub reference: FieldRef,
    /// Access flags.
    pub flags: FieldFlags,
    /// Initial value for static fields, if constant.
    pub static_value: Option<ConstValue>,
}

/// A method definition inside a program class.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// The interned reference naming this method.
    pub reference: MethodRef,
    /// Access flags.
    pub flags: MethodFlags,
    /// Input-form body. `None` for abstract and native methods. Once the
    /// IR builder has converted the body, the working representation lives
    /// in the compiler context and this copy is no longer consulted.
    pub code: Option<StackCode>,
}

impl MethodDef {
    /// Returns `true` if the method has no executable body.
    #[must_use]
    pub fn is_abstract_or_native(&self) -> bool {
        self.flags
            .intersects(MethodFlags::ABSTRACT | MethodFlags::NATIVE)
    }
}

/// A program class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// The interned type this class defines.
    pub ty: Type,
    /// Access flags.
    pub flags: ClassFlags,
    /// Superclass; `None` only for the root object type.
    pub superclass: Option<Type>,
    /// Implemented interface types.
    pub interfaces: Vec<Type>,
    /// Field definitions in declaration order.
    pub fields: Vec<FieldDef>,
    /// Method definitions in declaration order.
    pub methods: Vec<MethodDef>,
    /// Source file name, when the input carried one.
    pub source_file: Option<StringId>,
}

impl ClassDef {
    /// Creates a class with no members.
    #[must_use]
    pub fn new(ty: Type, flags: ClassFlags, superclass: Option<Type>) -> Self {
        Self {
            ty,
            flags,
            superclass,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        }
    }

    /// Finds a method definition by its reference.
    #[must_use]
    pub fn method(&self, reference: MethodRef) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.reference == reference)
    }

    /// Finds a method definition mutably by its reference.
    pub fn method_mut(&mut self, reference: MethodRef) -> Option<&mut MethodDef> {
        self.methods.iter_mut().find(|m| m.reference == reference)
    }

    /// Finds a field definition by its reference.
    #[must_use]
    pub fn field(&self, reference: FieldRef) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.reference == reference)
    }

    /// Removes a method definition, returning it if present.
    pub fn remove_method(&mut self, reference: MethodRef) -> Option<MethodDef> {
        let position = self.methods.iter().position(|m| m.reference == reference)?;
        Some(self.methods.remove(position))
    }

    /// Returns `true` if this class declares an `ENUM`-flagged type.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.flags.contains(ClassFlags::ENUM)
    }

    /// Returns `true` if this class is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(ClassFlags::INTERFACE)
    }
}

/// A method stub on a library class. Carries no code.
#[derive(Debug, Clone)]
pub struct LibraryMethod {
    /// The interned reference naming this method.
    pub reference: MethodRef,
    /// Access flags.
    pub flags: MethodFlags,
}

/// A field stub on a library class.
#[derive(Debug, Clone)]
pub struct LibraryField {
    /// The interned reference naming this field.
    pub reference: FieldRef,
    /// Access flags.
    pub flags: FieldFlags,
}

/// A read-only library class stub describing part of the platform surface.
#[derive(Debug, Clone)]
pub struct LibraryClass {
    /// The interned type this stub describes.
    pub ty: Type,
    /// Access flags.
    pub flags: ClassFlags,
    /// Superclass; `None` for the root object type.
    pub superclass: Option<Type>,
    /// Implemented interface types.
    pub interfaces: Vec<Type>,
    /// Known method stubs. Members absent here are *known-missing*: callers
    /// treat them as opaque rather than as an internal inconsistency.
    pub methods: Vec<LibraryMethod>,
    /// Known field stubs.
    pub fields: Vec<LibraryField>,
}

impl LibraryClass {
    /// Creates a stub with no members.
    #[must_use]
    pub fn new(ty: Type, flags: ClassFlags, superclass: Option<Type>) -> Self {
        Self {
            ty,
            flags,
            superclass,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        }
    }
}
