//! The program model: classes, members, interned identities.
//!
//! Every other component reads and rewrites this substrate. Identities
//! (types, strings, prototypes, member references) are interned once per
//! compilation and compared by handle; definitions live in
//! [`Application`]-owned class lists with a deterministic canonical order.
//!
//! # Key Components
//!
//! - [`Pools`] - the interning context threaded through all entry points
//! - [`Application`] - program + library class definitions, phase-gated
//! - [`Hierarchy`] - explicit subtype graph and dispatch resolution
//! - [`ClassDef`] / [`MethodDef`] / [`FieldDef`] - mutable program members
//! - [`LibraryClass`] - read-only platform stubs

mod app;
mod class;
mod flags;
mod hierarchy;
mod members;
mod pools;
mod proto;
mod strings;
mod types;

pub use app::{Application, Phase, Resolution};
pub use class::{
    ClassDef, ConstValue, FieldDef, LibraryClass, LibraryField, LibraryMethod, MethodDef,
};
pub use flags::{ClassFlags, FieldFlags, MethodFlags};
pub use hierarchy::Hierarchy;
pub use members::{FieldRef, FieldRefData, MemberPool, MethodRef, MethodRefData};
pub use pools::Pools;
pub use proto::{Proto, ProtoData, ProtoPool};
pub use strings::{StringId, StringPool};
pub use types::{PrimitiveKind, Type, TypeData, TypeKind, TypeRegistry, WellKnownTypes};
