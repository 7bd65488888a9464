//! # dexopt Prelude
//!
//! Re-exports of the types most compilations touch: the pools, the
//! class model, keep rules, the driver entry points and the error
//! types. Import with `use dexopt::prelude::*;`.

/// The main error type for all operations.
pub use crate::Error;

/// The result type used throughout the crate.
pub use crate::Result;

/// One-call compilation entry points.
pub use crate::compile::{
    compile, compile_with_consumer, compile_with_policy, CompilationInputs, CompiledProgram,
};

/// Compilation tunables.
pub use crate::options::CompileOptions;

/// The interned program model.
pub use crate::model::{
    Application, ClassDef, ClassFlags, ConstValue, FieldDef, FieldFlags, FieldRef, Hierarchy,
    LibraryClass, MethodDef, MethodFlags, MethodRef, Phase, Pools, Proto, StringId, Type,
};

/// The stack-machine input form.
pub use crate::bytecode::{BinaryOp, IfCond, InvokeKind, StackCode, StackOp};

/// Entry-point declarations.
pub use crate::trace::{KeepRule, KeepRules};

/// Reflection policies for the reachability trace.
pub use crate::trace::{ConservativePolicy, ReflectionPolicy, TrustingPolicy};

/// Container packing strategy selection.
pub use crate::encode::PackingStrategy;

/// Decoding serialized containers for inspection.
pub use crate::encode::{read_container, DecodedContainer, EncodedContainer};

/// Diagnostics collected during compilation.
pub use crate::diagnostics::{Diagnostic, DiagnosticSink, Severity};

/// Platform availability queries.
pub use crate::api::{ApiLevelDatabase, ApiTable};
