//! The built-in pass set.

mod class_merger;
mod dce;
mod enum_unboxer;
mod field_values;
mod inliner;

pub use class_merger::ClassMergerPass;
pub use dce::DeadCodePass;
pub use enum_unboxer::EnumUnboxerPass;
pub use field_values::FieldValuePass;
pub use inliner::InlinerPass;
