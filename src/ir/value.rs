//! SSA values.

use crate::model::Type;

/// Handle to an SSA value inside one method's IR.
///
/// Values are defined exactly once, by an instruction, a phi, or by being a
/// method argument. Handles are indices into the owning
/// [`crate::ir::IrCode`]'s value arena and are meaningless across methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Per-value metadata.
#[derive(Debug, Clone, Copy)]
pub struct ValueInfo {
    /// Static type of the value.
    pub ty: Type,
}
