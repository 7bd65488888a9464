//! Access flags for classes, methods and fields.

use bitflags::bitflags;

bitflags! {
    /// Access and property flags of a class definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Not subclassable.
        const FINAL = 0x0010;
        /// Interface, not class.
        const INTERFACE = 0x0200;
        /// Abstract; never instantiated directly.
        const ABSTRACT = 0x0400;
        /// Compiler-generated, not present in source.
        const SYNTHETIC = 0x1000;
        /// Declared as an enum type.
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Access and property flags of a method definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Accessible only within the holder.
        const PRIVATE = 0x0002;
        /// Accessible within the holder and subclasses.
        const PROTECTED = 0x0004;
        /// No receiver; dispatched statically.
        const STATIC = 0x0008;
        /// Not overridable.
        const FINAL = 0x0010;
        /// Holds the receiver monitor for the duration of the call.
        const SYNCHRONIZED = 0x0020;
        /// Implemented outside the managed program; a hard analysis boundary.
        const NATIVE = 0x0100;
        /// No code; implemented by subclasses.
        const ABSTRACT = 0x0400;
        /// Compiler-generated, not present in source.
        const SYNTHETIC = 0x1000;
        /// Instance or static initializer (`<init>` / `<clinit>`).
        const CONSTRUCTOR = 0x1_0000;
    }
}

bitflags! {
    /// Access and property flags of a field definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Accessible only within the holder.
        const PRIVATE = 0x0002;
        /// Accessible within the holder and subclasses.
        const PROTECTED = 0x0004;
        /// Class-level storage.
        const STATIC = 0x0008;
        /// Written only by initializers.
        const FINAL = 0x0010;
        /// Compiler-generated, not present in source.
        const SYNTHETIC = 0x1000;
        /// One of an enum's named constants.
        const ENUM = 0x4000;
    }
}

impl MethodFlags {
    /// Returns `true` if the method can be the target of virtual dispatch.
    #[must_use]
    pub fn is_virtual(self) -> bool {
        !self.intersects(Self::STATIC | Self::PRIVATE | Self::CONSTRUCTOR)
    }
}
