//! Canonical interned type references.
//!
//! Every class, interface, array and primitive type is identified by its
//! descriptor string (`Lfoo/Bar;`, `I`, `[Ljava/lang/String;`, ...). The
//! registry interns descriptors on first reference and hands out [`Type`]
//! handles; no two distinct handles ever denote the same descriptor, so all
//! type comparison in the compiler is handle identity.
//!
//! # Descriptor grammar
//!
//! ```text
//! descriptor := 'V' | primitive | class | array
//! primitive  := 'Z' | 'B' | 'S' | 'C' | 'I' | 'J' | 'F' | 'D'
//! class      := 'L' binary-name ';'
//! array      := '[' descriptor
//! ```
//!
//! # Thread Safety
//!
//! Same protocol as [`super::strings::StringPool`]: `DashMap` index over an
//! append-only `boxcar` arena. Handles are created lazily on first reference
//! and live for the whole compilation.

use std::sync::Arc;

use dashmap::DashMap;

use crate::Result;

/// Handle to a canonical interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(pub(crate) u32);

impl Type {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Structural classification of a type, derived from its descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// `V`, only valid as a return type.
    Void,
    /// One of the eight primitive value types.
    Primitive(PrimitiveKind),
    /// A class or interface reference type.
    Class,
    /// An array type; the element descriptor follows the `[`.
    Array,
}

/// The primitive value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `C`
    Char,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
}

impl PrimitiveKind {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'Z' => Self::Boolean,
            'B' => Self::Byte,
            'S' => Self::Short,
            'C' => Self::Char,
            'I' => Self::Int,
            'J' => Self::Long,
            'F' => Self::Float,
            'D' => Self::Double,
            _ => return None,
        })
    }

    /// Returns `true` for the two 64-bit primitives.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, Self::Long | Self::Double)
    }
}

/// Interned data for one type.
#[derive(Debug, Clone)]
pub struct TypeData {
    /// The canonical descriptor string.
    pub descriptor: Arc<str>,
    /// Structural classification.
    pub kind: TypeKind,
}

/// Frequently consulted platform types, resolved once at registry creation.
#[derive(Debug, Clone, Copy)]
pub struct WellKnownTypes {
    /// `V`
    pub void: Type,
    /// `Z`
    pub boolean: Type,
    /// `I`
    pub int: Type,
    /// `Ljava/lang/Object;`
    pub object: Type,
    /// `Ljava/lang/String;`
    pub string: Type,
    /// `Ljava/lang/Class;`
    pub class: Type,
    /// `Ljava/lang/Enum;`
    pub enumeration: Type,
    /// `Ljava/lang/Throwable;`
    pub throwable: Type,
}

/// Central interning registry for type references.
///
/// # Examples
///
/// ```rust
/// use dexopt::model::TypeRegistry;
///
/// let types = TypeRegistry::new();
/// let color = types.intern("Lcom/example/Color;")?;
/// assert_eq!(color, types.intern("Lcom/example/Color;")?);
/// assert_ne!(color, types.well_known().object);
/// # Ok::<(), dexopt::Error>(())
/// ```
pub struct TypeRegistry {
    index: DashMap<Arc<str>, Type>,
    data: boxcar::Vec<TypeData>,
    well_known: WellKnownTypes,
}

impl TypeRegistry {
    /// Creates a registry pre-seeded with `void`, the primitives and the
    /// core platform reference types.
    #[must_use]
    pub fn new() -> Self {
        let registry = Self {
            index: DashMap::new(),
            data: boxcar::Vec::new(),
            // Placeholder, replaced below once the seeds exist.
            well_known: WellKnownTypes {
                void: Type(0),
                boolean: Type(0),
                int: Type(0),
                object: Type(0),
                string: Type(0),
                class: Type(0),
                enumeration: Type(0),
                throwable: Type(0),
            },
        };

        let seed = |d: &str| {
            registry
                .intern(d)
                .expect("well-known descriptor must be valid")
        };

        let well_known = WellKnownTypes {
            void: seed("V"),
            boolean: seed("Z"),
            int: seed("I"),
            object: seed("Ljava/lang/Object;"),
            string: seed("Ljava/lang/String;"),
            class: seed("Ljava/lang/Class;"),
            enumeration: seed("Ljava/lang/Enum;"),
            throwable: seed("Ljava/lang/Throwable;"),
        };
        for d in ["B", "S", "C", "J", "F", "D"] {
            seed(d);
        }

        Self {
            well_known,
            ..registry
        }
    }

    /// Interns a descriptor, validating its syntax.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `descriptor` does not match the
    /// descriptor grammar.
    pub fn intern(&self, descriptor: &str) -> Result<Type> {
        if let Some(existing) = self.index.get(descriptor) {
            return Ok(*existing);
        }

        let kind = Self::classify(descriptor)?;
        let key: Arc<str> = Arc::from(descriptor);
        let handle = *self.index.entry(key.clone()).or_insert_with(|| {
            #[allow(clippy::cast_possible_truncation)]
            Type(self.data.push(TypeData {
                descriptor: key,
                kind,
            }) as u32)
        });
        Ok(handle)
    }

    fn classify(descriptor: &str) -> Result<TypeKind> {
        let mut chars = descriptor.chars();
        let Some(first) = chars.next() else {
            return Err(malformed_error!("empty type descriptor"));
        };
        match first {
            'V' if descriptor.len() == 1 => Ok(TypeKind::Void),
            'L' => {
                if descriptor.len() > 2 && descriptor.ends_with(';') {
                    Ok(TypeKind::Class)
                } else {
                    Err(malformed_error!("invalid class descriptor '{descriptor}'"))
                }
            }
            '[' => {
                Self::classify(&descriptor[1..])?;
                Ok(TypeKind::Array)
            }
            c => match PrimitiveKind::from_char(c) {
                Some(kind) if descriptor.len() == 1 => Ok(TypeKind::Primitive(kind)),
                _ => Err(malformed_error!("invalid type descriptor '{descriptor}'")),
            },
        }
    }

    /// Returns the interned data for a handle.
    #[must_use]
    pub fn get(&self, ty: Type) -> &TypeData {
        &self.data[ty.index()]
    }

    /// Returns the descriptor string of a handle.
    #[must_use]
    pub fn descriptor(&self, ty: Type) -> &str {
        &self.data[ty.index()].descriptor
    }

    /// Returns the pre-resolved well-known types.
    #[must_use]
    pub const fn well_known(&self) -> &WellKnownTypes {
        &self.well_known
    }

    /// Returns `true` if the type is a class, interface or array reference.
    #[must_use]
    pub fn is_reference(&self, ty: Type) -> bool {
        matches!(self.get(ty).kind, TypeKind::Class | TypeKind::Array)
    }

    /// Returns `true` if the type is a primitive value type.
    #[must_use]
    pub fn is_primitive(&self, ty: Type) -> bool {
        matches!(self.get(ty).kind, TypeKind::Primitive(_))
    }

    /// Interns the array type with element type `element`.
    pub fn array_of(&self, element: Type) -> Result<Type> {
        let descriptor = format!("[{}", self.descriptor(element));
        self.intern(&descriptor)
    }

    /// Returns the element type of an array type, or `None` for non-arrays.
    pub fn element_of(&self, ty: Type) -> Result<Option<Type>> {
        let data = self.get(ty);
        if data.kind != TypeKind::Array {
            return Ok(None);
        }
        let element = data.descriptor[1..].to_string();
        self.intern(&element).map(Some)
    }

    /// The single-character shorty code used in prototype summaries.
    #[must_use]
    pub fn shorty_char(&self, ty: Type) -> char {
        match self.get(ty).kind {
            TypeKind::Void => 'V',
            TypeKind::Class | TypeKind::Array => 'L',
            TypeKind::Primitive(p) => match p {
                PrimitiveKind::Boolean => 'Z',
                PrimitiveKind::Byte => 'B',
                PrimitiveKind::Short => 'S',
                PrimitiveKind::Char => 'C',
                PrimitiveKind::Int => 'I',
                PrimitiveKind::Long => 'J',
                PrimitiveKind::Float => 'F',
                PrimitiveKind::Double => 'D',
            },
        }
    }

    /// Number of interned types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.count()
    }

    /// Returns `true` if the registry holds no types (never the case after
    /// construction, which seeds the well-known set).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.count() == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_after_interning() {
        let types = TypeRegistry::new();
        let a = types.intern("Lfoo/Bar;").unwrap();
        let b = types.intern("Lfoo/Bar;").unwrap();
        assert_eq!(a, b);
        assert_eq!(types.descriptor(a), "Lfoo/Bar;");
    }

    #[test]
    fn test_rejects_malformed_descriptors() {
        let types = TypeRegistry::new();
        assert!(types.intern("").is_err());
        assert!(types.intern("Lfoo/Bar").is_err());
        assert!(types.intern("X").is_err());
        assert!(types.intern("II").is_err());
        assert!(types.intern("[").is_err());
    }

    #[test]
    fn test_array_types() {
        let types = TypeRegistry::new();
        let int_array = types.intern("[I").unwrap();
        assert_eq!(types.get(int_array).kind, TypeKind::Array);
        assert_eq!(
            types.element_of(int_array).unwrap(),
            Some(types.well_known().int)
        );
        assert_eq!(types.array_of(types.well_known().int).unwrap(), int_array);
    }

    #[test]
    fn test_well_known_seeded() {
        let types = TypeRegistry::new();
        let wk = types.well_known();
        assert_eq!(types.descriptor(wk.object), "Ljava/lang/Object;");
        assert!(types.is_reference(wk.string));
        assert!(types.is_primitive(wk.int));
        assert_eq!(types.shorty_char(wk.enumeration), 'L');
    }
}
