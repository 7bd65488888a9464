//! Interned method prototypes.
//!
//! A prototype is a return type plus an ordered parameter list. Prototypes
//! are interned like types so that signature comparison is handle identity,
//! and so the encoder can emit one proto-pool entry per distinct signature.

use std::sync::Arc;

use dashmap::DashMap;

use crate::model::{Type, TypeRegistry};

/// Handle to an interned prototype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proto(pub(crate) u32);

impl Proto {
    /// Returns the raw index of this handle.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Interned data for one prototype.
#[derive(Debug, Clone)]
pub struct ProtoData {
    /// Return type (may be `V`).
    pub return_type: Type,
    /// Ordered parameter types, excluding any receiver.
    pub parameters: Box<[Type]>,
    /// Short-form signature summary, return type first (`VL`, `ILI`, ...).
    pub shorty: Arc<str>,
}

/// Append-only interning pool for prototypes.
pub struct ProtoPool {
    index: DashMap<(Type, Box<[Type]>), Proto>,
    data: boxcar::Vec<ProtoData>,
}

impl ProtoPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            data: boxcar::Vec::new(),
        }
    }

    /// Interns the prototype `(parameters) -> return_type`.
    pub fn intern(&self, return_type: Type, parameters: &[Type], types: &TypeRegistry) -> Proto {
        let key = (return_type, parameters.to_vec().into_boxed_slice());
        if let Some(existing) = self.index.get(&key) {
            return *existing;
        }

        let mut shorty = String::with_capacity(parameters.len() + 1);
        shorty.push(types.shorty_char(return_type));
        for &param in parameters {
            shorty.push(types.shorty_char(param));
        }

        let params = key.1.clone();
        *self.index.entry(key).or_insert_with(|| {
            #[allow(clippy::cast_possible_truncation)]
            Proto(self.data.push(ProtoData {
                return_type,
                parameters: params,
                shorty: Arc::from(shorty.as_str()),
            }) as u32)
        })
    }

    /// Returns the interned data for a handle.
    #[must_use]
    pub fn get(&self, proto: Proto) -> &ProtoData {
        &self.data[proto.index()]
    }

    /// Number of interned prototypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.count()
    }

    /// Returns `true` if nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.count() == 0
    }
}

impl Default for ProtoPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProtoPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtoPool")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_by_signature() {
        let types = TypeRegistry::new();
        let pool = ProtoPool::new();
        let wk = *types.well_known();

        let a = pool.intern(wk.void, &[wk.int, wk.int], &types);
        let b = pool.intern(wk.void, &[wk.int, wk.int], &types);
        let c = pool.intern(wk.int, &[wk.int, wk.int], &types);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(&*pool.get(a).shorty, "VII");
        assert_eq!(&*pool.get(c).shorty, "III");
    }

    #[test]
    fn test_reference_params_shorty() {
        let types = TypeRegistry::new();
        let pool = ProtoPool::new();
        let wk = *types.well_known();

        let p = pool.intern(wk.object, &[wk.string, wk.boolean], &types);
        assert_eq!(&*pool.get(p).shorty, "LLZ");
        assert_eq!(pool.get(p).parameters.len(), 2);
    }
}
