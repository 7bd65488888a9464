//! Synthetic item management.
//!
//! Optimizations sometimes need classes that have no counterpart in the
//! input: a fresh holder for merged statics, an accessor bridge, a
//! lambda body. Those are registered here rather than added to the
//! model directly, for three reasons:
//!
//! - **Deterministic naming.** A synthetic's name is derived from its
//!   context type and a content hash, so the same input always produces
//!   the same output regardless of pass scheduling.
//! - **Race-free claims.** Two workers deriving the same synthetic both
//!   get the same answer; the ordered map arbitrates, and the loser
//!   drops its copy.
//! - **Safe commit points.** The model only changes between waves; the
//!   pending batch is committed by the driver, never mid-pass.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crossbeam_skiplist::SkipMap;
use sha1::{Digest, Sha1};

use crate::{
    model::{Application, ClassDef, Pools, Type},
    Result,
};

/// Pending synthetic classes, keyed by descriptor.
#[derive(Debug, Default)]
pub struct SyntheticItems {
    pending: SkipMap<String, ClassDef>,
}

impl SyntheticItems {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives the deterministic descriptor for a synthetic in
    /// `context`. `kind` separates synthetic families ("Holder",
    /// "Accessor"); `content` is any stable fingerprint of what the
    /// synthetic will contain.
    #[must_use]
    pub fn descriptor_for(pools: &Pools, context: Type, kind: &str, content: &str) -> String {
        let context_descriptor = pools.types.descriptor(context);
        let mut hasher = Sha1::new();
        hasher.update(context_descriptor.as_bytes());
        hasher.update(kind.as_bytes());
        hasher.update(content.as_bytes());
        let digest = hasher.finalize();
        let stem = context_descriptor
            .strip_suffix(';')
            .unwrap_or(context_descriptor);
        format!(
            "{stem}$${kind}${:02x}{:02x}{:02x}{:02x};",
            digest[0], digest[1], digest[2], digest[3]
        )
    }

    /// Registers a synthetic class, claiming its name.
    ///
    /// The builder runs only for the winning claim; a concurrent
    /// registration of the same descriptor returns the already-claimed
    /// type. Collisions with program identities get a numeric suffix.
    pub fn register(
        &self,
        pools: &Pools,
        app: &Application,
        descriptor: &str,
        build: impl FnOnce(Type) -> ClassDef,
    ) -> Result<Type> {
        let mut candidate = descriptor.to_owned();
        let mut bump = 1;
        loop {
            let ty = pools.types.intern(&candidate)?;
            if app.is_program_type(ty) {
                // A program class already owns this name.
                let stem = descriptor.strip_suffix(';').unwrap_or(descriptor);
                candidate = format!("{stem}${bump};");
                bump += 1;
                continue;
            }
            if let Some(entry) = self.pending.get(&candidate) {
                return Ok(entry.value().ty);
            }
            let class = build(ty);
            let entry = self.pending.get_or_insert(candidate.clone(), class);
            return Ok(entry.value().ty);
        }
    }

    /// Number of uncommitted synthetics.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Folds structurally identical pending synthetics into a single
    /// representative, keeping the first in name order.
    ///
    /// Returns the type redirections the caller publishes as a lens
    /// layer; empty when nothing folded. Two synthetics are identical
    /// only when their flags, supertypes and every member shape and
    /// body match exactly, so a class referencing its own members never
    /// folds.
    pub fn merge(&self, pools: &Pools) -> HashMap<Type, Type> {
        let mut representatives: HashMap<String, Type> = HashMap::new();
        let mut folded = HashMap::new();
        let mut dropped = Vec::new();
        for entry in self.pending.iter() {
            let class = entry.value();
            match representatives.entry(Self::shape_of(pools, class)) {
                Entry::Vacant(slot) => {
                    slot.insert(class.ty);
                }
                Entry::Occupied(slot) => {
                    folded.insert(class.ty, *slot.get());
                    dropped.push(entry.key().clone());
                }
            }
        }
        for key in dropped {
            self.pending.remove(&key);
        }
        folded
    }

    /// A holder-independent fingerprint of the class body.
    fn shape_of(pools: &Pools, class: &ClassDef) -> String {
        use std::fmt::Write as _;

        let member_name = |described: String| {
            described
                .split_once("->")
                .map_or(described.clone(), |(_, rest)| rest.to_owned())
        };
        let mut shape = String::new();
        let _ = write!(shape, "{:?}|", class.flags);
        if let Some(superclass) = class.superclass {
            shape.push_str(pools.types.descriptor(superclass));
        }
        for &iface in &class.interfaces {
            let _ = write!(shape, "+{}", pools.types.descriptor(iface));
        }
        for field in &class.fields {
            let _ = write!(
                shape,
                "|f:{}:{:?}:{:?}",
                member_name(pools.describe_field(field.reference)),
                field.flags,
                field.static_value
            );
        }
        for method in &class.methods {
            let _ = write!(
                shape,
                "|m:{}:{:?}:{:?}",
                member_name(pools.describe_method(method.reference)),
                method.flags,
                method.code
            );
        }
        shape
    }

    /// Moves every pending synthetic into the model, in name order.
    ///
    /// # Errors
    ///
    /// Fails when a synthetic's name collides with a class added since
    /// registration; that indicates a driver sequencing bug.
    pub fn commit(&self, app: &mut Application) -> Result<usize> {
        let mut committed = 0;
        while let Some(entry) = self.pending.pop_front() {
            app.add_class(entry.value().clone())?;
            committed += 1;
        }
        Ok(committed)
    }
}
