//! The graph lens: cumulative item renaming.
//!
//! Structural passes (merging, unboxing, signature rewriting) never
//! patch references in other methods; they append a layer to the lens
//! describing how old identities map to new ones. A reference is
//! resolved by replaying the layers oldest-first, so a type merged in
//! one wave and renamed in a later one resolves through both steps.
//! Layers share their tails, so snapshotting the lens at a phase
//! boundary is one `Arc` clone.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{FieldRef, MethodRef, Pools, Type};

/// How a method's signature changed, for call-site rewriting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrototypeChanges {
    /// Argument positions removed from the original signature, sorted.
    pub removed_args: Vec<usize>,
    /// New return type, when it changed.
    pub return_changed_to: Option<Type>,
}

impl PrototypeChanges {
    /// True when the signature is untouched.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.removed_args.is_empty() && self.return_changed_to.is_none()
    }
}

/// Lens answer for one method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLookup {
    /// Where the method lives now.
    pub target: MethodRef,
    /// Signature adjustments call sites must apply.
    pub prototype: PrototypeChanges,
}

/// One explicit method redirection inside a lens layer.
#[derive(Debug, Clone)]
pub struct MethodMapping {
    /// The replacement reference.
    pub target: MethodRef,
    /// Signature adjustments introduced by this layer.
    pub prototype: PrototypeChanges,
}

/// One layer of renaming, chained to everything renamed before it.
#[derive(Debug)]
pub enum LensNode {
    /// The empty lens.
    Identity,
    /// Type redirections. Method and field references whose holder or
    /// signature mentions a mapped type are rewritten implicitly.
    Types {
        /// Old type to new type.
        map: HashMap<Type, Type>,
        /// The layer this one extends.
        previous: Arc<LensNode>,
    },
    /// Explicit method redirections.
    Methods {
        /// Old reference to its replacement.
        map: HashMap<MethodRef, MethodMapping>,
        /// The layer this one extends.
        previous: Arc<LensNode>,
    },
    /// Explicit field redirections.
    Fields {
        /// Old reference to its replacement.
        map: HashMap<FieldRef, FieldRef>,
        /// The layer this one extends.
        previous: Arc<LensNode>,
    },
}

/// An immutable view over the accumulated renaming layers.
#[derive(Debug, Clone)]
pub struct GraphLens {
    head: Arc<LensNode>,
}

impl Default for GraphLens {
    fn default() -> Self {
        Self {
            head: Arc::new(LensNode::Identity),
        }
    }
}

impl GraphLens {
    /// The identity lens.
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Extends the lens with a layer of type redirections.
    #[must_use]
    pub fn with_types(&self, map: HashMap<Type, Type>) -> Self {
        Self {
            head: Arc::new(LensNode::Types {
                map,
                previous: Arc::clone(&self.head),
            }),
        }
    }

    /// Extends the lens with a layer of method redirections.
    #[must_use]
    pub fn with_methods(&self, map: HashMap<MethodRef, MethodMapping>) -> Self {
        Self {
            head: Arc::new(LensNode::Methods {
                map,
                previous: Arc::clone(&self.head),
            }),
        }
    }

    /// Extends the lens with a layer of field redirections.
    #[must_use]
    pub fn with_fields(&self, map: HashMap<FieldRef, FieldRef>) -> Self {
        Self {
            head: Arc::new(LensNode::Fields {
                map,
                previous: Arc::clone(&self.head),
            }),
        }
    }

    /// True when no layer has been appended.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(*self.head, LensNode::Identity)
    }

    /// Resolves a type through every layer, oldest first.
    #[must_use]
    pub fn lookup_type(&self, ty: Type) -> Type {
        Self::resolve_type(&self.head, ty)
    }

    fn resolve_type(node: &LensNode, ty: Type) -> Type {
        match node {
            LensNode::Identity => ty,
            LensNode::Types { map, previous } => {
                let below = Self::resolve_type(previous, ty);
                map.get(&below).copied().unwrap_or(below)
            }
            LensNode::Methods { previous, .. } | LensNode::Fields { previous, .. } => {
                Self::resolve_type(previous, ty)
            }
        }
    }

    /// Resolves a method reference. Explicit redirections apply first
    /// at each layer; otherwise the reference is rewritten against the
    /// layer's type map when its holder or signature mentions a mapped
    /// type.
    #[must_use]
    pub fn lookup_method(&self, method: MethodRef, pools: &Pools) -> MethodLookup {
        Self::resolve_method(&self.head, method, pools)
    }

    fn resolve_method(node: &LensNode, method: MethodRef, pools: &Pools) -> MethodLookup {
        match node {
            LensNode::Identity => MethodLookup {
                target: method,
                prototype: PrototypeChanges::default(),
            },
            LensNode::Fields { previous, .. } => Self::resolve_method(previous, method, pools),
            LensNode::Methods { map, previous } => {
                let below = Self::resolve_method(previous, method, pools);
                match map.get(&below.target) {
                    Some(mapping) => MethodLookup {
                        target: mapping.target,
                        prototype: compose_prototypes(&below.prototype, &mapping.prototype),
                    },
                    None => below,
                }
            }
            LensNode::Types { map, previous } => {
                let below = Self::resolve_method(previous, method, pools);
                let rewrite =
                    |ty: Type| map.get(&ty).copied().unwrap_or(ty);
                let data = *pools.method_data(below.target);
                let proto = pools.protos.get(data.proto).clone();
                let new_holder = rewrite(data.holder);
                let new_return = rewrite(proto.return_type);
                let new_params: Vec<Type> =
                    proto.parameters.iter().map(|&p| rewrite(p)).collect();
                if new_holder == data.holder
                    && new_return == proto.return_type
                    && new_params[..] == proto.parameters[..]
                {
                    return below;
                }
                let name = pools.strings.get(data.name).to_owned();
                let target = pools.method(new_holder, &name, new_return, &new_params);
                MethodLookup {
                    target,
                    prototype: below.prototype,
                }
            }
        }
    }

    /// Resolves a field reference the same way.
    #[must_use]
    pub fn lookup_field(&self, field: FieldRef, pools: &Pools) -> FieldRef {
        Self::resolve_field(&self.head, field, pools)
    }

    fn resolve_field(node: &LensNode, field: FieldRef, pools: &Pools) -> FieldRef {
        match node {
            LensNode::Identity => field,
            LensNode::Methods { previous, .. } => Self::resolve_field(previous, field, pools),
            LensNode::Fields { map, previous } => {
                let below = Self::resolve_field(previous, field, pools);
                map.get(&below).copied().unwrap_or(below)
            }
            LensNode::Types { map, previous } => {
                let below = Self::resolve_field(previous, field, pools);
                let rewrite = |ty: Type| map.get(&ty).copied().unwrap_or(ty);
                let data = *pools.field_data(below);
                let new_holder = rewrite(data.holder);
                let new_ty = rewrite(data.ty);
                if new_holder == data.holder && new_ty == data.ty {
                    return below;
                }
                let name = pools.strings.get(data.name).to_owned();
                pools.field(new_holder, &name, new_ty)
            }
        }
    }
}

fn compose_prototypes(first: &PrototypeChanges, second: &PrototypeChanges) -> PrototypeChanges {
    if first.is_identity() {
        return second.clone();
    }
    if second.is_identity() {
        return first.clone();
    }
    // Second-layer positions are relative to the signature after the
    // first removal; translate them back to original positions.
    let mut removed = first.removed_args.clone();
    for &pos in &second.removed_args {
        let mut original = pos;
        for &earlier in &first.removed_args {
            if earlier <= original {
                original += 1;
            }
        }
        removed.push(original);
    }
    removed.sort_unstable();
    removed.dedup();
    PrototypeChanges {
        removed_args: removed,
        return_changed_to: second.return_changed_to.or(first.return_changed_to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Pools;

    #[test]
    fn test_layers_compose_oldest_first() {
        let pools = Pools::new();
        let a = pools.class_type("Lapp/A;").unwrap();
        let b = pools.class_type("Lapp/B;").unwrap();
        let c = pools.class_type("Lapp/C;").unwrap();

        let lens = GraphLens::identity()
            .with_types(HashMap::from([(a, b)]))
            .with_types(HashMap::from([(b, c)]));

        // a renamed to b in wave one, b folded into c in wave two.
        assert_eq!(lens.lookup_type(a), c);
        assert_eq!(lens.lookup_type(b), c);
        assert_eq!(lens.lookup_type(c), c);
    }

    #[test]
    fn test_composition_is_associative() {
        let pools = Pools::new();
        let a = pools.class_type("Lapp/A;").unwrap();
        let b = pools.class_type("Lapp/B;").unwrap();
        let c = pools.class_type("Lapp/C;").unwrap();
        let d = pools.class_type("Lapp/D;").unwrap();

        let first = HashMap::from([(a, b)]);
        let second = HashMap::from([(b, c)]);
        let third = HashMap::from([(c, d)]);

        let grouped_left = GraphLens::identity()
            .with_types(first.clone())
            .with_types(second.clone())
            .with_types(third.clone());
        // Fuse the first two layers by hand, then append the third.
        let fused: HashMap<Type, Type> = first
            .iter()
            .map(|(&k, &v)| (k, second.get(&v).copied().unwrap_or(v)))
            .chain(second.iter().map(|(&k, &v)| (k, v)))
            .collect();
        let grouped_right = GraphLens::identity().with_types(fused).with_types(third);

        for ty in [a, b, c, d] {
            assert_eq!(grouped_left.lookup_type(ty), grouped_right.lookup_type(ty));
        }
    }

    #[test]
    fn test_method_rewritten_through_type_layer() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let a = pools.class_type("Lapp/A;").unwrap();
        let b = pools.class_type("Lapp/B;").unwrap();
        let on_a = pools.method(a, "run", wk.void, &[a]);

        let lens = GraphLens::identity().with_types(HashMap::from([(a, b)]));
        let lookup = lens.lookup_method(on_a, &pools);

        let expected = pools.method(b, "run", wk.void, &[b]);
        assert_eq!(lookup.target, expected);
        assert!(lookup.prototype.is_identity());
    }

    #[test]
    fn test_prototype_changes_carry_through() {
        let pools = Pools::new();
        let wk = *pools.types.well_known();
        let a = pools.class_type("Lapp/A;").unwrap();
        let before = pools.method(a, "f", wk.int, &[wk.int, wk.int]);
        let after = pools.method(a, "f$1", wk.int, &[wk.int]);

        let lens = GraphLens::identity().with_methods(HashMap::from([(
            before,
            MethodMapping {
                target: after,
                prototype: PrototypeChanges {
                    removed_args: vec![1],
                    return_changed_to: None,
                },
            },
        )]));

        let lookup = lens.lookup_method(before, &pools);
        assert_eq!(lookup.target, after);
        assert_eq!(lookup.prototype.removed_args, vec![1]);
        // Unmapped references pass through unchanged.
        assert_eq!(lens.lookup_method(after, &pools).target, after);
    }
}
