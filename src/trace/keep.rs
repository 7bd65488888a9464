//! Keep rules: externally visible entry points.
//!
//! A keep rule names classes (and optionally members) that must survive
//! compilation under their original identity. Matched items seed the
//! reachability trace and are pinned against renaming, merging and
//! unboxing.

use crate::model::{Application, ClassDef, FieldRef, MethodRef, Pools};

/// One keep rule. The class pattern matches type descriptors; the
/// optional member pattern matches method or field names.
///
/// Patterns support `*` as a suffix wildcard, so `Lapp/api/*` matches
/// every type under that package and `get*` matches every getter.
#[derive(Debug, Clone)]
pub struct KeepRule {
    class_pattern: String,
    member_pattern: Option<String>,
}

impl KeepRule {
    /// A rule keeping a whole class, all members included.
    #[must_use]
    pub fn class(pattern: impl Into<String>) -> Self {
        Self {
            class_pattern: pattern.into(),
            member_pattern: None,
        }
    }

    /// A rule keeping matching members of matching classes.
    #[must_use]
    pub fn member(class: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            class_pattern: class.into(),
            member_pattern: Some(member.into()),
        }
    }

    fn pattern_matches(pattern: &str, candidate: &str) -> bool {
        match pattern.strip_suffix('*') {
            Some(prefix) => candidate.starts_with(prefix),
            None => candidate == pattern,
        }
    }

    /// Whether the rule's class pattern covers a descriptor.
    #[must_use]
    pub fn matches_class(&self, descriptor: &str) -> bool {
        Self::pattern_matches(&self.class_pattern, descriptor)
    }

    /// Whether the rule keeps every member of matched classes.
    #[must_use]
    pub fn keeps_all_members(&self) -> bool {
        self.member_pattern.is_none()
    }

    /// Whether the rule covers a member name in a matched class.
    #[must_use]
    pub fn matches_member(&self, name: &str) -> bool {
        match &self.member_pattern {
            Some(pattern) => Self::pattern_matches(pattern, name),
            None => true,
        }
    }
}

/// The full rule set for one compilation.
#[derive(Debug, Clone, Default)]
pub struct KeepRules {
    rules: Vec<KeepRule>,
}

impl KeepRules {
    /// Builds a rule set.
    #[must_use]
    pub fn new(rules: Vec<KeepRule>) -> Self {
        Self { rules }
    }

    /// Whether any rule names this class, for any member scope.
    #[must_use]
    pub fn keeps_class(&self, descriptor: &str) -> bool {
        self.rules.iter().any(|r| r.matches_class(descriptor))
    }

    /// Whether the class itself is pinned: a class-level rule, or any
    /// member rule, forbids renaming or removing the class.
    #[must_use]
    pub fn pins_class(&self, descriptor: &str) -> bool {
        self.keeps_class(descriptor)
    }

    /// Methods of `class` that the rules name as roots.
    #[must_use]
    pub fn kept_methods(&self, class: &ClassDef, pools: &Pools) -> Vec<MethodRef> {
        let descriptor = pools.types.descriptor(class.ty).to_owned();
        class
            .methods
            .iter()
            .filter(|m| {
                let name = pools.method_name(m.reference);
                self.rules
                    .iter()
                    .any(|r| r.matches_class(&descriptor) && r.matches_member(name))
            })
            .map(|m| m.reference)
            .collect()
    }

    /// Fields of `class` that the rules name as roots.
    #[must_use]
    pub fn kept_fields(&self, class: &ClassDef, pools: &Pools) -> Vec<FieldRef> {
        let descriptor = pools.types.descriptor(class.ty).to_owned();
        class
            .fields
            .iter()
            .filter(|f| {
                let name = pools.strings.get(pools.field_data(f.reference).name);
                self.rules
                    .iter()
                    .any(|r| r.matches_class(&descriptor) && r.matches_member(name))
            })
            .map(|f| f.reference)
            .collect()
    }

    /// All classes in the application matched by any rule.
    #[must_use]
    pub fn matched_classes(&self, app: &Application) -> Vec<crate::model::Type> {
        app.classes()
            .filter(|c| self.keeps_class(app.pools().types.descriptor(c.ty)))
            .map(|c| c.ty)
            .collect()
    }

    /// True when no rules were supplied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_and_wildcard_class_patterns() {
        let rules = KeepRules::new(vec![
            KeepRule::class("Lapp/Main;"),
            KeepRule::class("Lapp/api/*"),
        ]);
        assert!(rules.keeps_class("Lapp/Main;"));
        assert!(rules.keeps_class("Lapp/api/Service;"));
        assert!(!rules.keeps_class("Lapp/internal/Impl;"));
    }

    #[test]
    fn test_member_pattern_narrows_the_match() {
        let rule = KeepRule::member("Lapp/Main;", "get*");
        assert!(rule.matches_class("Lapp/Main;"));
        assert!(rule.matches_member("getName"));
        assert!(!rule.matches_member("setName"));
        assert!(!rule.keeps_all_members());
    }
}
