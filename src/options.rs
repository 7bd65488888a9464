//! Compilation options.

use crate::encode::PackingStrategy;

/// Tunables for one compilation. The defaults match the behavior the
/// integration tests pin down; embedders adjust selectively.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Lowest runtime API level the output must run on. Gates
    /// instruction selection through the API database.
    pub min_api: u32,
    /// Whether overflow may spill into additional containers. When
    /// `false`, exceeding one container's index spaces fails the
    /// compilation.
    pub multidex: bool,
    /// How classes are assigned to containers.
    pub packing: PackingStrategy,
    /// Largest callee body, in instructions, the inliner will copy.
    pub inline_budget: usize,
    /// Upper bound on scheduler waves per phase; a phase not at
    /// fixpoint by then stops with the facts it has.
    pub max_waves: usize,
    /// Master switch for the inliner.
    pub enable_inlining: bool,
    /// Master switch for class merging.
    pub enable_class_merging: bool,
    /// Master switch for enum unboxing.
    pub enable_enum_unboxing: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            min_api: 21,
            multidex: true,
            packing: PackingStrategy::Greedy,
            inline_budget: 12,
            max_waves: 10,
            enable_inlining: true,
            enable_class_merging: true,
            enable_enum_unboxing: true,
        }
    }
}

impl CompileOptions {
    /// Options with every structural optimization disabled, leaving
    /// only tracing, dead-code removal and encoding.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            enable_inlining: false,
            enable_class_merging: false,
            enable_enum_unboxing: false,
            ..Self::default()
        }
    }
}
