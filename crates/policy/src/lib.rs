//! Keel policy: the per-kind strategy table, the mutation pipeline applied to
//! every desired object and the merge policies deciding how (and whether) an
//! existing object is rewritten.

#![forbid(unsafe_code)]

mod json;
mod kinds;
pub mod merge;
pub mod mutate;
mod registry;

pub use merge::{is_ignored, merge_state, IGNORE_ANNOTATION};
pub use mutate::{mutate, MutationContext, MutationError};
pub use registry::{KindStrategy, MergeOutcome, PodLayout, StandardLabels, StrategyRegistry};
