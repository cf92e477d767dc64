pub mod resolver;

pub use resolver::{collapse_repeated_ids, resolve_close_pairs, DuplicateDecision, ResolutionOutcome};
