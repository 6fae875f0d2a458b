//! Shared value types of the resolution engine.

mod types;

pub use types::{ChallengeKind, ChallengeObservation, InjectionResult, Selectors, Solution};
