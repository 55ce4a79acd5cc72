//! The concurrency-effect lattice and the static analyses built on it:
//! capability flow, race detection, and deadlock detection.

pub mod analysis;
pub mod capability;
pub mod checker;
pub mod lattice;

pub use analysis::{DeadlockAnalysis, RaceAnalysis, analyze_deadlocks, analyze_races};
pub use capability::{Capability, FunctionEffect};
pub use checker::EffectChecker;
pub use lattice::{Effect, EffectLattice, EffectSet};
