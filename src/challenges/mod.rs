//! Challenge resolution engine.
//!
//! Classification, solver dispatch, injection/verification, and the retry
//! orchestration that ties them together.

pub mod core;
pub mod detectors;
pub mod inject;
pub mod orchestrator;
pub mod solvers;
