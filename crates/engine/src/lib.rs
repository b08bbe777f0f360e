//! Skill lifecycle engine.
//!
//! Wires the skill store, usage tracker, merge engine, cross-domain
//! synthesizer and judge into one facade, and runs the periodic jobs on a
//! cycle cadence.

#![warn(missing_docs)]

pub mod scheduler;
pub mod setup;
pub mod engine;

pub use scheduler::{CycleSchedule, CycleScheduler, CycleTick};
pub use setup::{build_synthesizer, open_storage};
pub use engine::{BackgroundTask, CycleReport, LifecycleEngine, OutcomeReport};
