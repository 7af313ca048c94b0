#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::too_many_lines,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap
)]

//! Cycle-accurate resource scheduler for exposed-pipeline VLIW targets.
//!
//! Resource usage is tracked per cycle in [`scoreboard::ResourceScoreboard`]
//! and queried through [`hazard::HazardRecognizer`]. On top of those sit the
//! region-level [`scheduler::ListScheduler`] and the software-pipelining
//! [`scheduler::ModuloScheduler`]. The static machine description lives in
//! [`config::TargetConfig`].

pub mod bundle;
pub mod config;
pub mod dep;
pub mod format;
pub mod hazard;
pub mod itinerary;
pub mod operation;
pub mod scheduler;
pub mod scoreboard;

#[cfg(test)]
pub mod testing;

pub use config::TargetConfig;
pub use scheduler::{
    ListScheduler, ModuloScheduler, Schedule, SchedulingContext, SuccessorInfo,
};
