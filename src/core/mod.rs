//! Core domain models
//!
//! This module defines workflow configuration, triggers, matrix
//! expansion, stage classification, and the job/step run model.

pub mod audit;
pub mod config;
pub mod context;
pub mod matrix;
pub mod stage;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use context::*;
pub use state::*;
pub use step::*;
pub use trigger::*;
pub use workflow::*;
