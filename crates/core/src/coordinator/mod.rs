//! The three message-driven coordinators of the control plane.
//!
//! - [`DepositCoordinator`] consumes operations and job outcomes, and
//!   promotes queued deposits into free slots
//! - [`JobCoordinator`] runs jobs and reports their outcomes
//! - [`PipelineCoordinator`] quiesces, resumes and stops the other two

mod config;
mod deposit;
mod job;
mod pipeline;
mod types;

pub use config::CoordinatorConfig;
pub use deposit::DepositCoordinator;
pub use job::JobCoordinator;
pub use pipeline::PipelineCoordinator;
pub use types::{CoordinatorError, PipelineStatus, PipelineTransition, Promotion};
