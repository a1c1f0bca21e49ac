//! Deposit jobs: what runs, in which order, and how it can fail.
//!
//! Jobs are opaque to the coordinators. They are resolved by class name
//! through a [`JobResolver`] and ordered by a [`JobSequencer`]. The defaults
//! are [`JobRegistry`] and [`OrderedJobSequencer`], both built from
//! [`JobsConfig`].

mod command;
mod config;
mod error;
mod registry;
mod sequencer;
mod traits;

pub use command::CommandJob;
pub use config::{JobDefinition, JobsConfig};
pub use error::{JobError, JOB_FAILED_CLASS, JOB_INTERRUPTED_CLASS};
pub use registry::{JobFactory, JobRegistry};
pub use sequencer::OrderedJobSequencer;
pub use traits::{DepositJob, JobResolver, JobSequencer};
