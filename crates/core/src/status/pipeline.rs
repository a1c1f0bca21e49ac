//! Pipeline run state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StoreError;

/// Run state of the whole pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Coordinators are recovering state after a restart.
    Starting,
    Active,
    /// Listeners stopped; resumable with UNQUIET.
    Quieted,
    /// Listeners shut down; requires a process restart.
    Stopped,
}

impl PipelineState {
    pub const ALL: [PipelineState; 4] = [
        PipelineState::Starting,
        PipelineState::Active,
        PipelineState::Quieted,
        PipelineState::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Starting => "starting",
            PipelineState::Active => "active",
            PipelineState::Quieted => "quieted",
            PipelineState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(PipelineState::Starting),
            "active" => Ok(PipelineState::Active),
            "quieted" => Ok(PipelineState::Quieted),
            "stopped" => Ok(PipelineState::Stopped),
            other => Err(format!("unknown pipeline state: {}", other)),
        }
    }
}

/// Storage for the shared pipeline state flag.
pub trait PipelineStateStore: Send + Sync {
    /// Current state, or `None` if the pipeline was never initialised.
    fn get_pipeline_state(&self) -> Result<Option<PipelineState>, StoreError>;

    fn set_pipeline_state(&self, state: PipelineState) -> Result<(), StoreError>;
}
