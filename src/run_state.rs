use serde::Serialize;

use crate::sequential::PipelineResult;

/// Where a caller's run stands. Passed into and returned from the
/// orchestrator instead of living in shared flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "data", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running {
        total: usize,
    },
    Completed(PipelineResult),
    Failed(String),
}

impl RunState {
    /// Moves to `Running`. A state that is already running is returned as
    /// the error so the caller keeps it.
    pub fn start(self, total: usize) -> Result<RunState, RunState> {
        match self {
            RunState::Running { .. } => Err(self),
            _ => Ok(RunState::Running { total }),
        }
    }

    pub fn complete(self, result: PipelineResult) -> RunState {
        RunState::Completed(result)
    }

    pub fn fail(self, message: impl Into<String>) -> RunState {
        RunState::Failed(message.into())
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    pub fn result(&self) -> Option<&PipelineResult> {
        match self {
            RunState::Completed(result) => Some(result),
            _ => None,
        }
    }
}
