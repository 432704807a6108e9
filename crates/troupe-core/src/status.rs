use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling status of one agent record.
///
/// `Done`, `Error`, `Timeout` and `Blocked` are terminal. Only an explicit
/// operator restart moves a record out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Waiting for dependencies or for the next tick.
    Idle,
    /// A worker process is alive and being polled.
    Running,
    /// The completion sentinel was observed.
    Done,
    /// Spawn failure, error vocabulary or escalated capture failures.
    Error,
    /// Iteration or wall-clock budget exhausted.
    Timeout,
    /// An upstream dependency failed; this agent will never start.
    Blocked,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AgentStatus::Done | AgentStatus::Error | AgentStatus::Timeout | AgentStatus::Blocked
        )
    }

    /// Terminal and not successful.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            AgentStatus::Error | AgentStatus::Timeout | AgentStatus::Blocked
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
            AgentStatus::Timeout => "timeout",
            AgentStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Classification of an agent's captured output.
///
/// `Waiting` and `Thinking` are display-only: the agent stays `Running`
/// from the scheduler's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    Running,
    Thinking,
    Waiting,
    Error,
    Done,
}

impl fmt::Display for OutputState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputState::Running => "running",
            OutputState::Thinking => "thinking",
            OutputState::Waiting => "waiting",
            OutputState::Error => "error",
            OutputState::Done => "done",
        };
        f.write_str(s)
    }
}

/// State of a whole workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Initializing,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Initializing => "initializing",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
