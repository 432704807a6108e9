use crate::spec::RoleId;
use thiserror::Error;

/// A convenience `Result` alias using [`TroupeError`].
pub type TroupeResult<T> = Result<T, TroupeError>;

/// Top-level error type for the Troupe workflow engine.
#[derive(Debug, Error)]
pub enum TroupeError {
    /// The process controller could not start an agent. Fatal for that agent only.
    #[error("Failed to spawn {role}: {reason}")]
    Spawn {
        /// Agent that failed to start.
        role: RoleId,
        /// Underlying cause.
        reason: String,
    },

    /// Reading an agent's captured output failed. Transient.
    #[error("Failed to capture output from {role}: {reason}")]
    Capture {
        /// Agent whose output could not be read.
        role: RoleId,
        /// Underlying cause.
        reason: String,
    },

    /// An agent exhausted its iteration or wall-clock budget.
    #[error("{role} timed out after {elapsed_secs}s ({iterations} iterations)")]
    AgentTimeout {
        /// Agent that timed out.
        role: RoleId,
        /// Wall-clock seconds since the agent started.
        elapsed_secs: u64,
        /// Poll cycles completed before the timeout.
        iterations: u32,
    },

    /// The dependency graph contains a cycle. Raised before any agent starts.
    #[error("Circular dependency detected: {}", format_cycle(.cycle))]
    CircularDependency {
        /// Roles on the cycle, in traversal order, first role repeated at the end.
        cycle: Vec<RoleId>,
    },

    /// Checkpoint state is missing, corrupt or inconsistent.
    #[error("State error: {0}")]
    State(String),

    /// Terminating or inspecting an agent process failed. Logged, never fatal.
    #[error("Process error for {role}: {reason}")]
    Process {
        /// Agent whose process misbehaved.
        role: RoleId,
        /// Underlying cause.
        reason: String,
    },

    /// Invalid configuration or agent specification.
    #[error("Config error: {0}")]
    Config(String),

    /// The whole run exceeded its tick budget.
    #[error(
        "Workflow timeout after {ticks} ticks (max: {max_ticks}). Completed {completed}/{total} agents."
    )]
    WorkflowTimeout {
        /// Ticks executed.
        ticks: u64,
        /// Configured budget.
        max_ticks: u64,
        /// Agents that reached `done`.
        completed: usize,
        /// Agents in the run.
        total: usize,
    },

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TroupeError {
    /// Whether an operator can resume the run after fixing the root cause.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TroupeError::Spawn { .. } | TroupeError::Capture { .. } | TroupeError::Io(_)
        )
    }

    /// The agent this error is attributed to, if any.
    pub fn role(&self) -> Option<&RoleId> {
        match self {
            TroupeError::Spawn { role, .. }
            | TroupeError::Capture { role, .. }
            | TroupeError::AgentTimeout { role, .. }
            | TroupeError::Process { role, .. } => Some(role),
            _ => None,
        }
    }
}

fn format_cycle(cycle: &[RoleId]) -> String {
    cycle
        .iter()
        .map(RoleId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
