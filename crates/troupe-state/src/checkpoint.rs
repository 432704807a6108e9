use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use troupe_core::{AgentStatus, OutputState, RoleId, RunStatus, TroupeError, TroupeResult};

/// Format version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Everything needed to rebuild one agent record on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub role: RoleId,
    pub status: AgentStatus,
    pub output_state: OutputState,
    pub iteration: u32,
    /// Incremented by every operator restart.
    #[serde(default)]
    pub attempt: u32,
    /// Start of the current worker. Cleared when the worker is interrupted.
    pub started_at: Option<DateTime<Utc>>,
    /// Seconds spent running by earlier, interrupted workers of this attempt.
    #[serde(default)]
    pub active_secs: u64,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Root-cause failed dependency for `blocked` agents.
    #[serde(default)]
    pub blocked_by: Option<RoleId>,
    /// Controller handle of the worker that was running at save time.
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub activity: String,
    #[serde(default)]
    pub output_hash: Option<String>,
    /// Bounded tail of the last captured output, used to seed change detection.
    #[serde(default)]
    pub last_output: String,
}

impl AgentCheckpoint {
    /// A fresh idle record for `role`.
    pub fn idle(role: RoleId) -> Self {
        Self {
            role,
            status: AgentStatus::Idle,
            output_state: OutputState::Running,
            iteration: 0,
            attempt: 0,
            started_at: None,
            active_secs: 0,
            ended_at: None,
            error: None,
            blocked_by: None,
            handle: None,
            activity: String::new(),
            output_hash: None,
            last_output: String::new(),
        }
    }
}

/// Snapshot of a whole run after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub version: u32,
    pub run_id: String,
    pub run_status: RunStatus,
    pub tick: u64,
    /// Agent records in declaration order.
    pub agents: Vec<AgentCheckpoint>,
    /// Highest message sequence number persisted to the log at save time.
    pub last_message_seq: u64,
    pub saved_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            run_id: run_id.into(),
            run_status: RunStatus::Initializing,
            tick: 0,
            agents: Vec::new(),
            last_message_seq: 0,
            saved_at: Utc::now(),
        }
    }

    pub fn agent(&self, role: &str) -> Option<&AgentCheckpoint> {
        self.agents.iter().find(|a| a.role.as_str() == role)
    }

    /// Rejects checkpoints written by an unknown format or with duplicate roles.
    pub fn validate(&self) -> TroupeResult<()> {
        if self.version != CHECKPOINT_VERSION {
            return Err(TroupeError::State(format!(
                "Unsupported checkpoint version {} for run {}",
                self.version, self.run_id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for agent in &self.agents {
            if !seen.insert(agent.role.as_str()) {
                return Err(TroupeError::State(format!(
                    "Duplicate agent '{}' in checkpoint for run {}",
                    agent.role, self.run_id
                )));
            }
        }
        Ok(())
    }

    pub fn count(&self, status: AgentStatus) -> usize {
        self.agents.iter().filter(|a| a.status == status).count()
    }
}
