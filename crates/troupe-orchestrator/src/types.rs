use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use troupe_core::{AgentSpec, AgentStatus, OutputState, RoleId, RunStatus};

/// Opaque handle to a running worker, issued by a [`ProcessController`](crate::ProcessController).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessHandle {
    pub role: RoleId,
    /// Controller-specific identifier (a tmux target, a pid, ...).
    pub id: String,
}

impl ProcessHandle {
    pub fn new(role: RoleId, id: impl Into<String>) -> Self {
        Self {
            role,
            id: id.into(),
        }
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// What the engine should do when an agent fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Terminate every other agent and fail the run.
    FailFast,
    /// Block the failed agent's dependents and keep running independent branches.
    #[default]
    Graceful,
}

/// Mutable runtime record for one enabled agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    pub spec: AgentSpec,
    pub status: AgentStatus,
    pub output_state: OutputState,
    /// Poll cycles observed while running. Never decreases within an attempt.
    pub iteration: u32,
    pub attempt: u32,
    /// Start of the current worker, `None` while idle.
    pub started_at: Option<DateTime<Utc>>,
    /// Running time banked by interrupted workers. Downtime is never counted.
    pub active_secs: u64,
    pub ended_at: Option<DateTime<Utc>>,
    pub output_hash: Option<String>,
    pub activity: String,
    pub error: Option<String>,
    pub blocked_by: Option<RoleId>,
    /// Present only while `running`.
    pub handle: Option<ProcessHandle>,
}

impl AgentRecord {
    pub fn new(spec: AgentSpec) -> Self {
        Self {
            spec,
            status: AgentStatus::Idle,
            output_state: OutputState::Running,
            iteration: 0,
            attempt: 0,
            started_at: None,
            active_secs: 0,
            ended_at: None,
            output_hash: None,
            activity: String::new(),
            error: None,
            blocked_by: None,
            handle: None,
        }
    }

    pub fn role(&self) -> &RoleId {
        &self.spec.role
    }

    /// Seconds spent running, frozen at `ended_at` for finished agents.
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> u64 {
        let current = match self.started_at {
            Some(start) => {
                let end = self.ended_at.unwrap_or(now);
                (end - start).num_seconds().max(0) as u64
            }
            None => 0,
        };
        self.active_secs + current
    }
}

/// Result of polling one running agent.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// `Running`, or the terminal status the agent should move to.
    pub status: AgentStatus,
    pub output_state: OutputState,
    pub iteration: u32,
    /// New activity summary, `None` keeps the previous one.
    pub activity: Option<String>,
    pub hash: Option<String>,
    /// Output differs from the previous capture.
    pub changed: bool,
    /// Classification was served from the freshness cache.
    pub from_cache: bool,
    /// Lines appended since the previous capture. Empty unless `changed`.
    pub appended: Vec<String>,
    /// Why the agent failed or timed out.
    pub reason: Option<String>,
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Read-only view of one agent for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub role: RoleId,
    pub model: String,
    pub status: AgentStatus,
    pub output_state: OutputState,
    pub iteration: u32,
    pub max_iterations: u32,
    pub attempt: u32,
    pub activity: String,
    pub duration_secs: u64,
    pub depends_on: Vec<RoleId>,
    pub error: Option<String>,
    pub blocked_by: Option<RoleId>,
}

/// Aggregate status counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub idle: usize,
    pub running: usize,
    pub done: usize,
    pub error: usize,
    pub timeout: usize,
    pub blocked: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: AgentStatus) {
        match status {
            AgentStatus::Idle => self.idle += 1,
            AgentStatus::Running => self.running += 1,
            AgentStatus::Done => self.done += 1,
            AgentStatus::Error => self.error += 1,
            AgentStatus::Timeout => self.timeout += 1,
            AgentStatus::Blocked => self.blocked += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.idle + self.running + self.done + self.error + self.timeout + self.blocked
    }

    pub fn failed(&self) -> usize {
        self.error + self.timeout + self.blocked
    }
}

impl fmt::Display for StatusCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} done, {} running, {} idle, {} error, {} timeout, {} blocked",
            self.done,
            self.total(),
            self.running,
            self.idle,
            self.error,
            self.timeout,
            self.blocked
        )
    }
}

/// Read-only view of a whole run, published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: String,
    pub status: RunStatus,
    pub tick: u64,
    pub agents: Vec<AgentSnapshot>,
    pub counts: StatusCounts,
    pub last_message_seq: u64,
}

impl RunSnapshot {
    pub fn agent(&self, role: &str) -> Option<&AgentSnapshot> {
        self.agents.iter().find(|a| a.role.as_str() == role)
    }

    /// Serialize to pretty JSON for external consumers.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// One terminal failure, with the upstream root cause for blocked agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub role: RoleId,
    pub status: AgentStatus,
    pub reason: String,
    pub blocked_by: Option<RoleId>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.role, self.status, self.reason)?;
        if let Some(root) = &self.blocked_by {
            write!(f, " (root cause: {root})")?;
        }
        Ok(())
    }
}

/// Final result of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub ticks: u64,
    pub counts: StatusCounts,
    pub failures: Vec<FailureReport>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_counts() {
        let mut counts = StatusCounts::default();
        for status in [
            AgentStatus::Done,
            AgentStatus::Done,
            AgentStatus::Running,
            AgentStatus::Blocked,
            AgentStatus::Timeout,
        ] {
            counts.add(status);
        }
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.failed(), 2);
        assert_eq!(
            counts.to_string(),
            "2/5 done, 1 running, 0 idle, 0 error, 1 timeout, 1 blocked"
        );
    }

    #[test]
    fn test_elapsed_frozen_after_end() {
        let mut record = AgentRecord::new(AgentSpec::new("tester", "sonnet"));
        let start = Utc::now();
        record.started_at = Some(start);
        record.ended_at = Some(start + Duration::seconds(30));
        assert_eq!(record.elapsed_secs(start + Duration::seconds(500)), 30);
    }

    #[test]
    fn test_elapsed_includes_banked_time() {
        let mut record = AgentRecord::new(AgentSpec::new("tester", "sonnet"));
        record.active_secs = 120;
        assert_eq!(record.elapsed_secs(Utc::now()), 120);
        let start = Utc::now();
        record.started_at = Some(start);
        assert_eq!(record.elapsed_secs(start + Duration::seconds(15)), 135);
    }

    #[test]
    fn test_failure_report_display() {
        let report = FailureReport {
            role: "tester".into(),
            status: AgentStatus::Blocked,
            reason: "dependency developer failed".into(),
            blocked_by: Some("developer".into()),
        };
        assert_eq!(
            report.to_string(),
            "tester [blocked]: dependency developer failed (root cause: developer)"
        );
    }

    #[test]
    fn test_failure_policy_default_is_graceful() {
        assert_eq!(FailurePolicy::default(), FailurePolicy::Graceful);
        let parsed: FailurePolicy = serde_json::from_str("\"fail_fast\"").unwrap();
        assert_eq!(parsed, FailurePolicy::FailFast);
    }
}
