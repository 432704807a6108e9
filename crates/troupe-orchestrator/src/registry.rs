use crate::types::{AgentRecord, AgentSnapshot, PollOutcome, ProcessHandle, StatusCounts};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use troupe_core::{AgentSpec, AgentStatus, OutputState, RoleId, TroupeError, TroupeResult};
use troupe_state::AgentCheckpoint;

/// Canonical in-memory record of every enabled agent.
///
/// Records are kept in declaration order. All status changes go through the
/// methods here, which reject transitions the lifecycle does not allow.
/// Terminal transitions hand the process handle back to the caller so the
/// worker can be terminated.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    records: Vec<AgentRecord>,
    index: HashMap<RoleId, usize>,
    history: Vec<AgentRecord>,
}

impl AgentRegistry {
    /// One `idle` record per enabled spec.
    pub fn new(specs: &[AgentSpec]) -> TroupeResult<Self> {
        let mut registry = Self::default();
        for spec in specs.iter().filter(|s| s.enabled) {
            if registry.index.contains_key(&spec.role) {
                return Err(TroupeError::Config(format!(
                    "Duplicate agent role '{}'",
                    spec.role
                )));
            }
            registry
                .index
                .insert(spec.role.clone(), registry.records.len());
            registry.records.push(AgentRecord::new(spec.clone()));
        }
        Ok(registry)
    }

    /// Rebuild the registry from checkpointed records, preserving status,
    /// iteration counts and timestamps exactly.
    pub fn from_checkpoint(specs: &[AgentSpec], agents: &[AgentCheckpoint]) -> TroupeResult<Self> {
        let mut registry = Self::new(specs)?;
        for saved in agents {
            let record = registry.record_mut(saved.role.as_str()).map_err(|_| {
                TroupeError::State(format!(
                    "Checkpoint contains agent '{}' which is not configured",
                    saved.role
                ))
            })?;
            record.status = saved.status;
            record.output_state = saved.output_state;
            record.iteration = saved.iteration;
            record.attempt = saved.attempt;
            record.started_at = saved.started_at;
            record.active_secs = saved.active_secs;
            record.ended_at = saved.ended_at;
            record.error = saved.error.clone();
            record.blocked_by = saved.blocked_by.clone();
            record.activity = saved.activity.clone();
            record.output_hash = saved.output_hash.clone();
            record.handle = saved
                .handle
                .as_ref()
                .map(|id| ProcessHandle::new(saved.role.clone(), id.clone()));
        }
        if let Some(missing) = registry
            .records
            .iter()
            .find(|r| !agents.iter().any(|a| &a.role == r.role()))
        {
            return Err(TroupeError::State(format!(
                "Configured agent '{}' is missing from the checkpoint",
                missing.role()
            )));
        }
        Ok(registry)
    }

    /// Checkpoint rows in declaration order. `last_output` is left empty for
    /// the collector to fill in.
    pub fn to_checkpoint(&self) -> Vec<AgentCheckpoint> {
        self.records
            .iter()
            .map(|r| AgentCheckpoint {
                role: r.role().clone(),
                status: r.status,
                output_state: r.output_state,
                iteration: r.iteration,
                attempt: r.attempt,
                started_at: r.started_at,
                active_secs: r.active_secs,
                ended_at: r.ended_at,
                error: r.error.clone(),
                blocked_by: r.blocked_by.clone(),
                handle: r.handle.as_ref().map(|h| h.id.clone()),
                activity: r.activity.clone(),
                output_hash: r.output_hash.clone(),
                last_output: String::new(),
            })
            .collect()
    }

    pub fn get(&self, role: &str) -> Option<&AgentRecord> {
        self.index.get(role).map(|&i| &self.records[i])
    }

    pub fn status(&self, role: &str) -> Option<AgentStatus> {
        self.get(role).map(|r| r.status)
    }

    pub fn contains(&self, role: &str) -> bool {
        self.index.contains_key(role)
    }

    pub fn records(&self) -> &[AgentRecord] {
        &self.records
    }

    /// Records replaced by operator restarts, oldest first.
    pub fn history(&self) -> &[AgentRecord] {
        &self.history
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleId> {
        self.records.iter().map(AgentRecord::role)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Roles currently `running`, in declaration order.
    pub fn running(&self) -> Vec<RoleId> {
        self.records
            .iter()
            .filter(|r| r.status == AgentStatus::Running)
            .map(|r| r.role().clone())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.records.iter().all(|r| r.status.is_terminal())
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for record in &self.records {
            counts.add(record.status);
        }
        counts
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<AgentSnapshot> {
        self.records
            .iter()
            .map(|r| AgentSnapshot {
                role: r.role().clone(),
                model: r.spec.model.clone(),
                status: r.status,
                output_state: r.output_state,
                iteration: r.iteration,
                max_iterations: r.spec.max_iterations,
                attempt: r.attempt,
                activity: r.activity.clone(),
                duration_secs: r.elapsed_secs(now),
                depends_on: r.spec.depends_on.clone(),
                error: r.error.clone(),
                blocked_by: r.blocked_by.clone(),
            })
            .collect()
    }

    // -- transitions -------------------------------------------------------

    /// `idle -> running`.
    pub fn mark_running(
        &mut self,
        role: &str,
        handle: ProcessHandle,
        now: DateTime<Utc>,
    ) -> TroupeResult<()> {
        let record = self.expect_status(role, &[AgentStatus::Idle], AgentStatus::Running)?;
        record.status = AgentStatus::Running;
        record.output_state = OutputState::Running;
        record.handle = Some(handle);
        record.started_at = Some(now);
        record.ended_at = None;
        Ok(())
    }

    /// Fold a poll result into a running record. Returns the released handle
    /// when the outcome is terminal.
    pub fn apply_poll(
        &mut self,
        role: &str,
        outcome: &PollOutcome,
        now: DateTime<Utc>,
    ) -> TroupeResult<Option<ProcessHandle>> {
        let record = self.expect_status(role, &[AgentStatus::Running], outcome.status)?;
        record.iteration = record.iteration.max(outcome.iteration);
        record.output_state = outcome.output_state;
        if let Some(hash) = &outcome.hash {
            record.output_hash = Some(hash.clone());
        }
        if let Some(activity) = &outcome.activity {
            record.activity = activity.clone();
        }
        match outcome.status {
            AgentStatus::Running => Ok(None),
            AgentStatus::Done => self.mark_done(role, now),
            AgentStatus::Timeout => {
                let reason = outcome.reason.clone().unwrap_or_else(|| "timed out".into());
                self.mark_timeout(role, reason, now)
            }
            AgentStatus::Error => {
                let reason = outcome
                    .reason
                    .clone()
                    .unwrap_or_else(|| "error detected in output".into());
                self.mark_error(role, reason, now)
            }
            other => Err(TroupeError::State(format!(
                "Poll of '{role}' produced invalid status '{other}'"
            ))),
        }
    }

    /// `running -> done`.
    pub fn mark_done(&mut self, role: &str, now: DateTime<Utc>) -> TroupeResult<Option<ProcessHandle>> {
        let record = self.expect_status(role, &[AgentStatus::Running], AgentStatus::Done)?;
        record.status = AgentStatus::Done;
        record.output_state = OutputState::Done;
        Ok(Self::finish(record, now))
    }

    /// `idle | running -> error`. Idle covers spawn failures.
    pub fn mark_error(
        &mut self,
        role: &str,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> TroupeResult<Option<ProcessHandle>> {
        let record = self.expect_status(
            role,
            &[AgentStatus::Idle, AgentStatus::Running],
            AgentStatus::Error,
        )?;
        record.status = AgentStatus::Error;
        record.output_state = OutputState::Error;
        record.error = Some(reason.into());
        Ok(Self::finish(record, now))
    }

    /// `running -> timeout`.
    pub fn mark_timeout(
        &mut self,
        role: &str,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> TroupeResult<Option<ProcessHandle>> {
        let record = self.expect_status(role, &[AgentStatus::Running], AgentStatus::Timeout)?;
        record.status = AgentStatus::Timeout;
        record.error = Some(reason.into());
        Ok(Self::finish(record, now))
    }

    /// `idle -> blocked`, naming the failed upstream agent.
    pub fn mark_blocked(
        &mut self,
        role: &str,
        root_cause: &RoleId,
        now: DateTime<Utc>,
    ) -> TroupeResult<()> {
        let record = self.expect_status(role, &[AgentStatus::Idle], AgentStatus::Blocked)?;
        record.status = AgentStatus::Blocked;
        record.blocked_by = Some(root_cause.clone());
        record.error = Some(format!("dependency {root_cause} failed"));
        record.ended_at = Some(now);
        Ok(())
    }

    /// `running -> idle` for an interrupted worker. The iteration count is
    /// kept and the time it ran up to `stopped_at` is banked into
    /// `active_secs`, so the next worker's duration budget skips the gap.
    pub fn reset_to_idle(
        &mut self,
        role: &str,
        stopped_at: DateTime<Utc>,
    ) -> TroupeResult<Option<ProcessHandle>> {
        let record = self.expect_status(role, &[AgentStatus::Running], AgentStatus::Idle)?;
        if let Some(start) = record.started_at.take() {
            record.active_secs += (stopped_at - start).num_seconds().max(0) as u64;
        }
        record.status = AgentStatus::Idle;
        record.output_state = OutputState::Running;
        Ok(record.handle.take())
    }

    /// Operator restart: archive the current record and replace it with a
    /// fresh `idle` one. Returns the old handle if the agent was running.
    pub fn restart(&mut self, role: &str) -> TroupeResult<Option<ProcessHandle>> {
        let record = self.record_mut(role)?;
        let mut fresh = AgentRecord::new(record.spec.clone());
        fresh.attempt = record.attempt + 1;
        let mut old = std::mem::replace(record, fresh);
        let handle = old.handle.take();
        self.history.push(old);
        Ok(handle)
    }

    fn finish(record: &mut AgentRecord, now: DateTime<Utc>) -> Option<ProcessHandle> {
        record.ended_at = Some(now);
        record.handle.take()
    }

    fn record_mut(&mut self, role: &str) -> TroupeResult<&mut AgentRecord> {
        match self.index.get(role) {
            Some(&i) => Ok(&mut self.records[i]),
            None => Err(TroupeError::State(format!("Unknown agent '{role}'"))),
        }
    }

    fn expect_status(
        &mut self,
        role: &str,
        allowed: &[AgentStatus],
        to: AgentStatus,
    ) -> TroupeResult<&mut AgentRecord> {
        let record = self.record_mut(role)?;
        if !allowed.contains(&record.status) {
            return Err(TroupeError::State(format!(
                "Invalid transition for '{role}': {} -> {to}",
                record.status
            )));
        }
        Ok(record)
    }
}
