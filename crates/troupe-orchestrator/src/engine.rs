use crate::bus::MessageBus;
use crate::collector::{CollectorConfig, OutputCollector};
use crate::controller::ProcessController;
use crate::profiles::{build_prompt, with_resolved_signals};
use crate::registry::AgentRegistry;
use crate::scheduler::DependencyScheduler;
use crate::types::{
    AgentRecord, FailurePolicy, FailureReport, PollOutcome, ProcessHandle, RunOutcome,
    RunSnapshot,
};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use troupe_core::{AgentSpec, AgentStatus, RoleId, RunStatus, TroupeError, TroupeResult};
use troupe_state::{CheckpointStore, MessageLog, OutputLog, WorkflowCheckpoint, CHECKPOINT_VERSION};

/// Engine tuning, usually read from the `[engine]` table of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pause between ticks.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    /// How long an unchanged capture may reuse its classification.
    #[serde(default = "default_cache_freshness_ms")]
    pub cache_freshness_ms: u64,
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
    #[serde(default = "default_max_capture_failures")]
    pub max_capture_failures: u32,
    /// What happens to the rest of the run when one agent fails.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Overall tick budget. Unlimited when unset.
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_capture_timeout_ms() -> u64 {
    10_000
}

fn default_cache_freshness_ms() -> u64 {
    3000
}

fn default_tail_lines() -> usize {
    50
}

fn default_max_capture_failures() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
            cache_freshness_ms: default_cache_freshness_ms(),
            tail_lines: default_tail_lines(),
            max_capture_failures: default_max_capture_failures(),
            failure_policy: FailurePolicy::default(),
            max_ticks: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            capture_timeout: Duration::from_millis(self.capture_timeout_ms),
            cache_freshness: Duration::from_millis(self.cache_freshness_ms),
            tail_lines: self.tail_lines,
            max_capture_failures: self.max_capture_failures.max(1),
        }
    }
}

/// Coordinates one workflow run.
///
/// The engine owns every piece of run state: the registry, the message bus
/// and its sequence counter, the output cache and the checkpoint writer.
/// Nothing here is shared between runs.
pub struct WorkflowEngine {
    run_id: String,
    config: EngineConfig,
    controller: Arc<dyn ProcessController>,
    store: Arc<dyn CheckpointStore>,
    scheduler: DependencyScheduler,
    registry: AgentRegistry,
    collector: OutputCollector,
    bus: MessageBus,
    output_log: Option<Arc<dyn OutputLog>>,
    status: RunStatus,
    tick: u64,
    snapshots: watch::Sender<RunSnapshot>,
}

impl WorkflowEngine {
    /// Build a fresh run. The dependency graph is validated before anything
    /// is started or written.
    pub fn new(
        run_id: impl Into<String>,
        specs: &[AgentSpec],
        config: EngineConfig,
        controller: Arc<dyn ProcessController>,
        store: Arc<dyn CheckpointStore>,
        log: Arc<dyn MessageLog>,
    ) -> TroupeResult<Self> {
        let run_id = run_id.into();
        let specs = with_resolved_signals(specs);
        let scheduler = DependencyScheduler::new(&specs)?;
        let registry = AgentRegistry::new(&specs)?;
        if registry.is_empty() {
            return Err(TroupeError::Config("No enabled agents to run".into()));
        }
        let collector = OutputCollector::new(config.collector_config(), &specs)?;
        let bus = MessageBus::new(run_id.clone(), registry.roles().cloned().collect(), log)?;
        Ok(Self::assemble(
            run_id,
            config,
            controller,
            store,
            scheduler,
            registry,
            collector,
            bus,
            RunStatus::Initializing,
            0,
        ))
    }

    /// Rebuild a run from its checkpoint and message log.
    ///
    /// Agents that were running are reattached when the controller still
    /// sees their worker and reset to `idle` otherwise. With `retry_failed`,
    /// failed agents are restarted and the agents they blocked released.
    pub async fn resume(
        run_id: impl Into<String>,
        specs: &[AgentSpec],
        config: EngineConfig,
        controller: Arc<dyn ProcessController>,
        store: Arc<dyn CheckpointStore>,
        log: Arc<dyn MessageLog>,
        retry_failed: bool,
    ) -> TroupeResult<Self> {
        let run_id = run_id.into();
        let checkpoint = store
            .load(&run_id)
            .await?
            .ok_or_else(|| TroupeError::State(format!("No checkpoint found for run {run_id}")))?;

        let specs = with_resolved_signals(specs);
        let scheduler = DependencyScheduler::new(&specs)?;
        let registry = AgentRegistry::from_checkpoint(&specs, &checkpoint.agents)?;
        let mut collector = OutputCollector::new(config.collector_config(), &specs)?;
        for saved in &checkpoint.agents {
            collector.seed(saved);
        }
        let bus = MessageBus::restore(
            run_id.clone(),
            registry.roles().cloned().collect(),
            log,
            checkpoint.last_message_seq,
        )
        .await?;

        let mut engine = Self::assemble(
            run_id,
            config,
            controller,
            store,
            scheduler,
            registry,
            collector,
            bus,
            checkpoint.run_status,
            checkpoint.tick,
        );
        info!(
            run_id = %engine.run_id,
            tick = engine.tick,
            status = %engine.status,
            "Resuming run from checkpoint"
        );

        engine.reconcile_running(checkpoint.saved_at).await?;
        if retry_failed {
            let failed: Vec<RoleId> = engine
                .registry
                .records()
                .iter()
                .filter(|r| matches!(r.status, AgentStatus::Error | AgentStatus::Timeout))
                .map(|r| r.role().clone())
                .collect();
            for role in failed {
                engine.restart_agent(&role).await?;
            }
        }
        if !engine.registry.all_terminal() || engine.status == RunStatus::Aborted {
            engine.status = RunStatus::Running;
        }
        engine.publish();
        Ok(engine)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        run_id: String,
        config: EngineConfig,
        controller: Arc<dyn ProcessController>,
        store: Arc<dyn CheckpointStore>,
        scheduler: DependencyScheduler,
        registry: AgentRegistry,
        collector: OutputCollector,
        bus: MessageBus,
        status: RunStatus,
        tick: u64,
    ) -> Self {
        let initial = RunSnapshot {
            run_id: run_id.clone(),
            status,
            tick,
            agents: registry.snapshot(Utc::now()),
            counts: registry.counts(),
            last_message_seq: bus.last_seq(),
        };
        let (snapshots, _) = watch::channel(initial);
        Self {
            run_id,
            config,
            controller,
            store,
            scheduler,
            registry,
            collector,
            bus,
            output_log: None,
            status,
            tick,
            snapshots,
        }
    }

    /// Record every new line of worker output per agent.
    pub fn with_output_log(mut self, log: Arc<dyn OutputLog>) -> Self {
        self.output_log = Some(log);
        self
    }

    // -- accessors ----------------------------------------------------------

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &DependencyScheduler {
        &self.scheduler
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Receiver that sees a new [`RunSnapshot`] after every tick.
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            status: self.status,
            tick: self.tick,
            agents: self.registry.snapshot(Utc::now()),
            counts: self.registry.counts(),
            last_message_seq: self.bus.last_seq(),
        }
    }

    /// Summary of the run so far.
    pub fn outcome(&self) -> RunOutcome {
        let failures = self
            .registry
            .records()
            .iter()
            .filter(|r| r.status.is_failure())
            .map(|r| FailureReport {
                role: r.role().clone(),
                status: r.status,
                reason: r.error.clone().unwrap_or_else(|| r.status.to_string()),
                blocked_by: r.blocked_by.clone(),
            })
            .collect();
        RunOutcome {
            run_id: self.run_id.clone(),
            status: self.status,
            ticks: self.tick,
            counts: self.registry.counts(),
            failures,
        }
    }

    // -- control loop -------------------------------------------------------

    /// Run until every agent is terminal.
    pub async fn run(&mut self) -> TroupeResult<RunOutcome> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until every agent is terminal or `shutdown` resolves, whichever
    /// comes first. Shutdown aborts the run.
    pub async fn run_until<F>(&mut self, shutdown: F) -> TroupeResult<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            run_id = %self.run_id,
            agents = self.registry.len(),
            policy = ?self.config.failure_policy,
            "Workflow run starting"
        );
        loop {
            let status = self.tick().await?;
            if status.is_terminal() {
                break;
            }
            tokio::select! {
                _ = &mut shutdown => {
                    self.abort("shutdown requested").await?;
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }
        let outcome = self.outcome();
        info!(
            run_id = %self.run_id,
            status = %outcome.status,
            ticks = outcome.ticks,
            counts = %outcome.counts,
            "Workflow run finished"
        );
        Ok(outcome)
    }

    /// One pass of the control loop. Returns the run status afterwards.
    pub async fn tick(&mut self) -> TroupeResult<RunStatus> {
        if self.status.is_terminal() {
            return Ok(self.status);
        }
        if self.status == RunStatus::Initializing {
            self.status = RunStatus::Running;
        }
        self.tick += 1;
        let now = Utc::now();
        let mut failed: Vec<RoleId> = Vec::new();

        // (a) start newly eligible agents, in declaration order
        for role in self.scheduler.eligible(&self.registry) {
            if !self.start_agent(&role, now).await? {
                failed.push(role);
            }
        }

        // (b) poll every running agent
        let running = self.registry.running();
        let mut outcomes = self.poll_running(&running, now).await;

        // (c) + (d) apply results sequentially in declaration order
        for role in &running {
            let Some(outcome) = outcomes.remove(role) else {
                continue;
            };
            if outcome.changed && !outcome.appended.is_empty() {
                self.record_output(role, &outcome.appended).await;
                self.ingest(role, &outcome.appended, now).await;
            }
            let released = self.registry.apply_poll(role.as_str(), &outcome, now)?;
            self.log_transition(role, &outcome);
            if let Some(handle) = released {
                self.terminate(&handle).await;
            }
            if outcome.status.is_failure() {
                failed.push(role.clone());
            }
        }

        // (e) failure policy
        self.apply_failure_policy(&failed, now).await?;

        // (g) settle the run status
        let budget_exhausted = self.settle(now).await?;

        // (f) persist
        self.persist().await?;

        if budget_exhausted {
            let counts = self.registry.counts();
            return Err(TroupeError::WorkflowTimeout {
                ticks: self.tick,
                max_ticks: self.config.max_ticks.unwrap_or_default(),
                completed: counts.done,
                total: counts.total(),
            });
        }
        Ok(self.status)
    }

    /// Stop every running agent and mark the run `aborted`. Interrupted
    /// agents go back to `idle` so a resume starts them again.
    pub async fn abort(&mut self, reason: &str) -> TroupeResult<()> {
        warn!(run_id = %self.run_id, reason = %reason, "Aborting run");
        let now = Utc::now();
        for role in self.registry.running() {
            if let Some(handle) = self.registry.reset_to_idle(role.as_str(), now)? {
                self.terminate(&handle).await;
            }
            self.collector.forget(role.as_str());
        }
        self.status = RunStatus::Aborted;
        self.persist().await
    }

    /// Operator kill. Idempotent: agents that are not running are left alone.
    pub async fn kill(&mut self, role: &str) -> TroupeResult<()> {
        let Some(record) = self.registry.get(role) else {
            return Err(TroupeError::State(format!("Unknown agent '{role}'")));
        };
        if record.status != AgentStatus::Running {
            debug!(role = %role, status = %record.status, "Kill ignored, agent not running");
            return Ok(());
        }
        let role = record.role().clone();
        let now = Utc::now();
        if let Some(handle) = self
            .registry
            .mark_error(role.as_str(), "killed by operator", now)?
        {
            self.terminate(&handle).await;
        }
        warn!(run_id = %self.run_id, role = %role, "Agent killed by operator");
        self.apply_failure_policy(&[role], now).await?;
        self.settle(now).await?;
        self.persist().await
    }

    /// Operator restart: archive the agent's record and start over from
    /// `idle`, releasing the agents its failure had blocked.
    pub async fn restart(&mut self, role: &str) -> TroupeResult<()> {
        if !self.registry.contains(role) {
            return Err(TroupeError::State(format!("Unknown agent '{role}'")));
        }
        self.restart_agent(&RoleId::from(role)).await?;
        if self.status.is_terminal() {
            self.status = RunStatus::Running;
        }
        self.persist().await
    }

    // -- tick steps ---------------------------------------------------------

    /// Returns `false` when the controller could not start the worker.
    async fn start_agent(&mut self, role: &RoleId, now: DateTime<Utc>) -> TroupeResult<bool> {
        let Some(record) = self.registry.get(role.as_str()) else {
            return Ok(true);
        };
        let prompt = build_prompt(&record.spec);
        let model = record.spec.model.clone();
        match self.controller.start(role, &prompt, &model).await {
            Ok(handle) => {
                self.registry.mark_running(role.as_str(), handle, now)?;
                info!(
                    run_id = %self.run_id,
                    tick = self.tick,
                    role = %role,
                    model = %model,
                    "Agent started"
                );
                Ok(true)
            }
            Err(e) => {
                error!(run_id = %self.run_id, role = %role, error = %e, "Failed to start agent");
                self.registry.mark_error(role.as_str(), e.to_string(), now)?;
                Ok(false)
            }
        }
    }

    /// Budget checks first, then concurrent captures for the rest.
    async fn poll_running(
        &mut self,
        running: &[RoleId],
        now: DateTime<Utc>,
    ) -> HashMap<RoleId, PollOutcome> {
        let mut outcomes = HashMap::new();
        let mut to_capture: Vec<&AgentRecord> = Vec::new();
        for role in running {
            let Some(record) = self.registry.get(role.as_str()) else {
                continue;
            };
            match self.collector.check_duration(record, now) {
                Some(timeout) => {
                    outcomes.insert(role.clone(), timeout);
                }
                None => to_capture.push(record),
            }
        }

        let controller = self.controller.as_ref();
        let captures = join_all(
            to_capture
                .iter()
                .map(|record| self.collector.capture(controller, record)),
        )
        .await;

        for (record, captured) in to_capture.into_iter().zip(captures) {
            let outcome = self.collector.evaluate(record, captured, now);
            outcomes.insert(record.role().clone(), outcome);
        }
        outcomes
    }

    async fn record_output(&self, role: &RoleId, lines: &[String]) {
        let Some(log) = &self.output_log else {
            return;
        };
        if let Err(e) = log.append(&self.run_id, role, lines).await {
            warn!(run_id = %self.run_id, role = %role, error = %e, "Could not write output log");
        }
    }

    async fn ingest(&mut self, role: &RoleId, lines: &[String], now: DateTime<Utc>) {
        match self.bus.ingest(role, lines, now).await {
            Ok(messages) => {
                for message in messages {
                    info!(
                        run_id = %self.run_id,
                        seq = message.seq,
                        sender = %message.sender,
                        recipient = %message.recipient,
                        kind = %message.kind,
                        severity = %message.severity,
                        "Message"
                    );
                }
            }
            Err(e) => {
                error!(run_id = %self.run_id, role = %role, error = %e, "Failed to record messages");
            }
        }
    }

    fn log_transition(&self, role: &RoleId, outcome: &PollOutcome) {
        let reason = outcome.reason.as_deref().unwrap_or_default();
        match outcome.status {
            AgentStatus::Done => info!(
                run_id = %self.run_id,
                role = %role,
                iterations = outcome.iteration,
                "Agent completed"
            ),
            AgentStatus::Timeout => warn!(
                run_id = %self.run_id,
                role = %role,
                iterations = outcome.iteration,
                reason = %reason,
                "Agent timed out"
            ),
            AgentStatus::Error => error!(
                run_id = %self.run_id,
                role = %role,
                reason = %reason,
                "Agent failed"
            ),
            _ => debug!(
                role = %role,
                state = %outcome.output_state,
                iteration = outcome.iteration,
                "Agent running"
            ),
        }
    }

    async fn apply_failure_policy(&mut self, failed: &[RoleId], now: DateTime<Utc>) -> TroupeResult<()> {
        let Some(first) = failed.first() else {
            return Ok(());
        };
        match self.config.failure_policy {
            FailurePolicy::FailFast => {
                warn!(run_id = %self.run_id, role = %first, "Fail-fast: stopping every agent");
                let reason = format!("terminated after failure of {first}");
                for role in self.registry.running() {
                    if let Some(handle) = self.registry.mark_error(role.as_str(), &reason, now)? {
                        self.terminate(&handle).await;
                    }
                }
                let idle: Vec<RoleId> = self
                    .registry
                    .records()
                    .iter()
                    .filter(|r| r.status == AgentStatus::Idle)
                    .map(|r| r.role().clone())
                    .collect();
                for role in idle {
                    self.registry.mark_blocked(role.as_str(), first, now)?;
                }
                self.status = RunStatus::Failed;
            }
            FailurePolicy::Graceful => {
                for root in failed {
                    for role in self.scheduler.downstream_of(root.as_str()) {
                        if self.registry.status(role.as_str()) == Some(AgentStatus::Idle) {
                            self.registry.mark_blocked(role.as_str(), root, now)?;
                            warn!(
                                run_id = %self.run_id,
                                role = %role,
                                blocked_by = %root,
                                "Agent blocked by failed dependency"
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Decide whether the run is finished. Returns `true` when the tick
    /// budget ran out.
    async fn settle(&mut self, now: DateTime<Utc>) -> TroupeResult<bool> {
        if self.status.is_terminal() {
            return Ok(false);
        }
        if self.registry.all_terminal() {
            self.status = if self.registry.counts().failed() == 0 {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            };
            return Ok(false);
        }
        if self.registry.running().is_empty() && self.scheduler.eligible(&self.registry).is_empty() {
            error!(
                run_id = %self.run_id,
                counts = %self.registry.counts(),
                "Run stalled: nothing running and nothing eligible"
            );
            self.status = RunStatus::Failed;
            return Ok(false);
        }
        if let Some(max) = self.config.max_ticks {
            if self.tick >= max {
                error!(run_id = %self.run_id, ticks = self.tick, max_ticks = max, "Workflow tick budget exhausted");
                for role in self.registry.running() {
                    let reason = format!("workflow tick budget of {max} exhausted");
                    if let Some(handle) = self.registry.mark_timeout(role.as_str(), reason, now)? {
                        self.terminate(&handle).await;
                    }
                }
                self.status = RunStatus::Failed;
                return Ok(true);
            }
        }
        Ok(false)
    }

    // -- helpers ------------------------------------------------------------

    /// A worker that is gone is charged running time up to `saved_at`, the
    /// last moment the engine saw it.
    async fn reconcile_running(&mut self, saved_at: DateTime<Utc>) -> TroupeResult<()> {
        for role in self.registry.running() {
            let alive = match self
                .registry
                .get(role.as_str())
                .and_then(|r| r.handle.as_ref())
            {
                Some(handle) => self.controller.is_alive(handle).await,
                None => false,
            };
            if alive {
                info!(run_id = %self.run_id, role = %role, "Reattached to running agent");
            } else {
                self.registry.reset_to_idle(role.as_str(), saved_at)?;
                self.collector.forget(role.as_str());
                warn!(run_id = %self.run_id, role = %role, "Agent process gone, will restart");
            }
        }
        Ok(())
    }

    async fn restart_agent(&mut self, role: &RoleId) -> TroupeResult<()> {
        if let Some(handle) = self.registry.restart(role.as_str())? {
            self.terminate(&handle).await;
        }
        self.collector.forget(role.as_str());
        info!(run_id = %self.run_id, role = %role, "Agent restarted");

        let blocked: Vec<RoleId> = self
            .registry
            .records()
            .iter()
            .filter(|r| r.status == AgentStatus::Blocked && r.blocked_by.as_ref() == Some(role))
            .map(|r| r.role().clone())
            .collect();
        for dependent in blocked {
            self.registry.restart(dependent.as_str())?;
            debug!(role = %dependent, root = %role, "Released blocked agent");
        }
        Ok(())
    }

    async fn terminate(&self, handle: &ProcessHandle) {
        if let Err(e) = self.controller.terminate(handle).await {
            warn!(role = %handle.role, error = %e, "Failed to terminate worker");
        }
    }

    async fn persist(&mut self) -> TroupeResult<()> {
        let mut agents = self.registry.to_checkpoint();
        for agent in &mut agents {
            agent.last_output = self.collector.last_output(agent.role.as_str());
        }
        let checkpoint = WorkflowCheckpoint {
            version: CHECKPOINT_VERSION,
            run_id: self.run_id.clone(),
            run_status: self.status,
            tick: self.tick,
            agents,
            last_message_seq: self.bus.last_seq(),
            saved_at: Utc::now(),
        };
        self.store.save(&checkpoint).await?;
        self.publish();
        Ok(())
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.snapshot());
    }
}
