#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use troupe_core::{
    AgentSpec, AgentStatus, MessageKind, Recipient, RoleId, RunStatus, Severity, TroupeError,
    TroupeResult,
};
use troupe_orchestrator::{
    EngineConfig, FailurePolicy, MessageFilter, ProcessController, ProcessHandle, WorkflowEngine,
};
use troupe_state::{
    CheckpointStore, FileCheckpointStore, FileMessageLog, FileOutputLog, InMemoryCheckpointStore,
    InMemoryMessageLog, MessageLog, OutputLog,
};

/// Controller that replays a script of captures per role. The last entry
/// of a script repeats forever.
#[derive(Default)]
struct ScriptedController {
    scripts: Mutex<HashMap<String, VecDeque<String>>>,
    fail_start: HashSet<String>,
    starts: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
    alive: Mutex<HashSet<String>>,
}

impl ScriptedController {
    fn new() -> Self {
        Self::default()
    }

    fn script(self, role: &str, captures: &[&str]) -> Self {
        self.scripts.lock().unwrap().insert(
            role.to_string(),
            captures.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    fn failing(mut self, role: &str) -> Self {
        self.fail_start.insert(role.to_string());
        self
    }

    fn with_alive(self, role: &str) -> Self {
        self.alive.lock().unwrap().insert(role.to_string());
        self
    }

    fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessController for ScriptedController {
    async fn start(&self, role: &RoleId, _prompt: &str, _model: &str) -> TroupeResult<ProcessHandle> {
        if self.fail_start.contains(role.as_str()) {
            return Err(TroupeError::Spawn {
                role: role.clone(),
                reason: "command not found".into(),
            });
        }
        self.starts.lock().unwrap().push(role.to_string());
        self.alive.lock().unwrap().insert(role.to_string());
        Ok(ProcessHandle::new(role.clone(), format!("test:{role}")))
    }

    async fn capture(&self, handle: &ProcessHandle) -> TroupeResult<String> {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(handle.role.as_str()) else {
            return Ok(String::new());
        };
        let text = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        };
        Ok(text)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> TroupeResult<()> {
        self.terminated.lock().unwrap().push(handle.role.to_string());
        self.alive.lock().unwrap().remove(handle.role.as_str());
        Ok(())
    }

    async fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.alive.lock().unwrap().contains(handle.role.as_str())
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval_ms: 1,
        ..EngineConfig::default()
    }
}

fn in_memory(
    specs: &[AgentSpec],
    controller: &Arc<ScriptedController>,
    config: EngineConfig,
) -> WorkflowEngine {
    WorkflowEngine::new(
        "run-1",
        specs,
        config,
        controller.clone(),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryMessageLog::new()),
    )
    .unwrap()
}

#[tokio::test]
async fn test_dependent_starts_the_tick_after_completion() {
    let specs = vec![
        AgentSpec::new("researcher", "opus"),
        AgentSpec::new("architect", "opus").with_dependencies(["researcher"]),
    ];
    let controller = Arc::new(
        ScriptedController::new()
            .script(
                "researcher",
                &[
                    "⏺ Reading the codebase",
                    "⏺ Reading the codebase\n[FINDING] The API uses REST | Severity: high",
                    "⏺ Reading the codebase\n[FINDING] The API uses REST | Severity: high\n<promise>RESEARCH_COMPLETE</promise>",
                ],
            )
            .script("architect", &["⏺ Designing modules"]),
    );
    let mut engine = in_memory(&specs, &controller, fast_config());

    for _ in 0..2 {
        engine.tick().await.unwrap();
        assert_eq!(engine.registry().status("researcher"), Some(AgentStatus::Running));
    }
    engine.tick().await.unwrap();
    assert_eq!(engine.registry().status("researcher"), Some(AgentStatus::Done));
    assert_eq!(engine.registry().status("architect"), Some(AgentStatus::Idle));
    assert_eq!(controller.terminated(), vec!["researcher"]);

    engine.tick().await.unwrap();
    assert_eq!(engine.registry().status("architect"), Some(AgentStatus::Running));
    assert_eq!(controller.starts(), vec!["researcher", "architect"]);
    assert_eq!(engine.registry().get("researcher").unwrap().iteration, 3);

    let finding = &engine.bus().messages()[0];
    assert_eq!(finding.kind, MessageKind::Finding);
    assert_eq!(finding.severity, Severity::High);
    assert_eq!(finding.recipient, Recipient::All);
    assert_eq!(engine.bus().inbox("architect", 10).len(), 1);
    assert!(engine.bus().inbox("researcher", 10).is_empty());
}

#[tokio::test]
async fn test_independent_agents_start_together_in_declaration_order() {
    let specs = vec![
        AgentSpec::new("tester", "sonnet"),
        AgentSpec::new("docs", "sonnet"),
        AgentSpec::new("reviewer", "sonnet").with_dependencies(["tester", "docs"]),
    ];
    let controller = Arc::new(ScriptedController::new());
    let mut engine = in_memory(&specs, &controller, fast_config());
    engine.tick().await.unwrap();
    assert_eq!(controller.starts(), vec!["tester", "docs"]);
    assert_eq!(engine.registry().status("reviewer"), Some(AgentStatus::Idle));
}

#[tokio::test]
async fn test_iteration_budget_times_out_the_run() {
    let specs = vec![AgentSpec::new("developer", "sonnet").with_max_iterations(5)];
    let controller = Arc::new(ScriptedController::new().script("developer", &["compiling"]));
    let mut engine = in_memory(&specs, &controller, fast_config());

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.ticks, 5);
    assert!(!outcome.is_success());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].status, AgentStatus::Timeout);
    assert_eq!(outcome.failures[0].reason, "iteration budget exhausted (5/5)");
    assert_eq!(controller.terminated(), vec!["developer"]);
}

#[tokio::test]
async fn test_full_team_completes() {
    let specs = vec![
        AgentSpec::new("researcher", "opus"),
        AgentSpec::new("architect", "opus").with_dependencies(["researcher"]),
        AgentSpec::new("developer", "sonnet").with_dependencies(["architect"]),
    ];
    let controller = Arc::new(
        ScriptedController::new()
            .script("researcher", &["working", "<promise>RESEARCH_COMPLETE</promise>"])
            .script("architect", &["<promise>ARCHITECTURE_COMPLETE</promise>"])
            .script(
                "developer",
                &["[CLAIM] @manager task 1", "<promise>IMPLEMENTATION_COMPLETE</promise>"],
            ),
    );
    let mut engine = in_memory(&specs, &controller, fast_config());
    let mut updates = engine.subscribe();

    let outcome = engine.run().await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.counts.done, 3);
    assert_eq!(outcome.ticks, 5);
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().status, RunStatus::Completed);

    let claim = &engine.bus().messages()[0];
    assert_eq!(claim.recipient, Recipient::Role("manager".into()));
    assert_eq!(engine.bus().inbox("manager", 5).len(), 1);
}

#[tokio::test]
async fn test_unchanged_output_is_parsed_once() {
    let specs = vec![AgentSpec::new("researcher", "opus")];
    let controller = Arc::new(
        ScriptedController::new().script("researcher", &["[FINDING] The cache is hot"]),
    );
    let mut engine = in_memory(&specs, &controller, fast_config());
    for _ in 0..4 {
        engine.tick().await.unwrap();
    }
    assert_eq!(engine.bus().messages().len(), 1);
    assert_eq!(engine.registry().get("researcher").unwrap().iteration, 4);
}

#[tokio::test]
async fn test_wall_clock_budget_times_out_running_agent() {
    let specs = vec![AgentSpec::new("developer", "sonnet").with_max_duration(Duration::ZERO)];
    let controller = Arc::new(ScriptedController::new().script("developer", &["compiling"]));
    let mut engine = in_memory(&specs, &controller, fast_config());

    engine.tick().await.unwrap();
    assert_eq!(engine.registry().status("developer"), Some(AgentStatus::Running));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(engine.tick().await.unwrap(), RunStatus::Failed);

    let developer = engine.registry().get("developer").unwrap();
    assert_eq!(developer.status, AgentStatus::Timeout);
    assert!(developer.error.as_deref().unwrap().contains("max duration of 0s"));
}

fn failing_team() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("researcher", "opus"),
        AgentSpec::new("docs", "sonnet"),
        AgentSpec::new("architect", "opus").with_dependencies(["researcher"]),
        AgentSpec::new("developer", "sonnet").with_dependencies(["architect"]),
    ]
}

fn failing_controller() -> Arc<ScriptedController> {
    Arc::new(
        ScriptedController::new()
            .script("researcher", &["FATAL: out of credits"])
            .script("docs", &["writing the guide"]),
    )
}

#[tokio::test]
async fn test_graceful_policy_blocks_only_downstream() {
    let controller = failing_controller();
    let mut engine = in_memory(&failing_team(), &controller, fast_config());
    assert_eq!(engine.tick().await.unwrap(), RunStatus::Running);

    let researcher = engine.registry().get("researcher").unwrap();
    assert_eq!(researcher.status, AgentStatus::Error);
    assert!(researcher.error.as_deref().unwrap().contains("FATAL: out of credits"));
    for role in ["architect", "developer"] {
        let record = engine.registry().get(role).unwrap();
        assert_eq!(record.status, AgentStatus::Blocked);
        assert_eq!(record.blocked_by, Some(RoleId::from("researcher")));
    }
    assert_eq!(engine.registry().status("docs"), Some(AgentStatus::Running));
}

#[tokio::test]
async fn test_fail_fast_policy_stops_the_run() {
    let controller = failing_controller();
    let config = EngineConfig {
        failure_policy: FailurePolicy::FailFast,
        ..fast_config()
    };
    let mut engine = in_memory(&failing_team(), &controller, config);
    assert_eq!(engine.tick().await.unwrap(), RunStatus::Failed);

    let docs = engine.registry().get("docs").unwrap();
    assert_eq!(docs.status, AgentStatus::Error);
    assert_eq!(docs.error.as_deref(), Some("terminated after failure of researcher"));
    assert!(controller.terminated().contains(&"docs".to_string()));
    assert_eq!(engine.registry().status("developer"), Some(AgentStatus::Blocked));
}

#[tokio::test]
async fn test_cycle_is_reported_before_anything_starts() {
    let specs = vec![
        AgentSpec::new("a", "m").with_dependencies(["c"]),
        AgentSpec::new("b", "m").with_dependencies(["a"]),
        AgentSpec::new("c", "m").with_dependencies(["b"]),
    ];
    let controller = Arc::new(ScriptedController::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let result = WorkflowEngine::new(
        "run-cycle",
        &specs,
        fast_config(),
        controller.clone(),
        store.clone(),
        Arc::new(InMemoryMessageLog::new()),
    );
    match result {
        Err(TroupeError::CircularDependency { cycle }) => {
            assert_eq!(cycle.first(), cycle.last());
            assert_eq!(cycle.len(), 4);
        }
        _ => panic!("expected a circular dependency error"),
    }
    assert!(controller.starts().is_empty());
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_spawn_failure_marks_agent_error() {
    let specs = vec![AgentSpec::new("researcher", "opus")];
    let controller = Arc::new(ScriptedController::new().failing("researcher"));
    let mut engine = in_memory(&specs, &controller, fast_config());
    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.failures[0].reason.contains("command not found"));
}

#[tokio::test]
async fn test_tick_budget_fails_the_run() {
    let specs = vec![AgentSpec::new("researcher", "opus")];
    let controller = Arc::new(ScriptedController::new().script("researcher", &["thinking"]));
    let store = Arc::new(InMemoryCheckpointStore::new());
    let mut engine = WorkflowEngine::new(
        "run-budget",
        &specs,
        EngineConfig {
            max_ticks: Some(3),
            ..fast_config()
        },
        controller.clone(),
        store.clone(),
        Arc::new(InMemoryMessageLog::new()),
    )
    .unwrap();

    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, TroupeError::WorkflowTimeout { ticks: 3, .. }));
    let saved = store.load("run-budget").await.unwrap().unwrap();
    assert_eq!(saved.run_status, RunStatus::Failed);
    assert_eq!(saved.agent("researcher").unwrap().status, AgentStatus::Timeout);
    assert_eq!(controller.terminated(), vec!["researcher"]);
}

#[tokio::test]
async fn test_shutdown_aborts_and_resume_restarts() {
    let specs = vec![AgentSpec::new("researcher", "opus")];
    let controller = Arc::new(ScriptedController::new().script("researcher", &["reading"]));
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let log: Arc<dyn MessageLog> = Arc::new(InMemoryMessageLog::new());
    let config = EngineConfig {
        poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    let mut engine = WorkflowEngine::new(
        "run-abort",
        &specs,
        config.clone(),
        controller.clone(),
        store.clone(),
        log.clone(),
    )
    .unwrap();

    let outcome = engine
        .run_until(tokio::time::sleep(Duration::from_millis(30)))
        .await
        .unwrap();
    assert_eq!(outcome.status, RunStatus::Aborted);
    assert_eq!(engine.registry().status("researcher"), Some(AgentStatus::Idle));
    assert_eq!(controller.terminated(), vec!["researcher"]);
    let saved = store.load("run-abort").await.unwrap().unwrap();
    assert_eq!(saved.run_status, RunStatus::Aborted);

    let mut resumed = WorkflowEngine::resume(
        "run-abort",
        &specs,
        config,
        controller.clone(),
        store,
        log,
        false,
    )
    .await
    .unwrap();
    assert_eq!(resumed.status(), RunStatus::Running);
    resumed.tick().await.unwrap();
    assert_eq!(controller.starts(), vec!["researcher", "researcher"]);
}

#[tokio::test]
async fn test_downtime_after_abort_is_not_charged() {
    let specs =
        vec![AgentSpec::new("researcher", "opus").with_max_duration(Duration::from_secs(600))];
    let controller = Arc::new(ScriptedController::new().script("researcher", &["reading"]));
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let log: Arc<dyn MessageLog> = Arc::new(InMemoryMessageLog::new());
    let mut engine = WorkflowEngine::new(
        "run-pause",
        &specs,
        fast_config(),
        controller.clone(),
        store.clone(),
        log.clone(),
    )
    .unwrap();
    engine.tick().await.unwrap();
    engine.abort("operator stop").await.unwrap();
    drop(engine);

    // The run sits aborted for an hour before it is resumed.
    let mut saved = store.load("run-pause").await.unwrap().unwrap();
    let hour = chrono::Duration::hours(1);
    saved.saved_at -= hour;
    let researcher = saved.agents.iter_mut().find(|a| a.role.as_str() == "researcher").unwrap();
    assert_eq!(researcher.status, AgentStatus::Idle);
    assert!(researcher.started_at.is_none());
    assert!(researcher.active_secs < 600);
    store.save(&saved).await.unwrap();

    let mut resumed =
        WorkflowEngine::resume("run-pause", &specs, fast_config(), controller.clone(), store, log, false)
            .await
            .unwrap();
    resumed.tick().await.unwrap();
    assert_eq!(resumed.registry().status("researcher"), Some(AgentStatus::Running));
    assert_eq!(controller.starts(), vec!["researcher", "researcher"]);
}

#[tokio::test]
async fn test_vanished_worker_is_charged_only_until_last_save() {
    let specs =
        vec![AgentSpec::new("researcher", "opus").with_max_duration(Duration::from_secs(600))];
    let controller = Arc::new(ScriptedController::new().script("researcher", &["reading"]));
    let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let log: Arc<dyn MessageLog> = Arc::new(InMemoryMessageLog::new());
    let mut engine = WorkflowEngine::new(
        "run-crash",
        &specs,
        fast_config(),
        controller.clone(),
        store.clone(),
        log.clone(),
    )
    .unwrap();
    engine.tick().await.unwrap();
    drop(engine);

    // The engine died an hour ago with the worker 30s into its run.
    let mut saved = store.load("run-crash").await.unwrap().unwrap();
    saved.saved_at = chrono::Utc::now() - chrono::Duration::hours(1);
    let researcher = saved.agents.iter_mut().find(|a| a.role.as_str() == "researcher").unwrap();
    assert_eq!(researcher.status, AgentStatus::Running);
    researcher.started_at = Some(saved.saved_at - chrono::Duration::seconds(30));
    store.save(&saved).await.unwrap();

    let fresh = Arc::new(ScriptedController::new().script("researcher", &["reading"]));
    let mut resumed =
        WorkflowEngine::resume("run-crash", &specs, fast_config(), fresh.clone(), store, log, false)
            .await
            .unwrap();
    let record = resumed.registry().get("researcher").unwrap();
    assert_eq!(record.status, AgentStatus::Idle);
    assert_eq!(record.active_secs, 30);
    assert!(record.started_at.is_none());

    resumed.tick().await.unwrap();
    assert_eq!(resumed.registry().status("researcher"), Some(AgentStatus::Running));
    assert_eq!(fresh.starts(), vec!["researcher"]);
}

async fn file_backends(dir: &std::path::Path) -> (Arc<dyn CheckpointStore>, Arc<dyn MessageLog>) {
    let store = FileCheckpointStore::new(dir.to_path_buf()).await.unwrap();
    let log = FileMessageLog::new(dir.to_path_buf()).await.unwrap();
    (Arc::new(store), Arc::new(log))
}

fn resume_team() -> Vec<AgentSpec> {
    vec![
        AgentSpec::new("researcher", "opus"),
        AgentSpec::new("manager", "opus"),
        AgentSpec::new("architect", "opus").with_dependencies(["researcher", "manager"]),
    ]
}

fn resume_controller() -> ScriptedController {
    ScriptedController::new()
        .script(
            "researcher",
            &[
                "⏺ Researching",
                "⏺ Researching\n[FINDING] Postgres 16 is required | File: db/schema.sql:3",
            ],
        )
        .script("manager", &["<promise>TASKS_CREATED</promise>"])
}

#[tokio::test]
async fn test_resume_restores_identical_state() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, log) = file_backends(tmp.path()).await;
    let controller = Arc::new(resume_controller());
    let mut engine = WorkflowEngine::new(
        "run-resume",
        &resume_team(),
        fast_config(),
        controller.clone(),
        store.clone(),
        log.clone(),
    )
    .unwrap();
    engine.tick().await.unwrap();
    engine.tick().await.unwrap();
    assert_eq!(engine.registry().status("manager"), Some(AgentStatus::Done));
    let records = engine.registry().records().to_vec();
    let messages = engine.bus().messages().to_vec();
    let eligible = engine.scheduler().eligible(engine.registry());
    drop(engine);

    let (store, log) = file_backends(tmp.path()).await;
    let reattached = Arc::new(resume_controller().with_alive("researcher"));
    let mut resumed = WorkflowEngine::resume(
        "run-resume",
        &resume_team(),
        fast_config(),
        reattached.clone(),
        store,
        log,
        false,
    )
    .await
    .unwrap();
    assert_eq!(resumed.ticks(), 2);
    assert_eq!(resumed.registry().records(), records.as_slice());
    assert_eq!(resumed.bus().messages(), messages.as_slice());
    assert_eq!(resumed.scheduler().eligible(resumed.registry()), eligible);

    // Replaying the same screen must not duplicate the finding.
    reattached
        .scripts
        .lock()
        .unwrap()
        .insert(
            "researcher".into(),
            VecDeque::from(vec![
                "⏺ Researching\n[FINDING] Postgres 16 is required | File: db/schema.sql:3".to_string(),
            ]),
        );
    resumed.tick().await.unwrap();
    assert_eq!(resumed.bus().last_seq(), 1);
    assert!(reattached.starts().is_empty());

    let filter = MessageFilter {
        kind: Some(MessageKind::Finding),
        ..MessageFilter::default()
    };
    let found = resumed.bus().query(&filter, 10);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].location.as_ref().unwrap().line, Some(3));
}

#[tokio::test]
async fn test_resume_restarts_vanished_workers() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, log) = file_backends(tmp.path()).await;
    let controller = Arc::new(resume_controller());
    let mut engine = WorkflowEngine::new(
        "run-gone",
        &resume_team(),
        fast_config(),
        controller.clone(),
        store.clone(),
        log.clone(),
    )
    .unwrap();
    engine.tick().await.unwrap();
    drop(engine);

    let fresh = Arc::new(resume_controller());
    let mut resumed = WorkflowEngine::resume(
        "run-gone",
        &resume_team(),
        fast_config(),
        fresh.clone(),
        store,
        log,
        false,
    )
    .await
    .unwrap();
    let researcher = resumed.registry().get("researcher").unwrap();
    assert_eq!(researcher.status, AgentStatus::Idle);
    assert_eq!(researcher.iteration, 1);

    resumed.tick().await.unwrap();
    assert_eq!(fresh.starts(), vec!["researcher"]);
    assert_eq!(resumed.registry().status("researcher"), Some(AgentStatus::Running));
}

#[tokio::test]
async fn test_retry_failed_releases_blocked_agents() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, log) = file_backends(tmp.path()).await;
    let controller = failing_controller();
    let mut engine = WorkflowEngine::new(
        "run-retry",
        &failing_team(),
        fast_config(),
        controller.clone(),
        store.clone(),
        log.clone(),
    )
    .unwrap();
    engine.tick().await.unwrap();
    assert_eq!(engine.registry().status("architect"), Some(AgentStatus::Blocked));
    drop(engine);

    let retry = Arc::new(ScriptedController::new().with_alive("docs"));
    let resumed = WorkflowEngine::resume(
        "run-retry",
        &failing_team(),
        fast_config(),
        retry,
        store,
        log,
        true,
    )
    .await
    .unwrap();
    let researcher = resumed.registry().get("researcher").unwrap();
    assert_eq!(researcher.status, AgentStatus::Idle);
    assert_eq!(researcher.attempt, 1);
    assert_eq!(resumed.registry().status("architect"), Some(AgentStatus::Idle));
    assert_eq!(resumed.registry().status("developer"), Some(AgentStatus::Idle));
    assert_eq!(resumed.registry().status("docs"), Some(AgentStatus::Running));
    assert_eq!(resumed.registry().history().len(), 3);
}

#[tokio::test]
async fn test_output_log_records_each_line_once() {
    let tmp = tempfile::tempdir().unwrap();
    let (store, log) = file_backends(tmp.path()).await;
    let output = Arc::new(FileOutputLog::new(tmp.path().to_path_buf()).await.unwrap());
    let controller = Arc::new(resume_controller());
    let mut engine = WorkflowEngine::new(
        "run-out",
        &resume_team(),
        fast_config(),
        controller,
        store,
        log,
    )
    .unwrap()
    .with_output_log(output.clone());
    for _ in 0..3 {
        engine.tick().await.unwrap();
    }

    assert!(tmp.path().join("run-out.researcher.log").exists());
    assert_eq!(
        output.read("run-out", &"researcher".into()).await.unwrap(),
        vec![
            "⏺ Researching".to_string(),
            "[FINDING] Postgres 16 is required | File: db/schema.sql:3".to_string(),
        ]
    );
    assert_eq!(
        output.read("run-out", &"manager".into()).await.unwrap(),
        vec!["<promise>TASKS_CREATED</promise>".to_string()]
    );
    assert!(output.read("run-out", &"architect".into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_without_checkpoint_is_state_error() {
    let result = WorkflowEngine::resume(
        "missing",
        &resume_team(),
        fast_config(),
        Arc::new(ScriptedController::new()),
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryMessageLog::new()),
        false,
    )
    .await;
    assert!(matches!(result, Err(TroupeError::State(_))));
}
