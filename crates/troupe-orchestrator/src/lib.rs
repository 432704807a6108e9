//! Workflow orchestration engine for externally running worker agents.
//!
//! Workers are opaque processes that only communicate through the text they
//! print. The engine starts them in dependency order, polls their output,
//! detects completion, failure and timeout from sentinel markers, relays
//! structured messages between them and checkpoints every tick so an
//! interrupted run can be resumed.
//!
//! # Main types
//!
//! - [`WorkflowEngine`]: Tick loop coordinating every other component.
//! - [`AgentRegistry`]: Canonical agent records and their transition rules.
//! - [`DependencyScheduler`]: Cycle detection, eligibility and execution order.
//! - [`OutputCollector`]: Capture, change detection, classification and budgets.
//! - [`OutputClassifier`]: Ordered `pattern -> state` rules over captured text.
//! - [`MessageBus`]: Marker parsing, durable message log and inboxes.
//! - [`ProcessController`]: Seam to whatever actually runs the workers.
//! - [`TmuxController`]: Runs each worker in its own tmux window.

/// Message extraction, persistence and inboxes.
pub mod bus;
/// Sentinel and vocabulary classification of captured output.
pub mod classifier;
/// Output polling with hashing, caching and budget enforcement.
pub mod collector;
/// Process controller trait.
pub mod controller;
/// The workflow engine and its tick loop.
pub mod engine;
/// Default team, prompts and completion signals.
pub mod profiles;
/// Agent records and lifecycle transitions.
pub mod registry;
/// Dependency graph validation and eligibility.
pub mod scheduler;
/// Tmux-backed process controller.
pub mod tmux;
/// Shared orchestration types (handles, poll outcomes, snapshots).
pub mod types;

pub use bus::{MessageBus, MessageFilter};
pub use classifier::{Classification, ClassifierRule, OutputClassifier};
pub use collector::{appended_lines, CollectorConfig, OutputCollector};
pub use controller::ProcessController;
pub use engine::{EngineConfig, WorkflowEngine};
pub use profiles::{build_prompt, default_team};
pub use registry::AgentRegistry;
pub use scheduler::DependencyScheduler;
pub use tmux::{TmuxConfig, TmuxController};
pub use types::{
    AgentRecord, AgentSnapshot, FailurePolicy, FailureReport, PollOutcome, ProcessHandle,
    RunOutcome, RunSnapshot, StatusCounts,
};
