//! Durable state for Troupe workflow runs.
//!
//! A run is persisted under the data directory as
//! `<run_id>.checkpoint.json`, rewritten atomically after every tick, and
//! `<run_id>.messages.jsonl`, an append-only log of every bus message.
//! Worker output is kept per agent in `<run_id>.<role>.log`.

pub mod checkpoint;
pub mod message_log;
pub mod output_log;
pub mod store;

pub use checkpoint::{AgentCheckpoint, WorkflowCheckpoint, CHECKPOINT_VERSION};
pub use message_log::{FileMessageLog, InMemoryMessageLog, MessageLog};
pub use output_log::{FileOutputLog, InMemoryOutputLog, OutputLog};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
