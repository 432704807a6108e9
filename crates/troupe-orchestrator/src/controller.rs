use crate::types::ProcessHandle;
use async_trait::async_trait;
use troupe_core::{RoleId, TroupeResult};

/// Starts, reads and stops worker processes.
///
/// The engine never looks inside a worker. Everything it knows comes from
/// [`capture`](ProcessController::capture), which returns the most recent
/// window of text the worker printed.
#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Start a worker for `role`. Errors should be [`TroupeError::Spawn`](troupe_core::TroupeError::Spawn).
    async fn start(&self, role: &RoleId, prompt: &str, model: &str) -> TroupeResult<ProcessHandle>;

    /// Current captured text. Errors should be [`TroupeError::Capture`](troupe_core::TroupeError::Capture).
    async fn capture(&self, handle: &ProcessHandle) -> TroupeResult<String>;

    /// Stop the worker. Must be a no-op for a worker that is already gone.
    async fn terminate(&self, handle: &ProcessHandle) -> TroupeResult<()>;

    /// Whether the worker behind `handle` still exists. Used when resuming.
    async fn is_alive(&self, _handle: &ProcessHandle) -> bool {
        false
    }
}
