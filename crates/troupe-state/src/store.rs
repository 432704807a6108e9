use crate::checkpoint::WorkflowCheckpoint;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;
use troupe_core::{TroupeError, TroupeResult};

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persists `checkpoint`. A reader never observes a half-written file.
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> TroupeResult<()>;
    /// Loads the checkpoint for `run_id`, `None` if the run was never saved.
    async fn load(&self, run_id: &str) -> TroupeResult<Option<WorkflowCheckpoint>>;
    /// Run ids with a saved checkpoint, sorted.
    async fn list(&self) -> TroupeResult<Vec<String>>;
}

/// Checkpoints as pretty JSON files, one per run.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub async fn new(dir: PathBuf) -> TroupeResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn checkpoint_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}{CHECKPOINT_SUFFIX}"))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> TroupeResult<()> {
        let path = self.checkpoint_path(&checkpoint.run_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id = %checkpoint.run_id, tick = checkpoint.tick, "Checkpoint saved");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> TroupeResult<Option<WorkflowCheckpoint>> {
        let path = self.checkpoint_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let checkpoint: WorkflowCheckpoint = serde_json::from_str(&data).map_err(|e| {
            TroupeError::State(format!("Failed to parse checkpoint for run {run_id}: {e}"))
        })?;
        checkpoint.validate()?;
        Ok(Some(checkpoint))
    }

    async fn list(&self) -> TroupeResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(CHECKPOINT_SUFFIX) {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, WorkflowCheckpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> TroupeResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.run_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> TroupeResult<Option<WorkflowCheckpoint>> {
        Ok(self.checkpoints.read().await.get(run_id).cloned())
    }

    async fn list(&self) -> TroupeResult<Vec<String>> {
        let mut ids: Vec<String> = self.checkpoints.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
