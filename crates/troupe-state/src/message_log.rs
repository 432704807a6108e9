use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use troupe_core::{Message, TroupeError, TroupeResult};

// ---------------------------------------------------------------------------
// MessageLog trait
// ---------------------------------------------------------------------------

/// Append-only record of every message published during a run.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Durably appends one message. The bus only assigns the sequence number
    /// to its in-memory state once this returns `Ok`.
    async fn append(&self, run_id: &str, message: &Message) -> TroupeResult<()>;
    /// All messages of `run_id` in sequence order.
    async fn read(&self, run_id: &str) -> TroupeResult<Vec<Message>>;
}

// ---------------------------------------------------------------------------
// FileMessageLog
// ---------------------------------------------------------------------------

pub struct FileMessageLog {
    dir: PathBuf,
}

impl FileMessageLog {
    pub async fn new(dir: PathBuf) -> TroupeResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn log_path(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{run_id}.messages.jsonl"))
    }
}

#[async_trait]
impl MessageLog for FileMessageLog {
    async fn append(&self, run_id: &str, message: &Message) -> TroupeResult<()> {
        let path = self.log_path(run_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, run_id: &str) -> TroupeResult<Vec<Message>> {
        let path = self.log_path(run_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for (n, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line).map_err(|e| {
                TroupeError::State(format!(
                    "Corrupt message log for run {run_id} at line {}: {e}",
                    n + 1
                ))
            })?;
            messages.push(message);
        }
        messages.sort_by_key(|m| m.seq);
        Ok(messages)
    }
}

// ---------------------------------------------------------------------------
// InMemoryMessageLog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryMessageLog {
    runs: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn append(&self, run_id: &str, message: &Message) -> TroupeResult<()> {
        self.runs
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn read(&self, run_id: &str) -> TroupeResult<Vec<Message>> {
        Ok(self
            .runs
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
