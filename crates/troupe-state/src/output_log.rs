use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use troupe_core::{RoleId, TroupeResult};

// ---------------------------------------------------------------------------
// OutputLog trait
// ---------------------------------------------------------------------------

/// Per-agent transcript of worker output, one entry per newly seen line.
#[async_trait]
pub trait OutputLog: Send + Sync {
    async fn append(&self, run_id: &str, role: &RoleId, lines: &[String]) -> TroupeResult<()>;
    /// Every line recorded for `role` in `run_id`, oldest first.
    async fn read(&self, run_id: &str, role: &RoleId) -> TroupeResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// FileOutputLog
// ---------------------------------------------------------------------------

/// Writes `<dir>/<run_id>.<role>.log`, next to the checkpoint and message log.
pub struct FileOutputLog {
    dir: PathBuf,
}

impl FileOutputLog {
    pub async fn new(dir: PathBuf) -> TroupeResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn log_path(&self, run_id: &str, role: &RoleId) -> PathBuf {
        self.dir.join(format!("{run_id}.{role}.log"))
    }
}

#[async_trait]
impl OutputLog for FileOutputLog {
    async fn append(&self, run_id: &str, role: &RoleId, lines: &[String]) -> TroupeResult<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(run_id, role))
            .await?;
        let mut chunk = lines.join("\n");
        chunk.push('\n');
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, run_id: &str, role: &RoleId) -> TroupeResult<Vec<String>> {
        let path = self.log_path(run_id, role);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(data.lines().map(str::to_string).collect())
    }
}

// ---------------------------------------------------------------------------
// InMemoryOutputLog
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryOutputLog {
    lines: RwLock<HashMap<(String, RoleId), Vec<String>>>,
}

impl InMemoryOutputLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutputLog for InMemoryOutputLog {
    async fn append(&self, run_id: &str, role: &RoleId, lines: &[String]) -> TroupeResult<()> {
        self.lines
            .write()
            .await
            .entry((run_id.to_string(), role.clone()))
            .or_default()
            .extend(lines.iter().cloned());
        Ok(())
    }

    async fn read(&self, run_id: &str, role: &RoleId) -> TroupeResult<Vec<String>> {
        Ok(self
            .lines
            .read()
            .await
            .get(&(run_id.to_string(), role.clone()))
            .cloned()
            .unwrap_or_default())
    }
}
