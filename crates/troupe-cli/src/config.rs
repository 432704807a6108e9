//! `troupe.toml` loading.
//!
//! Every section is optional. A file without `[[agents]]` runs the default
//! seven-role team.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use troupe_core::{AgentSpec, TroupeError, TroupeResult};
use troupe_orchestrator::{default_team, EngineConfig, TmuxConfig};

/// Top-level configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct TroupeConfig {
    /// Checkpoints and message logs live under `<data_dir>/runs`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub controller: TmuxConfig,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".troupe")
}

impl Default for TroupeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            engine: EngineConfig::default(),
            controller: TmuxConfig::default(),
            agents: Vec::new(),
        }
    }
}

impl TroupeConfig {
    pub fn parse(text: &str) -> TroupeResult<Self> {
        toml::from_str(text).map_err(|e| TroupeError::Config(format!("Invalid config: {e}")))
    }

    /// Read `path`. A missing file yields the defaults.
    pub async fn load(path: &Path) -> TroupeResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            TroupeError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let config = Self::parse(&text)?;
        info!(
            path = %path.display(),
            agents = config.agents.len(),
            "Config loaded"
        );
        Ok(config)
    }

    /// Declared agents, or the default team when none are declared.
    pub fn agents(&self) -> Vec<AgentSpec> {
        if self.agents.is_empty() {
            default_team()
        } else {
            self.agents.clone()
        }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }
}
