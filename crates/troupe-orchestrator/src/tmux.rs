use crate::controller::ProcessController;
use crate::types::ProcessHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};
use troupe_core::{RoleId, TroupeError, TroupeResult};

/// Settings for [`TmuxController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TmuxConfig {
    #[serde(default = "default_session")]
    pub session: String,
    /// Directory each worker starts in.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Worker executable.
    #[serde(default = "default_command")]
    pub command: String,
    /// History lines read by every capture.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: u32,
    /// Extra arguments placed before `--model`.
    #[serde(default = "default_extra_args")]
    pub extra_args: Vec<String>,
}

fn default_session() -> String {
    "troupe-agents".into()
}

fn default_command() -> String {
    "claude".into()
}

fn default_capture_lines() -> u32 {
    100
}

fn default_extra_args() -> Vec<String> {
    vec!["--dangerously-skip-permissions".into()]
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            session: default_session(),
            working_dir: None,
            command: default_command(),
            capture_lines: default_capture_lines(),
            extra_args: default_extra_args(),
        }
    }
}

/// Runs every worker in its own window of a dedicated tmux session.
///
/// The window is named after the role, so the handle id is the tmux target
/// `<session>:<role>`.
pub struct TmuxController {
    config: TmuxConfig,
}

impl TmuxController {
    pub fn new(config: TmuxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TmuxConfig {
        &self.config
    }

    fn target(&self, role: &RoleId) -> String {
        format!("{}:{}", self.config.session, role)
    }

    /// Shell command line that launches a worker.
    pub fn worker_command(&self, prompt: &str, model: &str) -> String {
        let mut parts = vec![self.config.command.clone()];
        parts.extend(self.config.extra_args.iter().cloned());
        parts.push("--model".into());
        parts.push(model.to_string());
        parts.push(shell_quote(prompt));
        parts.join(" ")
    }

    async fn tmux(&self, args: &[&str]) -> Result<String, String> {
        debug!(args = ?args, "tmux");
        let output = tokio::process::Command::new("tmux")
            .args(args)
            .output()
            .await
            .map_err(|e| format!("failed to run tmux: {e}"))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(format!(
                "tmux {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }

    async fn ensure_session(&self) -> Result<(), String> {
        if self
            .tmux(&["has-session", "-t", &self.config.session])
            .await
            .is_ok()
        {
            return Ok(());
        }
        info!(session = %self.config.session, "Creating tmux session");
        self.tmux(&["new-session", "-d", "-s", &self.config.session, "-n", "main"])
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ProcessController for TmuxController {
    async fn start(&self, role: &RoleId, prompt: &str, model: &str) -> TroupeResult<ProcessHandle> {
        let spawn_err = |reason: String| TroupeError::Spawn {
            role: role.clone(),
            reason,
        };
        self.ensure_session().await.map_err(spawn_err)?;

        let target = self.target(role);
        // A stale window from an earlier attempt would shadow the new one.
        let _ = self.tmux(&["kill-window", "-t", &target]).await;
        self.tmux(&["new-window", "-t", &self.config.session, "-n", role.as_str()])
            .await
            .map_err(spawn_err)?;

        if let Some(dir) = &self.config.working_dir {
            let cd = format!("cd {}", shell_quote(&dir.to_string_lossy()));
            self.tmux(&["send-keys", "-t", &target, &cd, "Enter"])
                .await
                .map_err(spawn_err)?;
        }

        let command = self.worker_command(prompt, model);
        self.tmux(&["send-keys", "-t", &target, &command, "Enter"])
            .await
            .map_err(spawn_err)?;

        info!(role = %role, target = %target, model = %model, "Worker started in tmux");
        Ok(ProcessHandle::new(role.clone(), target))
    }

    async fn capture(&self, handle: &ProcessHandle) -> TroupeResult<String> {
        let start = format!("-{}", self.config.capture_lines);
        self.tmux(&["capture-pane", "-p", "-J", "-t", &handle.id, "-S", &start])
            .await
            .map_err(|reason| TroupeError::Capture {
                role: handle.role.clone(),
                reason,
            })
    }

    async fn terminate(&self, handle: &ProcessHandle) -> TroupeResult<()> {
        if !self.is_alive(handle).await {
            debug!(role = %handle.role, "Window already gone");
            return Ok(());
        }
        self.tmux(&["kill-window", "-t", &handle.id])
            .await
            .map(|_| ())
            .map_err(|reason| TroupeError::Process {
                role: handle.role.clone(),
                reason,
            })
    }

    async fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.tmux(&["display-message", "-p", "-t", &handle.id, "#{pane_id}"])
            .await
            .is_ok_and(|out| !out.trim().is_empty())
    }
}

/// Wrap `s` in single quotes for a POSIX shell.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
