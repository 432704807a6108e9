use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;

/// Identifier of a configured agent role (`researcher`, `developer`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    /// Creates a role identifier.
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Human-readable name: `product_manager` becomes `Product Manager`.
    pub fn display_name(&self) -> String {
        self.0
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RoleId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Borrow<str> for RoleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for RoleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Immutable configuration for one agent, loaded once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub role: RoleId,
    pub model: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Roles that must be `done` before this agent may start. Order is kept for display.
    #[serde(default)]
    pub depends_on: Vec<RoleId>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Replaces the default role prompt when set.
    #[serde(default)]
    pub custom_prompt: Option<String>,
    /// Word expected inside the completion sentinel. Any word is accepted when unset.
    #[serde(default)]
    pub completion_signal: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    40
}

fn default_max_duration_secs() -> u64 {
    3600
}

impl AgentSpec {
    /// Creates an enabled spec with no dependencies and default budgets.
    pub fn new(role: impl Into<RoleId>, model: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            model: model.into(),
            enabled: true,
            depends_on: Vec::new(),
            max_iterations: default_max_iterations(),
            max_duration_secs: default_max_duration_secs(),
            custom_prompt: None,
            completion_signal: None,
        }
    }

    pub fn with_dependencies<I, R>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<RoleId>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_max_duration(mut self, max: Duration) -> Self {
        self.max_duration_secs = max.as_secs();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }

    pub fn with_completion_signal(mut self, signal: impl Into<String>) -> Self {
        self.completion_signal = Some(signal.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Wall-clock budget as a [`Duration`].
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}
