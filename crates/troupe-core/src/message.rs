use crate::spec::RoleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an inter-agent message, written as `[KIND]` at the start of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Finding,
    Question,
    Answer,
    Coordinate,
    Status,
    Claim,
    Progress,
    Blocked,
    Complete,
    Error,
}

impl MessageKind {
    /// Every kind, in the order the prompt documents them.
    pub const ALL: [MessageKind; 10] = [
        MessageKind::Finding,
        MessageKind::Question,
        MessageKind::Answer,
        MessageKind::Coordinate,
        MessageKind::Status,
        MessageKind::Claim,
        MessageKind::Progress,
        MessageKind::Blocked,
        MessageKind::Complete,
        MessageKind::Error,
    ];

    /// The bracketed tag workers write, without brackets.
    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::Finding => "FINDING",
            MessageKind::Question => "QUESTION",
            MessageKind::Answer => "ANSWER",
            MessageKind::Coordinate => "COORD",
            MessageKind::Status => "STATUS",
            MessageKind::Claim => "CLAIM",
            MessageKind::Progress => "PROGRESS",
            MessageKind::Blocked => "BLOCKED",
            MessageKind::Complete => "COMPLETE",
            MessageKind::Error => "ERROR",
        }
    }

    /// Case-insensitive lookup by tag. `COORDINATE` is accepted as an alias of `COORD`.
    pub fn parse(tag: &str) -> Option<Self> {
        let upper = tag.trim().to_ascii_uppercase();
        if upper == "COORDINATE" {
            return Some(MessageKind::Coordinate);
        }
        Self::ALL.into_iter().find(|kind| kind.tag() == upper)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Importance attached to a message. Defaults to [`Severity::Info`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Addressee of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "role")]
pub enum Recipient {
    /// Every known role except the sender.
    All,
    Role(RoleId),
}

impl Recipient {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Recipient::All)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::All => f.write_str("all"),
            Recipient::Role(role) => write!(f, "{role}"),
        }
    }
}

/// Optional file location a message refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl fmt::Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{line}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// A message exchanged between agents through the bus.
///
/// `seq` is assigned by the bus, strictly increasing within a run and never
/// reused, so it doubles as the replay cursor stored in checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub sender: RoleId,
    pub recipient: Recipient,
    pub kind: MessageKind,
    #[serde(default)]
    pub severity: Severity,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FileRef>,
}

impl Message {
    /// Whether `role` should see this message in its inbox.
    pub fn is_visible_to(&self, role: &RoleId) -> bool {
        match &self.recipient {
            Recipient::All => &self.sender != role,
            Recipient::Role(target) => target == role,
        }
    }

    /// One-line rendering used by the CLI and prompt summaries.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "#{} [{}] {} -> {}: {}",
            self.seq, self.kind, self.sender, self.recipient, self.body
        );
        if self.severity != Severity::Info {
            line.push_str(&format!(" (severity: {})", self.severity));
        }
        if let Some(location) = &self.location {
            line.push_str(&format!(" @ {location}"));
        }
        line
    }
}
