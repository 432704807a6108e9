use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use troupe_core::{
    FileRef, Message, MessageKind, Recipient, RoleId, Severity, TroupeError, TroupeResult,
};
use troupe_state::MessageLog;

const MARKER_PATTERN: &str = r"(?i)^\s*\[(FINDING|QUESTION|ANSWER|COORD|COORDINATE|STATUS|CLAIM|PROGRESS|BLOCKED|COMPLETE|ERROR)\]\s*(?:@([A-Za-z0-9_\-]+)[:,]?\s*)?(.*)$";

/// A marker line parsed out of worker output, before it gets an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMarker {
    pub kind: MessageKind,
    pub recipient: Recipient,
    pub severity: Severity,
    pub body: String,
    pub location: Option<FileRef>,
}

/// Query filter for [`MessageBus::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub kind: Option<MessageKind>,
    /// Only messages sent by this role.
    pub sender: Option<RoleId>,
    /// Only messages visible in this role's inbox.
    pub recipient: Option<RoleId>,
}

impl MessageFilter {
    fn matches(&self, message: &Message) -> bool {
        self.kind.map_or(true, |k| k == message.kind)
            && self.sender.as_ref().map_or(true, |s| s == &message.sender)
            && self
                .recipient
                .as_ref()
                .map_or(true, |r| message.is_visible_to(r))
    }
}

/// Extracts structured messages from worker output and delivers them.
///
/// Every message is appended to the durable [`MessageLog`] before it gets a
/// sequence number in memory, so a sequence number is never handed out for
/// a message the log does not have.
pub struct MessageBus {
    run_id: String,
    log: Arc<dyn MessageLog>,
    roles: Vec<RoleId>,
    marker: Regex,
    messages: Vec<Message>,
    inboxes: HashMap<RoleId, Vec<usize>>,
    last_seq: u64,
}

impl MessageBus {
    pub fn new(
        run_id: impl Into<String>,
        roles: Vec<RoleId>,
        log: Arc<dyn MessageLog>,
    ) -> TroupeResult<Self> {
        let marker = Regex::new(MARKER_PATTERN)
            .map_err(|e| TroupeError::Config(format!("Invalid marker pattern: {e}")))?;
        let inboxes = roles.iter().map(|r| (r.clone(), Vec::new())).collect();
        Ok(Self {
            run_id: run_id.into(),
            log,
            roles,
            marker,
            messages: Vec::new(),
            inboxes,
            last_seq: 0,
        })
    }

    /// Rebuild from the durable log. `expected_seq` is the last sequence
    /// number the checkpoint saw; a shorter log means the files disagree.
    pub async fn restore(
        run_id: impl Into<String>,
        roles: Vec<RoleId>,
        log: Arc<dyn MessageLog>,
        expected_seq: u64,
    ) -> TroupeResult<Self> {
        let mut bus = Self::new(run_id, roles, log)?;
        let saved = bus.log.read(&bus.run_id).await?;
        for message in saved {
            bus.deliver(message);
        }
        if bus.last_seq < expected_seq {
            return Err(TroupeError::State(format!(
                "Message log for run {} ends at #{} but checkpoint expects #{}",
                bus.run_id, bus.last_seq, expected_seq
            )));
        }
        info!(run_id = %bus.run_id, messages = bus.messages.len(), "Message bus restored");
        Ok(bus)
    }

    /// Parse one line. Lines that are not markers yield `None`.
    pub fn parse_line(&self, line: &str) -> Option<ParsedMarker> {
        let caps = self.marker.captures(line)?;
        let kind = MessageKind::parse(caps.get(1)?.as_str())?;
        let body = caps.get(3).map_or("", |m| m.as_str()).trim();
        if body.is_empty() {
            return None;
        }
        let recipient = match caps.get(2).map(|m| m.as_str()) {
            None => Recipient::All,
            Some(target) if target.eq_ignore_ascii_case("all") => Recipient::All,
            Some(target) => Recipient::Role(self.resolve_role(target)),
        };
        let (severity, location) = parse_fields(body);
        Some(ParsedMarker {
            kind,
            recipient,
            severity,
            body: body.to_string(),
            location,
        })
    }

    /// Configured role matching `target` case-insensitively, spelled as
    /// configured. Unknown targets are lowercased.
    fn resolve_role(&self, target: &str) -> RoleId {
        self.roles
            .iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(target))
            .cloned()
            .unwrap_or_else(|| RoleId::new(target.to_ascii_lowercase()))
    }

    /// Scan newly appended lines from `sender`. Each line is looked at once;
    /// on a log failure the remaining lines are dropped with the error.
    pub async fn ingest(
        &mut self,
        sender: &RoleId,
        lines: &[String],
        now: DateTime<Utc>,
    ) -> TroupeResult<Vec<Message>> {
        let mut published = Vec::new();
        for line in lines {
            let Some(parsed) = self.parse_line(line) else {
                continue;
            };
            let message = Message {
                seq: self.last_seq + 1,
                timestamp: now,
                sender: sender.clone(),
                recipient: parsed.recipient,
                kind: parsed.kind,
                severity: parsed.severity,
                body: parsed.body,
                location: parsed.location,
            };
            self.log.append(&self.run_id, &message).await?;
            debug!(
                run_id = %self.run_id,
                seq = message.seq,
                sender = %message.sender,
                recipient = %message.recipient,
                kind = %message.kind,
                "Message published"
            );
            self.deliver(message.clone());
            published.push(message);
        }
        Ok(published)
    }

    /// Newest first, at most `limit` messages.
    pub fn inbox(&self, role: &str, limit: usize) -> Vec<&Message> {
        self.inboxes
            .get(role)
            .map(|indices| {
                indices
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|&i| &self.messages[i])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Newest first, at most `limit` messages matching `filter`.
    pub fn query(&self, filter: &MessageFilter, limit: usize) -> Vec<&Message> {
        self.messages
            .iter()
            .rev()
            .filter(|m| filter.matches(m))
            .take(limit)
            .collect()
    }

    /// Every message in sequence order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn deliver(&mut self, message: Message) {
        let index = self.messages.len();
        match &message.recipient {
            Recipient::All => {
                for role in self.roles.iter().filter(|r| *r != &message.sender) {
                    self.inboxes.entry(role.clone()).or_default().push(index);
                }
            }
            Recipient::Role(target) => {
                self.inboxes.entry(target.clone()).or_default().push(index);
            }
        }
        self.last_seq = self.last_seq.max(message.seq);
        self.messages.push(message);
    }
}

/// Pull `Severity:` and `File:`/`Line:` fields out of a pipe-separated body.
fn parse_fields(body: &str) -> (Severity, Option<FileRef>) {
    let mut severity = Severity::default();
    let mut path: Option<String> = None;
    let mut line: Option<u32> = None;
    for field in body.split('|') {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "severity" => {
                if let Some(parsed) = Severity::parse(value) {
                    severity = parsed;
                }
            }
            "file" => match value.rsplit_once(':') {
                Some((file, n)) if n.parse::<u32>().is_ok() => {
                    path = Some(file.to_string());
                    line = n.parse().ok();
                }
                _ => path = Some(value.to_string()),
            },
            "line" => {
                if let Ok(n) = value.parse() {
                    line = Some(n);
                }
            }
            _ => {}
        }
    }
    let location = path
        .filter(|p| !p.is_empty())
        .map(|path| FileRef { path, line });
    (severity, location)
}
