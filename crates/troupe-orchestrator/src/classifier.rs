use regex::Regex;
use troupe_core::{OutputState, TroupeError, TroupeResult};

/// Lines considered when extracting the activity summary.
const ACTIVITY_WINDOW: usize = 10;
/// Maximum characters of an activity summary.
const ACTIVITY_MAX_CHARS: usize = 60;

const ERROR_PATTERN: &str =
    r"(?m)(^\s*FATAL:|failed with exit code \d+|\bPermission denied\b|No space left on device)";
const WAITING_PATTERN: &str = r"(?i)\bwaiting\b";
const THINKING_PATTERN: &str = r"(?i)(⏺|\bcogitating\b|\bthinking\b)";
const ACTIVITY_PATTERN: &str = r"(?i)\b(writing|reading|creating|implementing|testing|researching)\b";

/// One `pattern -> state` rule. Rules are evaluated in order, first match wins.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub state: OutputState,
    pub pattern: Regex,
}

impl ClassifierRule {
    pub fn new(state: OutputState, pattern: &str) -> TroupeResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| TroupeError::Config(format!("Invalid classifier pattern: {e}")))?;
        Ok(Self { state, pattern })
    }
}

/// Result of classifying one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: OutputState,
    /// The line that triggered the rule, if any rule matched.
    pub matched_line: Option<String>,
}

/// Classifies captured worker output into an [`OutputState`].
///
/// Only the last `tail_lines` lines are inspected, so markers that scrolled
/// out of the window no longer count. The completion sentinel must stand on
/// a line of its own: a worker echoing its instructions mid-sentence does
/// not complete it.
#[derive(Debug, Clone)]
pub struct OutputClassifier {
    rules: Vec<ClassifierRule>,
    activity: Regex,
    tail_lines: usize,
}

impl OutputClassifier {
    /// An empty classifier: everything is `running` until rules are added.
    pub fn new(tail_lines: usize) -> TroupeResult<Self> {
        let activity = Regex::new(ACTIVITY_PATTERN)
            .map_err(|e| TroupeError::Config(format!("Invalid activity pattern: {e}")))?;
        Ok(Self {
            rules: Vec::new(),
            activity,
            tail_lines: tail_lines.max(1),
        })
    }

    /// The default rule set. `signal` restricts the completion sentinel to one
    /// word, otherwise any upper-case word is accepted.
    pub fn with_defaults(signal: Option<&str>, tail_lines: usize) -> TroupeResult<Self> {
        let word = match signal {
            Some(signal) => regex::escape(signal.trim()),
            None => "[A-Z][A-Z0-9_]*".to_string(),
        };
        let done = format!(r"(?m)^\s*<promise>\s*{word}\s*</promise>\s*$");
        Self::new(tail_lines)?
            .with_rule(OutputState::Done, &done)?
            .with_rule(OutputState::Error, ERROR_PATTERN)?
            .with_rule(OutputState::Waiting, WAITING_PATTERN)?
            .with_rule(OutputState::Thinking, THINKING_PATTERN)
    }

    /// Append a rule after the existing ones.
    pub fn with_rule(mut self, state: OutputState, pattern: &str) -> TroupeResult<Self> {
        self.rules.push(ClassifierRule::new(state, pattern)?);
        Ok(self)
    }

    /// Insert a rule ahead of every existing one.
    pub fn with_priority_rule(mut self, state: OutputState, pattern: &str) -> TroupeResult<Self> {
        self.rules.insert(0, ClassifierRule::new(state, pattern)?);
        Ok(self)
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }

    pub fn tail_lines(&self) -> usize {
        self.tail_lines
    }

    pub fn classify(&self, text: &str) -> OutputState {
        self.classify_detailed(text).state
    }

    pub fn classify_detailed(&self, text: &str) -> Classification {
        let tail = tail(text, self.tail_lines);
        for rule in &self.rules {
            if let Some(m) = rule.pattern.find(&tail) {
                return Classification {
                    state: rule.state,
                    matched_line: Some(line_around(&tail, m.start()).trim().to_string()),
                };
            }
        }
        Classification {
            state: OutputState::Running,
            matched_line: None,
        }
    }

    /// Most recent line describing what the worker is doing.
    pub fn extract_activity(&self, text: &str) -> Option<String> {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(ACTIVITY_WINDOW);
        lines[start..].iter().rev().find_map(|line| {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix('⏺') {
                Some(truncate(rest.trim()))
            } else if self.activity.is_match(line) {
                Some(truncate(line))
            } else {
                None
            }
        })
    }
}

/// The last `n` lines of `text`, trailing blank lines ignored.
pub(crate) fn tail(text: &str, n: usize) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

fn line_around(text: &str, offset: usize) -> &str {
    let start = text[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = text[offset..].find('\n').map_or(text.len(), |i| offset + i);
    &text[start..end]
}

fn truncate(line: &str) -> String {
    if line.chars().count() <= ACTIVITY_MAX_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(ACTIVITY_MAX_CHARS - 3).collect();
        format!("{cut}...")
    }
}
