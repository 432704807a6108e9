use crate::classifier::{tail, OutputClassifier};
use crate::controller::ProcessController;
use crate::types::{AgentRecord, PollOutcome};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use troupe_core::{AgentSpec, AgentStatus, OutputState, RoleId, TroupeError, TroupeResult};
use troupe_state::AgentCheckpoint;

/// Tuning knobs for output polling.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Upper bound for one `capture` call.
    pub capture_timeout: Duration,
    /// How long an unchanged capture may reuse its cached classification.
    pub cache_freshness: Duration,
    /// Lines of output the classifier looks at.
    pub tail_lines: usize,
    /// Consecutive capture failures tolerated before the agent is failed.
    pub max_capture_failures: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            capture_timeout: Duration::from_secs(10),
            cache_freshness: Duration::from_secs(3),
            tail_lines: 50,
            max_capture_failures: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    hash: String,
    text: String,
    state: OutputState,
    activity: Option<String>,
    matched_line: Option<String>,
    /// `None` for entries seeded from a checkpoint, which are always stale.
    at: Option<DateTime<Utc>>,
}

/// Polls running agents and turns raw captures into [`PollOutcome`]s.
///
/// Capturing and evaluating are split so the engine can run captures for
/// every agent concurrently and still apply the results one by one in
/// declaration order.
pub struct OutputCollector {
    config: CollectorConfig,
    classifiers: HashMap<RoleId, OutputClassifier>,
    fallback: OutputClassifier,
    cache: HashMap<RoleId, CacheEntry>,
    failures: HashMap<RoleId, u32>,
}

impl OutputCollector {
    /// A collector with the default classifier for each spec.
    pub fn new(config: CollectorConfig, specs: &[AgentSpec]) -> TroupeResult<Self> {
        let mut classifiers = HashMap::new();
        for spec in specs {
            let classifier = OutputClassifier::with_defaults(
                spec.completion_signal.as_deref(),
                config.tail_lines,
            )?;
            classifiers.insert(spec.role.clone(), classifier);
        }
        let fallback = OutputClassifier::with_defaults(None, config.tail_lines)?;
        Ok(Self {
            config,
            classifiers,
            fallback,
            cache: HashMap::new(),
            failures: HashMap::new(),
        })
    }

    /// Replace the classifier for one role.
    pub fn set_classifier(&mut self, role: RoleId, classifier: OutputClassifier) {
        self.classifiers.insert(role, classifier);
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Seed change detection from checkpointed output so a resumed run does
    /// not re-read lines it already processed.
    pub fn seed(&mut self, saved: &AgentCheckpoint) {
        let Some(hash) = saved.output_hash.clone() else {
            return;
        };
        self.cache.insert(
            saved.role.clone(),
            CacheEntry {
                hash,
                text: saved.last_output.clone(),
                state: saved.output_state,
                activity: Some(saved.activity.clone()).filter(|a| !a.is_empty()),
                matched_line: None,
                at: None,
            },
        );
    }

    /// Bounded tail of the last capture, for checkpoints.
    pub fn last_output(&self, role: &str) -> String {
        self.cache
            .get(role)
            .map(|e| tail(&e.text, self.config.tail_lines))
            .unwrap_or_default()
    }

    /// Drop cached state for a role, e.g. after a restart.
    pub fn forget(&mut self, role: &str) {
        self.cache.remove(role);
        self.failures.remove(role);
    }

    /// Wall-clock budget check. Runs before capturing so an agent whose
    /// output still reads `running` is timed out all the same. Time banked
    /// by interrupted workers counts, time spent stopped does not.
    pub fn check_duration(&self, record: &AgentRecord, now: DateTime<Utc>) -> Option<PollOutcome> {
        let started = record.started_at?;
        let elapsed = Duration::from_secs(record.active_secs)
            + (now - started).to_std().unwrap_or_default();
        if elapsed <= record.spec.max_duration() {
            return None;
        }
        Some(PollOutcome {
            status: AgentStatus::Timeout,
            output_state: record.output_state,
            iteration: record.iteration,
            activity: None,
            hash: None,
            changed: false,
            from_cache: false,
            appended: Vec::new(),
            reason: Some(format!(
                "exceeded max duration of {}s after {}s",
                record.spec.max_duration_secs,
                elapsed.as_secs()
            )),
        })
    }

    /// Capture output, bounded by the configured per-call timeout.
    pub async fn capture(
        &self,
        controller: &dyn ProcessController,
        record: &AgentRecord,
    ) -> TroupeResult<String> {
        let handle = record.handle.as_ref().ok_or_else(|| TroupeError::Capture {
            role: record.role().clone(),
            reason: "agent has no process handle".into(),
        })?;
        match tokio::time::timeout(self.config.capture_timeout, controller.capture(handle)).await {
            Ok(result) => result,
            Err(_) => Err(TroupeError::Capture {
                role: record.role().clone(),
                reason: format!(
                    "capture timed out after {}ms",
                    self.config.capture_timeout.as_millis()
                ),
            }),
        }
    }

    /// Budget check, capture and evaluation for a single agent.
    pub async fn poll(
        &mut self,
        controller: &dyn ProcessController,
        record: &AgentRecord,
        now: DateTime<Utc>,
    ) -> PollOutcome {
        if let Some(timeout) = self.check_duration(record, now) {
            return timeout;
        }
        let captured = self.capture(controller, record).await;
        self.evaluate(record, captured, now)
    }

    /// Turn one capture result into a poll outcome. Counts as one iteration.
    pub fn evaluate(
        &mut self,
        record: &AgentRecord,
        captured: TroupeResult<String>,
        now: DateTime<Utc>,
    ) -> PollOutcome {
        let role = record.role().clone();
        let iteration = record.iteration.saturating_add(1);

        let text = match captured {
            Ok(text) => {
                self.failures.remove(&role);
                text
            }
            Err(e) => return self.capture_failed(record, iteration, e),
        };

        let hash = hex::encode(Sha256::digest(text.as_bytes()));
        let previous = self.cache.get(&role);
        let changed = previous.map_or(true, |p| p.hash != hash);
        let fresh = !changed
            && previous
                .and_then(|p| p.at)
                .and_then(|at| (now - at).to_std().ok())
                .is_some_and(|age| age < self.config.cache_freshness);

        let (state, activity, matched_line, from_cache) = match previous {
            Some(p) if fresh => (p.state, p.activity.clone(), p.matched_line.clone(), true),
            _ => {
                let classifier = self.classifier_for(role.as_str());
                let detail = classifier.classify_detailed(&text);
                let activity = classifier.extract_activity(&text);
                (detail.state, activity, detail.matched_line, false)
            }
        };

        let appended = if changed {
            appended_lines(previous.map_or("", |p| p.text.as_str()), &text)
        } else {
            Vec::new()
        };

        if !from_cache {
            self.cache.insert(
                role.clone(),
                CacheEntry {
                    hash: hash.clone(),
                    text,
                    state,
                    activity: activity.clone(),
                    matched_line: matched_line.clone(),
                    at: Some(now),
                },
            );
        }

        debug!(
            role = %role,
            iteration,
            state = %state,
            changed,
            from_cache,
            appended = appended.len(),
            "Polled agent output"
        );

        let (status, reason) = match state {
            OutputState::Done => (AgentStatus::Done, None),
            OutputState::Error => (
                AgentStatus::Error,
                Some(format!(
                    "error detected in output: {}",
                    matched_line.unwrap_or_default()
                )),
            ),
            _ => budget_status(record, iteration),
        };

        PollOutcome {
            status,
            output_state: state,
            iteration,
            activity,
            hash: Some(hash),
            changed,
            from_cache,
            appended,
            reason,
        }
    }

    fn capture_failed(
        &mut self,
        record: &AgentRecord,
        iteration: u32,
        error: TroupeError,
    ) -> PollOutcome {
        let role = record.role().clone();
        let count = self.failures.entry(role.clone()).or_insert(0);
        *count += 1;
        let count = *count;
        let (status, reason) = if count >= self.config.max_capture_failures {
            warn!(role = %role, failures = count, error = %error, "Capture failures exhausted");
            (
                AgentStatus::Error,
                Some(format!("capture failed {count} consecutive times: {error}")),
            )
        } else {
            warn!(role = %role, failures = count, error = %error, "Capture failed, retrying next tick");
            budget_status(record, iteration)
        };
        PollOutcome {
            status,
            output_state: record.output_state,
            iteration,
            activity: None,
            hash: None,
            changed: false,
            from_cache: false,
            appended: Vec::new(),
            reason,
        }
    }

    fn classifier_for(&self, role: &str) -> &OutputClassifier {
        self.classifiers.get(role).unwrap_or(&self.fallback)
    }
}

fn budget_status(record: &AgentRecord, iteration: u32) -> (AgentStatus, Option<String>) {
    if iteration >= record.spec.max_iterations {
        (
            AgentStatus::Timeout,
            Some(format!(
                "iteration budget exhausted ({iteration}/{})",
                record.spec.max_iterations
            )),
        )
    } else {
        (AgentStatus::Running, None)
    }
}

/// Lines of `current` that were not present in `previous`.
///
/// Captures are windows over a scrolling log. The previous window is
/// aligned against the current one at the position with the longest
/// match that reaches back to the start of either window. Without any
/// alignment the whole current window is new.
pub fn appended_lines(previous: &str, current: &str) -> Vec<String> {
    let prev = normalized_lines(previous);
    let cur = normalized_lines(current);
    if prev.is_empty() {
        return cur.into_iter().map(str::to_string).collect();
    }

    let mut best: Option<(usize, usize)> = None;
    for end in 1..=cur.len() {
        let mut len = 0;
        while len < end && len < prev.len() && cur[end - 1 - len] == prev[prev.len() - 1 - len] {
            len += 1;
        }
        if len == 0 || len < end.min(prev.len()) {
            continue;
        }
        // Equal matches keep the earliest position, so a repeated line is never dropped.
        if best.map_or(true, |(best_len, _)| len > best_len) {
            best = Some((len, end));
        }
    }

    let start = best.map_or(0, |(_, end)| end);
    cur[start..].iter().map(|l| l.to_string()).collect()
}

fn normalized_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
