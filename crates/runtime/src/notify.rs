use std::sync::Arc;

use foundation::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Payload of one notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Begin,
    Progress {
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Error {
        message: String,
    },
    Result {
        object: Value,
    },
}

impl JobEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Begin => "begin",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Error { .. } => "error",
            JobEvent::Result { .. } => "result",
        }
    }
}

/// Wire envelope: the event plus the job it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_url: Option<String>,
    pub origin: String,
    #[serde(flatten)]
    pub event: JobEvent,
}

/// A notification could not be delivered. Never fatal to the job.
#[derive(Debug)]
pub enum NotifyError {
    Encode(serde_json::Error),
    Transport(String),
    Closed,
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Encode(e) => write!(f, "failed to encode notification: {e}"),
            NotifyError::Transport(e) => write!(f, "notification delivery failed: {e}"),
            NotifyError::Closed => write!(f, "notification channel closed"),
        }
    }
}

impl std::error::Error for NotifyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NotifyError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

/// Transport behind the notifier (message queue, HTTP, log, memory).
pub trait NotifySink: Send + Sync {
    fn send(&self, message: &JobMessage) -> Result<(), NotifyError>;
}

/// Records messages in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    messages: Mutex<Vec<JobMessage>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<JobMessage> {
        self.messages.lock().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages.lock().iter().map(|m| m.event.kind()).collect()
    }

    pub fn drain(&self) -> Vec<JobMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl NotifySink for EventLog {
    fn send(&self, message: &JobMessage) -> Result<(), NotifyError> {
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

/// Emits every message as a structured log line.
#[derive(Debug, Default, Copy, Clone)]
pub struct TracingSink;

impl NotifySink for TracingSink {
    fn send(&self, message: &JobMessage) -> Result<(), NotifyError> {
        match &message.event {
            JobEvent::Progress {
                percent,
                eta,
                message: text,
            } => info!(
                job = %message.job_id,
                percent,
                eta = eta.as_deref().unwrap_or("-"),
                message = text.as_deref().unwrap_or(""),
                "progress"
            ),
            JobEvent::Error { message: text } => warn!(job = %message.job_id, "job failed: {text}"),
            other => info!(job = %message.job_id, event = other.kind(), "job event"),
        }
        Ok(())
    }
}

/// Progress emission policy: send when at least `min_interval_ms` has passed
/// since the last send, or immediately when the percentage jumped by more
/// than `jump_threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyPolicy {
    pub min_interval_ms: u64,
    pub jump_threshold: f64,
}

impl Default for NotifyPolicy {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            jump_threshold: 5.0,
        }
    }
}

/// Throttling front-end to a [`NotifySink`] for one job.
///
/// Delivery failures are logged and counted; they never reach the caller.
pub struct ProgressNotifier {
    job_id: String,
    queue_url: Option<String>,
    origin: String,
    sink: Arc<dyn NotifySink>,
    clock: Arc<dyn Clock>,
    policy: NotifyPolicy,
    last_sent_ms: u64,
    last_notified: f64,
    sent: u64,
    failures: u64,
}

impl ProgressNotifier {
    pub fn new(
        job_id: impl Into<String>,
        sink: Arc<dyn NotifySink>,
        clock: Arc<dyn Clock>,
        policy: NotifyPolicy,
    ) -> Self {
        let last_sent_ms = clock.now_ms();
        Self {
            job_id: job_id.into(),
            queue_url: None,
            origin: "subdivision".to_string(),
            sink,
            clock,
            policy,
            last_sent_ms,
            last_notified: 0.0,
            sent: 0,
            failures: 0,
        }
    }

    pub fn with_queue_url(mut self, queue_url: impl Into<String>) -> Self {
        self.queue_url = Some(queue_url.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn begin(&mut self) {
        self.deliver(JobEvent::Begin);
    }

    /// Sends a progress event if the policy allows it. Returns whether a send
    /// was attempted.
    pub fn progress(&mut self, percent: f64, eta: Option<String>, message: Option<&str>) -> bool {
        let now = self.clock.now_ms();
        let due = now.saturating_sub(self.last_sent_ms) > self.policy.min_interval_ms;
        let jumped = percent > self.last_notified + self.policy.jump_threshold;
        if !(due || jumped) {
            return false;
        }
        self.send_progress(now, percent, eta, message);
        true
    }

    /// Sends a progress event regardless of the throttle.
    pub fn force_progress(&mut self, percent: f64, eta: Option<String>, message: Option<&str>) {
        let now = self.clock.now_ms();
        self.send_progress(now, percent, eta, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.deliver(JobEvent::Error {
            message: message.into(),
        });
    }

    pub fn result(&mut self, object: Value) {
        self.deliver(JobEvent::Result { object });
    }

    fn send_progress(&mut self, now: u64, percent: f64, eta: Option<String>, message: Option<&str>) {
        let percent = percent.clamp(0.0, 100.0);
        self.last_notified = percent.floor();
        self.last_sent_ms = now;
        self.deliver(JobEvent::Progress {
            percent: percent as u8,
            eta,
            message: message.map(str::to_string),
        });
    }

    fn deliver(&mut self, event: JobEvent) {
        let msg = JobMessage {
            job_id: self.job_id.clone(),
            queue_url: self.queue_url.clone(),
            origin: self.origin.clone(),
            event,
        };
        match self.sink.send(&msg) {
            Ok(()) => {
                self.sent += 1;
                debug!(job = %self.job_id, event = msg.event.kind(), "notification sent");
            }
            Err(e) => {
                self.failures += 1;
                warn!(job = %self.job_id, event = msg.event.kind(), "{e}");
            }
        }
    }
}

impl std::fmt::Debug for ProgressNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressNotifier")
            .field("job_id", &self.job_id)
            .field("policy", &self.policy)
            .field("last_notified", &self.last_notified)
            .field("sent", &self.sent)
            .field("failures", &self.failures)
            .finish()
    }
}
