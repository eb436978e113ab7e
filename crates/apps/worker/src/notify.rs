//! Delivery of job events to a notify queue.
//!
//! The progress pipeline runs synchronously, so [`QueueSink`] only enqueues
//! messages on an unbounded channel; a background task posts them in order.
//! HTTP clients are cached per queue region for the lifetime of the worker.

use std::collections::HashMap;

use parking_lot::RwLock;
use runtime::{JobMessage, NotifyError, NotifySink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One HTTP client per queue region, created on first use.
#[derive(Debug)]
pub struct ClientCache {
    default_region: String,
    clients: RwLock<HashMap<String, reqwest::Client>>,
}

impl ClientCache {
    pub fn new(default_region: impl Into<String>) -> Self {
        Self {
            default_region: default_region.into(),
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Client for the region `queue_url` lives in.
    pub fn for_queue(&self, queue_url: &str) -> reqwest::Client {
        let region = region_from_queue_url(queue_url).unwrap_or_else(|| self.default_region.clone());
        if let Some(client) = self.clients.read().get(&region) {
            return client.clone();
        }
        self.clients
            .write()
            .entry(region)
            .or_insert_with_key(|region| {
                debug!(region = %region, "creating queue client");
                reqwest::Client::new()
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }
}

/// Region of an `https://sqs.<region>.amazonaws.com/...` queue URL.
pub fn region_from_queue_url(queue_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(queue_url).ok()?;
    let host = url.host_str()?;
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() >= 4 && parts[0] == "sqs" && parts[2] == "amazonaws" {
        Some(parts[1].to_string())
    } else {
        None
    }
}

/// Enqueues job messages for the poster task.
#[derive(Debug, Clone)]
pub struct QueueSink {
    tx: mpsc::UnboundedSender<JobMessage>,
}

impl NotifySink for QueueSink {
    fn send(&self, message: &JobMessage) -> Result<(), NotifyError> {
        self.tx.send(message.clone()).map_err(|_| NotifyError::Closed)
    }
}

/// Starts a poster for `queue_url`. The task ends once every [`QueueSink`]
/// clone is dropped and the backlog is delivered.
pub fn spawn_poster(cache: &ClientCache, queue_url: String) -> (QueueSink, JoinHandle<u64>) {
    let client = cache.for_queue(&queue_url);
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(post_messages(client, queue_url, rx));
    (QueueSink { tx }, handle)
}

async fn post_messages(
    client: reqwest::Client,
    queue_url: String,
    mut rx: mpsc::UnboundedReceiver<JobMessage>,
) -> u64 {
    let mut delivered = 0u64;
    while let Some(message) = rx.recv().await {
        let result = client
            .post(&queue_url)
            .json(&message)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => delivered += 1,
            Err(err) => warn!(
                job = %message.job_id,
                event = message.event.kind(),
                "notify delivery failed: {err}"
            ),
        }
    }
    delivered
}

/// Test double: collects queued messages instead of posting them.
#[cfg(test)]
pub(crate) fn capture() -> (QueueSink, mpsc::UnboundedReceiver<JobMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueSink { tx }, rx)
}
