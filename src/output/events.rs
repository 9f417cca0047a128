//! Structured job and host events
//!
//! Events are fire-and-forget: a notifier that cannot deliver one drops it.

use crate::crawler::JobCounts;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// Something worth telling the outside world about
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum JobEvent {
    #[serde(rename = "job.started")]
    JobStarted {
        job_id: String,
        seeds: usize,
        resumed: bool,
    },

    #[serde(rename = "job.completed")]
    JobCompleted { job_id: String, counts: JobCounts },

    #[serde(rename = "job.cancelled")]
    JobCancelled { job_id: String, counts: JobCounts },

    #[serde(rename = "job.failed")]
    JobFailed { job_id: String, reason: String },

    /// No proxy could be had for a host's next request
    #[serde(rename = "host.proxies_exhausted")]
    HostProxiesExhausted { job_id: String, host: String },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job.started",
            Self::JobCompleted { .. } => "job.completed",
            Self::JobCancelled { .. } => "job.cancelled",
            Self::JobFailed { .. } => "job.failed",
            Self::HostProxiesExhausted { .. } => "host.proxies_exhausted",
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobCancelled { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::HostProxiesExhausted { job_id, .. } => job_id,
        }
    }
}

/// Receives job events
pub trait EventNotifier: Send + Sync {
    fn notify(&self, event: &JobEvent);
}

/// Writes each event as a structured log line with a JSON payload
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
    fn notify(&self, event: &JobEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        info!(event = event.name(), job_id = event.job_id(), %payload, "job event");
    }
}

/// Forwards events into a channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<JobEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventNotifier for ChannelNotifier {
    fn notify(&self, event: &JobEvent) {
        // Receiver gone: nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}
