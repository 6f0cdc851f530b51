//! Dispatch events and their sinks
//!
//! Every dispatch, successful or not, produces one [`DispatchEvent`]. Sinks are
//! fire-and-forget: `record` must not block and cannot fail the dispatch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Marker attached to events of failed dispatches
pub const FALLBACK_ERROR_HANDLING: &str = "error_handling";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    pub agent: String,
    pub input_text: String,
    pub output_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DispatchEvent {
    pub fn success(agent: &str, input: &str, output: &str) -> Self {
        Self {
            agent: agent.to_string(),
            input_text: input.to_string(),
            output_text: output.to_string(),
            fallback: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(agent: &str, input: &str, message: &str) -> Self {
        Self {
            agent: agent.to_string(),
            input_text: input.to_string(),
            output_text: format!("Error: {}", message),
            fallback: Some(FALLBACK_ERROR_HANDLING.to_string()),
            timestamp: Utc::now(),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Consumer of dispatch events (telemetry, memory, log)
pub trait EventSink: Send + Sync {
    fn record(&self, event: &DispatchEvent);
}

/// Writes one structured log line per event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &DispatchEvent) {
        info!(
            agent = %event.agent,
            input_len = event.input_text.len(),
            output_len = event.output_text.len(),
            fallback = event.fallback.as_deref().unwrap_or("none"),
            "Dispatch recorded"
        );
    }
}

/// Broadcast bus; each subscriber gets its own receiver
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DispatchEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBus {
    fn record(&self, event: &DispatchEvent) {
        let receivers = self.sender.receiver_count();
        if receivers > 0 {
            debug!("Broadcasting dispatch of '{}' to {} receivers", event.agent, receivers);
            // No receivers is fine
            let _ = self.sender.send(event.clone());
        }
    }
}

/// Aggregate counters over everything recorded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub total: u64,
    pub failures: u64,
}

/// Keeps the most recent events in memory for inspection
pub struct RecentEvents {
    capacity: usize,
    inner: Mutex<(VecDeque<DispatchEvent>, EventStats)>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new((VecDeque::new(), EventStats::default())),
        }
    }

    /// Newest last
    pub fn snapshot(&self) -> Vec<DispatchEvent> {
        let guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.0.iter().cloned().collect()
    }

    pub fn stats(&self) -> EventStats {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1.clone()
    }
}

impl EventSink for RecentEvents {
    fn record(&self, event: &DispatchEvent) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let (events, stats) = &mut *guard;
        stats.total += 1;
        if event.is_failure() {
            stats.failures += 1;
        }
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}
