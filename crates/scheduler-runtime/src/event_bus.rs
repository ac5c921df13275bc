//! In-process event bus — the "logger / observer sink" contract of
//! `spec.md` §6. The engine and executor publish-only; the bootstrap
//! subscribes and forwards to whatever host-side observer it wires up.
//! Shape mirrors the teacher's `ScheduleStore`/`TaskStore` per-entity
//! `broadcast::Sender` channels, flattened to a single process-wide bus.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use scheduler_domain::ScheduledTask;

/// Every event name enumerated in `spec.md` §6's logger/observer sink
/// contract, plus the payload documented at its emission site.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "taskScheduled")]
    TaskScheduled { task_id: String, scheduled_for: DateTime<Utc> },
    #[serde(rename = "taskUnscheduled")]
    TaskUnscheduled { task_id: String },
    #[serde(rename = "taskExecutionStarted")]
    TaskExecutionStarted { task_id: String, attempt: u32 },
    #[serde(rename = "taskExecutionCompleted")]
    TaskExecutionCompleted { task_id: String, success: bool, total_retries: u32 },
    #[serde(rename = "taskExecutionFailed")]
    TaskExecutionFailed { task_id: String, error: String },
    #[serde(rename = "executionRetry")]
    ExecutionRetry { task_id: String, delay_ms: u64, next_attempt: u32 },
    #[serde(rename = "taskQueued")]
    TaskQueued { task_id: String },
    #[serde(rename = "taskDequeued")]
    TaskDequeued { task_id: String },
    #[serde(rename = "healthCheck")]
    HealthCheck { stale_timers_removed: usize },
    #[serde(rename = "timerCleanup")]
    TimerCleanup { before: usize, after: usize },
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "shutdown")]
    Shutdown { remaining_active: usize },
    #[serde(rename = "error")]
    Error { kind: String, task_id: Option<String>, error: String },

    // Lifecycle events published by the use-case layer, consumed only by
    // the bootstrap (`spec.md` §4.6) — engine/executor never publish these.
    #[serde(rename = "scheduleCreated")]
    ScheduleCreated { task: ScheduledTask },
    #[serde(rename = "scheduleUpdated")]
    ScheduleUpdated { task: ScheduledTask },
    #[serde(rename = "scheduleCancelled")]
    ScheduleCancelled { task_id: String },

    #[serde(rename = "scheduler.started")]
    SchedulerStarted,
    #[serde(rename = "scheduler.stopped")]
    SchedulerStopped,
}

/// Thin trait over the broadcast-based bus so alternate sinks (a test
/// recorder, say) can be substituted without touching engine/executor code.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: Event);
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventSink for EventBus {
    /// Broadcast sends fail only when there are no subscribers; that's a
    /// normal state (nobody's listening yet), not an error worth logging.
    fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(Event::Started);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, Event::Started));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(Event::Stopped);
    }

    #[test]
    fn event_serializes_with_tag() {
        let event = Event::TaskScheduled { task_id: "t1".into(), scheduled_for: Utc::now() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "taskScheduled");
        assert_eq!(json["task_id"], "t1");
    }
}
