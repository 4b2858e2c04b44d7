//! Fire-and-forget observability events.
//!
//! The planner and coordinator emit an [`Event`] at each lifecycle step.
//! Delivery goes through an [`EventSink`]; a failed delivery is logged and
//! dropped, it never changes a planning or scheduling outcome.

use crate::adapters::BackendError;
use crate::core::{FallbackReason, PlanId, RunStatus, TaskId};
use crate::{clog_debug, clog_warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Lifecycle events emitted by the planner and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum Event {
    /// One request to the model backend.
    PlanningAttempt {
        attempt: u32,
        /// Error returned by the backend, if the attempt failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<BackendError>,
    },
    PlanCreated {
        plan_id: PlanId,
        task_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<FallbackReason>,
    },
    TaskStarted {
        plan_id: PlanId,
        task_id: TaskId,
    },
    TaskCompleted {
        plan_id: PlanId,
        task_id: TaskId,
    },
    TaskFailed {
        plan_id: PlanId,
        task_id: TaskId,
        reason: String,
    },
    TaskBlocked {
        plan_id: PlanId,
        task_id: TaskId,
        by: TaskId,
    },
    RunFinished {
        plan_id: PlanId,
        status: RunStatus,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    #[error("event sink closed")]
    Closed,
    #[error("event sink full")]
    Full,
}

/// Destination for events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event) -> Result<(), SinkError>;
}

/// Emit `event`, logging and discarding any delivery failure.
pub fn emit_best_effort(sink: &dyn EventSink, event: Event) {
    if let Err(e) = sink.emit(&event) {
        clog_warn!("Dropped event {:?}: {}", event, e);
    }
}

/// Writes events as JSON lines to the debug log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) -> Result<(), SinkError> {
        match serde_json::to_string(event) {
            Ok(json) => clog_debug!("event {}", json),
            Err(e) => clog_warn!("Failed to serialise event: {}", e),
        }
        Ok(())
    }
}

/// Forwards events into a bounded channel without waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &Event) -> Result<(), SinkError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}
