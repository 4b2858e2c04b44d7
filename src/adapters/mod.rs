//! Seams to the external collaborators: model backend, tool host and
//! observability sink.

pub mod backend;
pub mod events;
pub mod tools;

pub use backend::{BackendError, CommandBackend, ModelBackend, OfflineBackend};
pub use events::{emit_best_effort, ChannelSink, Event, EventSink, LogSink, SinkError};
pub use tools::{LocalToolHost, ToolCall, ToolError, ToolHost, ToolOutput};
