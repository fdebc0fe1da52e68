//! Task abstraction shared by every runnable task kind.

use std::sync::Arc;

use taskdeck_protocol::{Task, TaskId, TaskStatus};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::stream::OutputBuffer;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Failed to spawn process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Failed to open pseudo-terminal: {0}")]
    Pty(String),

    #[error("Task has no command to run")]
    EmptyCommand,

    #[error("Failed to watch path: {0}")]
    Watch(#[from] notify::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEvent {
    OutputUpdated,
    StatusChanged,
}

/// Identity, output buffer and event fan-out common to all tasks.
pub struct TaskCore {
    id: TaskId,
    name: String,
    output: OutputBuffer,
    events: broadcast::Sender<TaskEvent>,
}

impl TaskCore {
    pub fn new(id: TaskId, name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id,
            name: name.into(),
            output: OutputBuffer::default(),
            events,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn write_output(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.output.append(text);
        self.publish(TaskEvent::OutputUpdated);
    }

    pub fn write_line(&self, line: &str) {
        self.write_output(&format!("{line}\n"));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn publish(&self, event: TaskEvent) {
        // No receivers is fine: nobody is watching this task yet.
        let _ = self.events.send(event);
    }
}

/// A unit of background work managed by the registry.
pub trait TaskRunner: Send + Sync {
    fn core(&self) -> &TaskCore;

    /// Begin running. Called once by the registry.
    fn start(self: Arc<Self>);

    fn status(&self) -> TaskStatus;

    fn actions(&self) -> Vec<&'static str>;

    /// Run a named action. `Ok(Some(text))` is returned to the caller verbatim.
    fn perform_action(self: Arc<Self>, action: &str) -> Result<Option<String>, TaskError>;

    fn info(&self) -> Task {
        Task {
            id: self.core().id(),
            name: self.core().name().to_string(),
            status: self.status(),
            actions: self.actions().into_iter().map(str::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writing_output_publishes_event() {
        let core = TaskCore::new(TaskId(1), "t");
        let mut events = core.subscribe();
        core.write_line("hello");
        assert_eq!(events.recv().await.unwrap(), TaskEvent::OutputUpdated);
        assert_eq!(core.output().contents(), "hello\n");
    }

    #[test]
    fn empty_writes_are_ignored() {
        let core = TaskCore::new(TaskId(1), "t");
        let mut events = core.subscribe();
        core.write_output("");
        assert!(core.output().is_empty());
        assert!(events.try_recv().is_err());
    }
}
