//! Task registry: owns every task, hands out ids and republishes status changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use taskdeck_protocol::{Task, TaskId, TaskListMessage};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::color;
use crate::task::{TaskEvent, TaskRunner};

const STATUS_CAPACITY: usize = 256;

pub struct TaskRegistry {
    name: String,
    tasks: BTreeMap<TaskId, Arc<dyn TaskRunner>>,
    status_tx: broadcast::Sender<TaskId>,
}

impl TaskRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            name: name.into(),
            tasks: BTreeMap::new(),
            status_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next unused id. Ids follow registration order.
    pub fn next_id(&self) -> TaskId {
        TaskId(self.tasks.keys().next_back().map_or(0, |id| id.0 + 1))
    }

    pub fn add(&mut self, task: Arc<dyn TaskRunner>) {
        let id = task.core().id();
        debug!(
            component = "registry",
            event = "registry.task_added",
            task_id = %id,
            name = task.core().name(),
        );
        self.tasks.insert(id, task);
    }

    pub fn get(&self, id: TaskId) -> Option<&Arc<dyn TaskRunner>> {
        self.tasks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.values().map(|task| task.info()).collect()
    }

    pub fn snapshot(&self) -> TaskListMessage {
        TaskListMessage { tasks: self.tasks() }
    }

    /// Receives the id of every task whose status changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<TaskId> {
        self.status_tx.subscribe()
    }

    /// Start every task and the monitors that forward their status changes.
    pub fn start_all(&self) {
        for (id, task) in &self.tasks {
            self.spawn_status_monitor(*id, task);
            task.clone().start();
            color::status_ok("Started", task.core().name());
            info!(
                component = "registry",
                event = "registry.task_started",
                task_id = %id,
                name = task.core().name(),
                "Task started"
            );
        }
    }

    fn spawn_status_monitor(&self, id: TaskId, task: &Arc<dyn TaskRunner>) {
        let mut events = task.core().subscribe();
        let status_tx = self.status_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TaskEvent::StatusChanged) => {
                        let _ = status_tx.send(id);
                    }
                    Ok(TaskEvent::OutputUpdated) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let _ = status_tx.send(id);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
