//! Task-list state store
//!
//! `StateStore` owns the authoritative `AppState`. Every full task list that
//! arrives is reconciled against the current selection, committed as a new
//! immutable snapshot, and delivered synchronously to every subscriber.
//! The store is driven from a single event loop, so it needs no locking.

use std::sync::Arc;

use taskdeck_protocol::{Task, TaskId};
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::push::decode_snapshot;

/// Immutable dashboard snapshot shared by reference with all subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    /// Tasks in the order the server delivered them
    pub tasks: Vec<Task>,
    /// Always one of `tasks` (by id and value) when present
    pub selected_task: Option<Task>,
}

impl AppState {
    pub fn selected_id(&self) -> Option<TaskId> {
        self.selected_task.as_ref().map(|task| task.id)
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }
}

/// Observer of state changes. Called synchronously on every commit and once
/// on registration.
pub trait StateSubscriber: Send + Sync {
    fn on_new_state(&self, state: &Arc<AppState>);
}

impl<F> StateSubscriber for F
where
    F: Fn(&Arc<AppState>) + Send + Sync,
{
    fn on_new_state(&self, state: &Arc<AppState>) {
        self(state)
    }
}

/// Derive the selection for a new snapshot from the previous selection.
///
/// Empty list: nothing selected. No previous selection: the first task.
/// Otherwise the task with the previous selection's id (carrying its new
/// attributes), falling back to the first task when it disappeared.
pub fn reconcile_selection(previous: Option<&Task>, tasks: &[Task]) -> Option<Task> {
    let first = tasks.first()?;
    let selected = match previous {
        None => first,
        Some(previous) => tasks
            .iter()
            .find(|task| task.same_identity(previous))
            .unwrap_or(first),
    };
    Some(selected.clone())
}

/// Registered observers with set semantics keyed on the allocation.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Vec<Arc<dyn StateSubscriber>>,
}

impl SubscriberRegistry {
    /// Returns false when the subscriber was already registered.
    pub fn insert(&mut self, subscriber: Arc<dyn StateSubscriber>) -> bool {
        if self.contains(&subscriber) {
            return false;
        }
        self.subscribers.push(subscriber);
        true
    }

    /// Returns false when the subscriber was not registered.
    pub fn remove(&mut self, subscriber: &Arc<dyn StateSubscriber>) -> bool {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|existing| !same_subscriber(existing, subscriber));
        self.subscribers.len() != before
    }

    pub fn contains(&self, subscriber: &Arc<dyn StateSubscriber>) -> bool {
        self.subscribers
            .iter()
            .any(|existing| same_subscriber(existing, subscriber))
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Deliver the same snapshot to every subscriber.
    pub fn notify(&self, state: &Arc<AppState>) {
        for subscriber in &self.subscribers {
            subscriber.on_new_state(state);
        }
    }
}

// Compare data pointers only; vtable pointers are not guaranteed unique.
fn same_subscriber(a: &Arc<dyn StateSubscriber>, b: &Arc<dyn StateSubscriber>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Single writer of `AppState` snapshots.
#[derive(Default)]
pub struct StateStore {
    last_known_state: Arc<AppState>,
    subscribers: SubscriberRegistry,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.last_known_state)
    }

    /// Register an observer and replay the current snapshot to it before
    /// returning.
    pub fn add_subscriber(&mut self, subscriber: Arc<dyn StateSubscriber>) {
        self.subscribers.insert(Arc::clone(&subscriber));
        subscriber.on_new_state(&self.last_known_state);
    }

    pub fn remove_subscriber(&mut self, subscriber: &Arc<dyn StateSubscriber>) {
        self.subscribers.remove(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Apply a full task-list snapshot.
    pub fn set_tasks(&mut self, tasks: Vec<Task>) {
        let selected_task =
            reconcile_selection(self.last_known_state.selected_task.as_ref(), &tasks);
        debug!(
            component = "store",
            event = "store.tasks.reconciled",
            task_count = tasks.len(),
            selected = ?selected_task.as_ref().map(|task| task.id),
        );
        self.commit(AppState {
            tasks,
            selected_task,
        });
    }

    /// Select a task by the operator's request.
    ///
    /// The task is resolved by id against the current list so the selection
    /// always carries the latest attributes. Unknown ids are rejected and
    /// leave the state untouched.
    pub fn select_task(&mut self, task: &Task) -> Result<()> {
        self.select_task_id(task.id)
    }

    pub fn select_task_id(&mut self, id: TaskId) -> Result<()> {
        let Some(task) = self.last_known_state.task(id).cloned() else {
            return Err(ClientError::UnknownTask(id));
        };
        self.commit(AppState {
            tasks: self.last_known_state.tasks.clone(),
            selected_task: Some(task),
        });
        Ok(())
    }

    /// Decode one push-channel message and apply it.
    pub fn ingest(&mut self, payload: &str) -> Result<()> {
        let tasks = decode_snapshot(payload)?;
        self.set_tasks(tasks);
        Ok(())
    }

    fn commit(&mut self, state: AppState) {
        self.last_known_state = Arc::new(state);
        self.subscribers.notify(&self.last_known_state);
    }
}
