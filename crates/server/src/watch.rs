//! Watch tasks: rerun a handler command whenever files under a path change.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use taskdeck_protocol::{TaskId, TaskStatus};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::color;
use crate::process::{ProcessSpec, ProcessTask};
use crate::stream::OutputCursor;
use crate::task::{TaskCore, TaskError, TaskEvent, TaskRunner};

pub const ACTION_TRIGGER: &str = "Trigger";
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WatchSpec {
    pub path: PathBuf,
    pub recursive: bool,
    /// Debounce interval for accumulating changes.
    pub delay: Duration,
    /// Run the handler once at start even without changes.
    pub force_once: bool,
    pub handler: ProcessSpec,
}

enum Wake {
    Changed,
    Trigger,
}

pub struct WatchTask {
    core: TaskCore,
    spec: WatchSpec,
    handler: Arc<ProcessTask>,
    wake_tx: mpsc::UnboundedSender<Wake>,
    wake_rx: Mutex<Option<mpsc::UnboundedReceiver<Wake>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl WatchTask {
    pub fn new(id: TaskId, name: impl Into<String>, spec: WatchSpec) -> Self {
        let name = name.into();
        let handler = Arc::new(ProcessTask::new(id, Some(name.clone()), spec.handler.clone()));
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        Self {
            core: TaskCore::new(id, name),
            spec,
            handler,
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
            watcher: Mutex::new(None),
        }
    }

    fn watch_path(&self) -> Result<RecommendedWatcher, TaskError> {
        let tx = self.wake_tx.clone();
        let task_id = self.core.id();
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    let _ = tx.send(Wake::Changed);
                }
                Err(err) => {
                    warn!(
                        component = "watch",
                        event = "watch.fs_event_error",
                        task_id = %task_id,
                        error = %err,
                        "Watch event error"
                    );
                }
            },
            notify::Config::default(),
        )?;
        let mode = if self.spec.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&self.spec.path, mode)?;
        Ok(watcher)
    }

    async fn run(self: Arc<Self>, mut wake: mpsc::UnboundedReceiver<Wake>) {
        let mut cursor = OutputCursor::default();
        let mut scheduled = if self.spec.force_once {
            self.core.write_line("Invoking task once unconditionally");
            Some(self.spec.delay)
        } else {
            None
        };

        loop {
            let delay = match scheduled.take() {
                Some(delay) => delay,
                None => match wake.recv().await {
                    Some(Wake::Changed) => self.spec.delay,
                    Some(Wake::Trigger) => Duration::ZERO,
                    None => return,
                },
            };
            tokio::time::sleep(delay).await;

            // Everything that arrived during the debounce window belongs to this run.
            let mut batched = 0usize;
            while wake.try_recv().is_ok() {
                batched += 1;
            }
            debug!(
                component = "watch",
                event = "watch.handler.invoking",
                task_id = %self.core.id(),
                batched,
            );
            self.run_handler(&mut cursor).await;
        }
    }

    /// Run the handler to completion, copying its output into this task.
    async fn run_handler(&self, cursor: &mut OutputCursor) {
        let mut events = self.handler.core().subscribe();
        if let Err(e) = self.handler.launch() {
            warn!(
                component = "watch",
                event = "watch.handler.spawn_failed",
                task_id = %self.core.id(),
                error = %e,
                "Watch handler failed to start"
            );
            self.core.write_line(&color::red(&format!("[{e}]")));
            return;
        }

        loop {
            match events.recv().await {
                Ok(TaskEvent::OutputUpdated) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    self.forward(cursor);
                }
                Ok(TaskEvent::StatusChanged) => {
                    if !self.handler.is_running() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        self.forward(cursor);
    }

    fn forward(&self, cursor: &mut OutputCursor) {
        if let Some(fragment) = cursor.read(self.handler.core().output()) {
            self.core.write_output(&fragment);
        }
    }
}

impl TaskRunner for WatchTask {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn start(self: Arc<Self>) {
        let Some(wake) = self.wake_rx.lock().ok().and_then(|mut rx| rx.take()) else {
            return;
        };

        self.core.write_line(&format!(
            "{} {}",
            color::green("Watching:"),
            self.spec.path.display()
        ));
        match self.watch_path() {
            Ok(watcher) => {
                if let Ok(mut slot) = self.watcher.lock() {
                    *slot = Some(watcher);
                }
                info!(
                    component = "watch",
                    event = "watch.started",
                    task_id = %self.core.id(),
                    path = %self.spec.path.display(),
                    recursive = self.spec.recursive,
                    "Watch started"
                );
            }
            Err(e) => {
                warn!(
                    component = "watch",
                    event = "watch.start_failed",
                    task_id = %self.core.id(),
                    path = %self.spec.path.display(),
                    error = %e,
                    "Failed to watch path"
                );
                self.core.write_line(&color::red(&format!("[{e}]")));
            }
        }

        tokio::spawn(self.clone().run(wake));
    }

    fn status(&self) -> TaskStatus {
        TaskStatus::Running
    }

    fn actions(&self) -> Vec<&'static str> {
        vec![ACTION_TRIGGER]
    }

    fn perform_action(self: Arc<Self>, action: &str) -> Result<Option<String>, TaskError> {
        if action != ACTION_TRIGGER {
            return Err(TaskError::UnsupportedAction(action.to_string()));
        }
        let _ = self.wake_tx.send(Wake::Trigger);
        Ok(None)
    }
}
