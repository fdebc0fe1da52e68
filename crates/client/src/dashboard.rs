//! Dashboard event loop
//!
//! Owns the store, the output session and the action sink, and applies one
//! event at a time: a task-list payload from the push channel, an event from
//! an output channel, or an intent from a view. Views never touch the store
//! directly; they hold a `DashboardHandle` and send intents.

use std::sync::Arc;

use taskdeck_protocol::TaskId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::{ActionDispatcher, ActionSink};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::markup::MarkupRenderer;
use crate::output::{ChannelMessage, OutputStreamSession, OutputTransport, Transition};
use crate::push::spawn_push_channel;
use crate::store::{StateStore, StateSubscriber};
use crate::transport::WsOutputTransport;

/// User intents emitted by view collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    SelectTask(TaskId),
    /// `task_id: None` targets the selected task.
    PerformAction {
        task_id: Option<TaskId>,
        action: String,
    },
    Connect,
    Disconnect,
    ToggleConnection,
    Shutdown,
}

/// What the output pane should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Reset,
    Appended(String),
    ScrollToEnd,
    ConnectionChanged {
        task_id: Option<TaskId>,
        connected: bool,
    },
}

pub trait OutputView: Send + Sync {
    fn on_output_event(&self, event: &OutputEvent);
}

impl<F> OutputView for F
where
    F: Fn(&OutputEvent) + Send + Sync,
{
    fn on_output_event(&self, event: &OutputEvent) {
        self(event)
    }
}

/// Cloneable sender of intents.
#[derive(Debug, Clone)]
pub struct DashboardHandle {
    intents: mpsc::UnboundedSender<Intent>,
}

impl DashboardHandle {
    pub fn send(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .map_err(|_| ClientError::ChannelClosed)
    }

    pub fn select_task(&self, id: TaskId) -> Result<()> {
        self.send(Intent::SelectTask(id))
    }

    pub fn perform_action(&self, action: impl Into<String>) -> Result<()> {
        self.send(Intent::PerformAction {
            task_id: None,
            action: action.into(),
        })
    }

    pub fn perform_action_on(&self, id: TaskId, action: impl Into<String>) -> Result<()> {
        self.send(Intent::PerformAction {
            task_id: Some(id),
            action: action.into(),
        })
    }

    pub fn connect(&self) -> Result<()> {
        self.send(Intent::Connect)
    }

    pub fn disconnect(&self) -> Result<()> {
        self.send(Intent::Disconnect)
    }

    pub fn toggle_connection(&self) -> Result<()> {
        self.send(Intent::ToggleConnection)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(Intent::Shutdown)
    }
}

pub struct Dashboard<T, R, A> {
    store: StateStore,
    session: OutputStreamSession<T, R>,
    actions: A,
    output_view: Option<Arc<dyn OutputView>>,
    /// Task the output pane is showing; drives reconnect-on-switch.
    viewed_task: Option<TaskId>,
    push_rx: mpsc::Receiver<String>,
    /// Task feeding `push_rx`; aborted on shutdown.
    push_reader: Option<JoinHandle<()>>,
    channel_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    intent_tx: mpsc::UnboundedSender<Intent>,
    intent_rx: mpsc::UnboundedReceiver<Intent>,
}

impl<R> Dashboard<WsOutputTransport, R, ActionDispatcher>
where
    R: MarkupRenderer + Default,
{
    /// Wire a dashboard to a live server: task-list channel, output
    /// WebSockets and the action endpoint.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let (push_rx, reader) = spawn_push_channel(config.tasks_url()?, config.push_backoff_max);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let transport = WsOutputTransport::new(config.ws_base(), channel_tx);
        let actions = ActionDispatcher::new(config.action_url()?);
        let mut dashboard = Self::new(transport, actions, push_rx, channel_rx);
        dashboard.attach_push_reader(reader);
        Ok(dashboard)
    }
}

impl<T, R, A> Dashboard<T, R, A>
where
    T: OutputTransport,
    R: MarkupRenderer + Default,
    A: ActionSink,
{
    pub fn new(
        transport: T,
        actions: A,
        push_rx: mpsc::Receiver<String>,
        channel_rx: mpsc::UnboundedReceiver<ChannelMessage>,
    ) -> Self {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        Self {
            store: StateStore::new(),
            session: OutputStreamSession::new(transport),
            actions,
            output_view: None,
            viewed_task: None,
            push_rx,
            push_reader: None,
            channel_rx,
            intent_tx,
            intent_rx,
        }
    }

    /// Hand over the task that feeds the push receiver so shutdown can stop it.
    pub fn attach_push_reader(&mut self, reader: JoinHandle<()>) {
        self.stop_push_reader();
        self.push_reader = Some(reader);
    }

    pub fn handle(&self) -> DashboardHandle {
        DashboardHandle {
            intents: self.intent_tx.clone(),
        }
    }

    pub fn add_subscriber(&mut self, subscriber: Arc<dyn StateSubscriber>) {
        self.store.add_subscriber(subscriber);
    }

    pub fn remove_subscriber(&mut self, subscriber: &Arc<dyn StateSubscriber>) {
        self.store.remove_subscriber(subscriber);
    }

    pub fn set_output_view(&mut self, view: Arc<dyn OutputView>) {
        view.on_output_event(&OutputEvent::ConnectionChanged {
            task_id: self.session.bound_task(),
            connected: self.session.is_connected(),
        });
        self.output_view = Some(view);
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn session(&self) -> &OutputStreamSession<T, R> {
        &self.session
    }

    pub fn viewed_task(&self) -> Option<TaskId> {
        self.viewed_task
    }

    /// Process events until a `Shutdown` intent arrives.
    pub async fn run(mut self) -> Self {
        info!(component = "dashboard", event = "dashboard.started");
        loop {
            tokio::select! {
                Some(intent) = self.intent_rx.recv() => {
                    if !self.apply_intent(intent) {
                        break;
                    }
                }
                Some(payload) = self.push_rx.recv() => self.apply_push(&payload),
                Some(message) = self.channel_rx.recv() => self.apply_channel(message),
                else => break,
            }
        }
        self.stop_push_reader();
        info!(component = "dashboard", event = "dashboard.stopped");
        self
    }

    /// Apply one task-list payload from the push channel.
    pub fn apply_push(&mut self, payload: &str) {
        match self.store.ingest(payload) {
            Ok(()) => self.follow_selection(),
            Err(e) => {
                warn!(
                    component = "dashboard",
                    event = "push.decode_failed",
                    error = %e,
                    payload_bytes = payload.len(),
                    "Dropping undecodable task list"
                );
            }
        }
    }

    pub fn apply_channel(&mut self, message: ChannelMessage) {
        let transition = self.session.handle(message);
        self.emit(transition);
    }

    /// Returns false once the dashboard should stop.
    pub fn apply_intent(&mut self, intent: Intent) -> bool {
        match intent {
            Intent::SelectTask(id) => match self.store.select_task_id(id) {
                Ok(()) => self.follow_selection(),
                Err(e) => {
                    warn!(
                        component = "dashboard",
                        event = "select.rejected",
                        task_id = %id,
                        error = %e,
                    );
                }
            },
            Intent::PerformAction { task_id, action } => {
                match task_id.or_else(|| self.store.state().selected_id()) {
                    Some(id) => self.actions.perform_action(id, &action),
                    None => {
                        warn!(
                            component = "dashboard",
                            event = "action.no_target",
                            action = %action,
                            "No task selected for action"
                        );
                    }
                }
            }
            Intent::Connect => self.connect_viewed(),
            Intent::Disconnect => {
                let transition = self.session.disconnect();
                self.emit(transition);
            }
            Intent::ToggleConnection => {
                if self.session.is_connected() {
                    let transition = self.session.disconnect();
                    self.emit(transition);
                } else {
                    self.connect_viewed();
                }
            }
            Intent::Shutdown => {
                let transition = self.session.disconnect();
                self.emit(transition);
                self.stop_push_reader();
                return false;
            }
        }
        true
    }

    /// Reconnect-on-switch. The first task shown is connected right away;
    /// after that a new selected id moves the channel only while one is
    /// open, so a stream the operator or the server closed stays closed.
    /// Attribute-only updates of the same task keep the channel.
    fn follow_selection(&mut self) {
        let selected = self.store.state().selected_id();
        if selected == self.viewed_task {
            return;
        }
        let first_view = self.viewed_task.is_none();
        let was_connected = self.session.is_connected();
        self.viewed_task = selected;

        let transition = self.session.disconnect();
        self.emit(transition);
        match selected {
            Some(id) if first_view || was_connected => {
                let transition = self.session.connect(id);
                self.emit(transition);
            }
            Some(id) => {
                debug!(
                    component = "dashboard",
                    event = "output.switch_without_stream",
                    task_id = %id,
                );
            }
            None => {}
        }
    }

    fn stop_push_reader(&mut self) {
        if let Some(reader) = self.push_reader.take() {
            reader.abort();
        }
    }

    fn connect_viewed(&mut self) {
        if let Some(id) = self.viewed_task {
            let transition = self.session.connect(id);
            self.emit(transition);
        }
    }

    fn emit(&self, transition: Transition) {
        let Some(view) = &self.output_view else {
            return;
        };
        match transition {
            Transition::Connected { task_id, .. } => {
                view.on_output_event(&OutputEvent::ConnectionChanged {
                    task_id: Some(task_id),
                    connected: true,
                });
            }
            Transition::Disconnected { task_id, .. } | Transition::RemoteClosed { task_id } => {
                view.on_output_event(&OutputEvent::ConnectionChanged {
                    task_id: Some(task_id),
                    connected: false,
                });
            }
            Transition::Reset => view.on_output_event(&OutputEvent::Reset),
            Transition::Appended(markup) => {
                view.on_output_event(&OutputEvent::Appended(markup));
                view.on_output_event(&OutputEvent::ScrollToEnd);
            }
            Transition::AlreadyOpen | Transition::AlreadyClosed | Transition::Stale(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::markup::PlainRenderer;
    use crate::output::tests::RecordingTransport;
    use crate::output::{ChannelEvent, ChannelId};
    use crate::store::AppState;

    #[derive(Default)]
    struct RecordingActions {
        sent: Mutex<Vec<(TaskId, String)>>,
    }

    impl ActionSink for Arc<RecordingActions> {
        fn perform_action(&self, task_id: TaskId, action: &str) {
            self.sent.lock().unwrap().push((task_id, action.to_string()));
        }
    }

    type TestDashboard = Dashboard<RecordingTransport, PlainRenderer, Arc<RecordingActions>>;

    struct Harness {
        dashboard: TestDashboard,
        actions: Arc<RecordingActions>,
        output: Arc<Mutex<Vec<OutputEvent>>>,
        push_tx: mpsc::Sender<String>,
        channel_tx: mpsc::UnboundedSender<ChannelMessage>,
    }

    fn harness() -> Harness {
        let (push_tx, push_rx) = mpsc::channel(8);
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let actions = Arc::new(RecordingActions::default());
        let mut dashboard = Dashboard::new(
            RecordingTransport::default(),
            Arc::clone(&actions),
            push_rx,
            channel_rx,
        );
        let output = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&output);
        dashboard.set_output_view(Arc::new(move |event: &OutputEvent| {
            sink.lock().unwrap().push(event.clone());
        }));
        output.lock().unwrap().clear();
        Harness {
            dashboard,
            actions,
            output,
            push_tx,
            channel_tx,
        }
    }

    fn snapshot(tasks: &[(u64, &str)]) -> String {
        let tasks: Vec<_> = tasks
            .iter()
            .map(|(id, status)| {
                json!({"id": id, "name": format!("task-{id}"), "status": status, "actions": ["Stop"]})
            })
            .collect();
        json!({ "tasks": tasks }).to_string()
    }

    fn last_channel(d: &TestDashboard) -> ChannelId {
        d.session().transport().opened.last().expect("no channel").0
    }

    #[test]
    fn first_snapshot_connects_to_first_task() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running"), (2, "pending")]));

        assert_eq!(h.dashboard.viewed_task(), Some(TaskId(1)));
        assert_eq!(h.dashboard.session().transport().opened.len(), 1);
        assert_eq!(h.dashboard.session().bound_task(), Some(TaskId(1)));
        assert_eq!(
            *h.output.lock().unwrap(),
            vec![OutputEvent::ConnectionChanged {
                task_id: Some(TaskId(1)),
                connected: true
            }]
        );
    }

    #[test]
    fn switching_selection_closes_old_and_opens_new_exactly_once() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running"), (2, "pending")]));
        let old = last_channel(&h.dashboard);
        h.dashboard.apply_channel(ChannelMessage::new(old, ChannelEvent::Opened));
        h.dashboard
            .apply_channel(ChannelMessage::new(old, ChannelEvent::Chunk("from one".into())));

        assert!(h.dashboard.apply_intent(Intent::SelectTask(TaskId(2))));
        let new = last_channel(&h.dashboard);

        let transport = h.dashboard.session().transport();
        assert_eq!(transport.opened, vec![(old, TaskId(1)), (new, TaskId(2))]);
        assert_eq!(transport.closed, vec![old]);

        h.dashboard.apply_channel(ChannelMessage::new(new, ChannelEvent::Opened));
        h.dashboard
            .apply_channel(ChannelMessage::new(old, ChannelEvent::Chunk("late".into())));
        h.dashboard
            .apply_channel(ChannelMessage::new(new, ChannelEvent::Chunk("from two".into())));
        h.dashboard.apply_channel(ChannelMessage::new(old, ChannelEvent::Closed));

        assert_eq!(h.dashboard.session().buffer(), "from two");
        assert!(h.dashboard.session().is_connected());
    }

    #[test]
    fn status_update_of_selected_task_keeps_channel() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        h.dashboard.apply_push(&snapshot(&[(1, "succeeded")]));

        let transport = h.dashboard.session().transport();
        assert_eq!(transport.opened.len(), 1);
        assert!(transport.closed.is_empty());
    }

    #[test]
    fn selection_moving_by_fallback_reconnects() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running"), (2, "pending")]));
        h.dashboard.apply_intent(Intent::SelectTask(TaskId(2)));
        h.dashboard.apply_push(&snapshot(&[(3, "pending")]));

        assert_eq!(h.dashboard.store().state().selected_id(), Some(TaskId(3)));
        assert_eq!(h.dashboard.session().bound_task(), Some(TaskId(3)));
        assert_eq!(h.dashboard.session().transport().opened.len(), 3);
        assert_eq!(h.dashboard.session().transport().closed.len(), 2);
    }

    #[test]
    fn switching_after_disconnect_does_not_reopen() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running"), (2, "pending")]));
        h.dashboard.apply_intent(Intent::Disconnect);
        h.dashboard.apply_intent(Intent::SelectTask(TaskId(2)));

        assert_eq!(h.dashboard.viewed_task(), Some(TaskId(2)));
        assert!(!h.dashboard.session().is_connected());
        assert_eq!(h.dashboard.session().transport().opened.len(), 1);

        h.dashboard.apply_intent(Intent::Connect);
        let transport = h.dashboard.session().transport();
        assert_eq!(transport.opened.len(), 2);
        assert_eq!(transport.opened[1].1, TaskId(2));
    }

    #[test]
    fn switching_after_remote_close_does_not_reopen() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running"), (2, "pending")]));
        let first = last_channel(&h.dashboard);
        h.dashboard.apply_channel(ChannelMessage::new(first, ChannelEvent::Closed));
        h.dashboard.apply_intent(Intent::SelectTask(TaskId(2)));

        assert!(!h.dashboard.session().is_connected());
        assert_eq!(h.dashboard.session().transport().opened, vec![(first, TaskId(1))]);
    }

    #[test]
    fn tasks_reappearing_after_empty_list_connect_again() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        h.dashboard.apply_push(&snapshot(&[]));
        h.dashboard.apply_push(&snapshot(&[(2, "running")]));

        assert_eq!(h.dashboard.session().bound_task(), Some(TaskId(2)));
        assert_eq!(h.dashboard.session().transport().opened.len(), 2);
    }

    #[test]
    fn empty_snapshot_disconnects() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        h.dashboard.apply_push(&snapshot(&[]));

        assert!(!h.dashboard.session().is_connected());
        assert_eq!(h.dashboard.viewed_task(), None);
    }

    #[test]
    fn undecodable_push_is_dropped() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        h.dashboard.apply_push("{\"tasks\": 5}");
        assert_eq!(h.dashboard.store().state().tasks.len(), 1);
    }

    #[test]
    fn selecting_unknown_task_changes_nothing() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        assert!(h.dashboard.apply_intent(Intent::SelectTask(TaskId(42))));
        assert_eq!(h.dashboard.store().state().selected_id(), Some(TaskId(1)));
        assert_eq!(h.dashboard.session().transport().opened.len(), 1);
    }

    #[test]
    fn actions_default_to_selected_task() {
        let mut h = harness();
        h.dashboard.apply_intent(Intent::PerformAction {
            task_id: None,
            action: "Stop".into(),
        });
        assert!(h.actions.sent.lock().unwrap().is_empty());

        h.dashboard.apply_push(&snapshot(&[(4, "running"), (5, "running")]));
        h.dashboard.apply_intent(Intent::PerformAction {
            task_id: None,
            action: "Stop".into(),
        });
        h.dashboard.apply_intent(Intent::PerformAction {
            task_id: Some(TaskId(5)),
            action: "Restart".into(),
        });

        assert_eq!(
            *h.actions.sent.lock().unwrap(),
            vec![(TaskId(4), "Stop".to_string()), (TaskId(5), "Restart".to_string())]
        );
    }

    #[test]
    fn remote_close_is_visible_and_manual_reconnect_works() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        let first = last_channel(&h.dashboard);
        h.output.lock().unwrap().clear();

        h.dashboard.apply_channel(ChannelMessage::new(first, ChannelEvent::Closed));
        assert!(!h.dashboard.session().is_connected());
        assert_eq!(
            *h.output.lock().unwrap(),
            vec![OutputEvent::ConnectionChanged {
                task_id: Some(TaskId(1)),
                connected: false
            }]
        );

        h.dashboard.apply_intent(Intent::ToggleConnection);
        assert!(h.dashboard.session().is_connected());
        assert_eq!(h.dashboard.session().transport().opened.len(), 2);

        h.dashboard.apply_intent(Intent::Connect);
        assert_eq!(h.dashboard.session().transport().opened.len(), 2);
    }

    #[test]
    fn chunks_signal_scroll_to_end() {
        let mut h = harness();
        h.dashboard.apply_push(&snapshot(&[(1, "running")]));
        let channel = last_channel(&h.dashboard);
        h.output.lock().unwrap().clear();

        h.dashboard.apply_channel(ChannelMessage::new(channel, ChannelEvent::Opened));
        h.dashboard
            .apply_channel(ChannelMessage::new(channel, ChannelEvent::Chunk("hi".into())));

        assert_eq!(
            *h.output.lock().unwrap(),
            vec![
                OutputEvent::Reset,
                OutputEvent::Appended("hi".into()),
                OutputEvent::ScrollToEnd
            ]
        );
    }

    #[tokio::test]
    async fn run_loop_processes_events_until_shutdown() {
        let h = harness();
        let states = Arc::new(Mutex::new(Vec::<Arc<AppState>>::new()));
        let sink = Arc::clone(&states);
        let mut dashboard = h.dashboard;
        dashboard.add_subscriber(Arc::new(move |state: &Arc<AppState>| {
            sink.lock().unwrap().push(Arc::clone(state));
        }));
        let handle = dashboard.handle();

        h.push_tx.send(snapshot(&[(1, "running"), (2, "pending")])).await.unwrap();
        let running = tokio::spawn(dashboard.run());

        // Wait until the snapshot has been applied before selecting.
        for _ in 0..100 {
            if states.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        handle.select_task(TaskId(2)).unwrap();
        h.channel_tx
            .send(ChannelMessage::new(ChannelId(99), ChannelEvent::Closed))
            .unwrap();
        handle.shutdown().unwrap();

        let dashboard = running.await.unwrap();
        assert!(!dashboard.session().is_connected());
        assert_eq!(dashboard.store().state().selected_id(), Some(TaskId(2)));
        assert_eq!(states.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn shutdown_stops_push_reader() {
        let mut h = harness();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        h.dashboard.attach_push_reader(tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        }));

        assert!(!h.dashboard.apply_intent(Intent::Shutdown));
        assert!(alive_rx.await.is_err());
    }

    #[tokio::test]
    async fn handle_reports_closed_dashboard() {
        let h = harness();
        let handle = h.dashboard.handle();
        drop(h.dashboard);
        assert!(matches!(handle.connect(), Err(ClientError::ChannelClosed)));
    }
}
