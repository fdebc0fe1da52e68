//! Fire-and-forget task actions

use taskdeck_protocol::{TaskActionRequest, TaskId};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Anything that can deliver an action request for a task.
pub trait ActionSink {
    fn perform_action(&self, task_id: TaskId, action: &str);
}

/// Posts `{task, action}` to the server's action endpoint.
///
/// The response is never interpreted: the effect of an action shows up in a
/// later task-list snapshot.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    http: reqwest::Client,
    endpoint: Url,
}

impl ActionDispatcher {
    pub fn new(endpoint: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Send the request on a background task and return immediately.
    pub fn dispatch(&self, task_id: TaskId, action: &str) -> JoinHandle<()> {
        let request = TaskActionRequest {
            task: task_id,
            action: action.to_string(),
        };
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            match http.post(endpoint).json(&request).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        component = "action",
                        event = "action.sent",
                        task_id = %request.task,
                        action = %request.action,
                    );
                }
                Ok(response) => {
                    warn!(
                        component = "action",
                        event = "action.rejected",
                        task_id = %request.task,
                        action = %request.action,
                        status = response.status().as_u16(),
                        "Server rejected task action"
                    );
                }
                Err(e) => {
                    warn!(
                        component = "action",
                        event = "action.send_failed",
                        task_id = %request.task,
                        action = %request.action,
                        error = %e,
                        "Failed to send task action"
                    );
                }
            }
        })
    }
}

impl ActionSink for ActionDispatcher {
    fn perform_action(&self, task_id: TaskId, action: &str) {
        let _ = self.dispatch(task_id, action);
    }
}
