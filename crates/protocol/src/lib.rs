//! taskdeck Protocol
//!
//! Shared types for communication between the taskdeck server and its
//! dashboard clients. Task lists and action requests travel as JSON;
//! task output travels as raw text frames.

pub mod client;
pub mod server;
pub mod types;

pub use client::TaskActionRequest;
pub use server::TaskListMessage;
pub use types::*;

/// WebSocket endpoint pushing full task-list snapshots.
pub const TASKS_PATH: &str = "/tasks";

/// Prefix of the per-task output WebSocket endpoint.
pub const TASK_OUTPUT_PATH: &str = "/task-output";

/// One-shot endpoint for invoking a task action.
pub const TASK_ACTION_PATH: &str = "/task-action";

/// Liveness check.
pub const HEALTH_PATH: &str = "/health";

/// Path of the output stream for a single task.
pub fn task_output_path(id: TaskId) -> String {
    format!("{TASK_OUTPUT_PATH}/{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_embeds_task_id() {
        assert_eq!(task_output_path(TaskId(7)), "/task-output/7");
    }
}
