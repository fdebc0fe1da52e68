//! Server → Client messages

use serde::{Deserialize, Serialize};

use crate::types::Task;

/// Full task-list snapshot pushed on the `/tasks` channel.
///
/// Every message replaces all prior task data; there are no deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListMessage {
    pub tasks: Vec<Task>,
}

#[cfg(test)]
mod tests {
    use super::TaskListMessage;
    use crate::types::{TaskId, TaskStatus};

    #[test]
    fn deserializes_task_list_snapshot() {
        let json = r#"{
          "tasks": [
            {"id": 0, "name": "Counter", "status": "active", "actions": ["Stop", "Restart"]},
            {"id": 1, "name": "Watch Echo", "status": "pending", "actions": ["Trigger"]}
          ]
        }"#;

        let parsed: TaskListMessage = serde_json::from_str(json).expect("parse snapshot");
        assert_eq!(parsed.tasks.len(), 2);
        assert_eq!(parsed.tasks[0].id, TaskId(0));
        assert_eq!(parsed.tasks[0].status, TaskStatus::Running);
        assert_eq!(parsed.tasks[1].actions, vec!["Trigger".to_string()]);
    }

    #[test]
    fn rejects_payload_without_tasks_field() {
        assert!(serde_json::from_str::<TaskListMessage>(r#"{"sessions": []}"#).is_err());
    }
}
