//! Core types shared across the protocol

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable task identity. A given id denotes the same logical task for the
/// lifetime of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(TaskId)
    }
}

/// Task status as reported on the wire.
///
/// Unknown values are kept verbatim in `Other` so newer servers can add
/// states without breaking older clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Other(String),
}

impl TaskStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Other(value) => value,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => TaskStatus::Pending,
            // Older runners report `active` / `finished`.
            "running" | "active" => TaskStatus::Running,
            "succeeded" | "finished" => TaskStatus::Succeeded,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Other(value),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as seen by dashboards. Received wholesale in every snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub actions: Vec<String>,
}

impl Task {
    /// Identity comparison; attributes are ignored.
    pub fn same_identity(&self, other: &Task) -> bool {
        self.id == other.id
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.actions.iter().any(|a| a == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_is_preserved_verbatim() {
        let task: Task = serde_json::from_str(
            r#"{"id": 3, "name": "build", "status": "paused", "actions": []}"#,
        )
        .expect("parse task");
        assert_eq!(task.status, TaskStatus::Other("paused".to_string()));

        let json = serde_json::to_value(&task).expect("serialize task");
        assert_eq!(json["status"], "paused");
    }

    #[test]
    fn legacy_status_names_map_to_known_states() {
        assert_eq!(TaskStatus::from("active".to_string()), TaskStatus::Running);
        assert_eq!(
            TaskStatus::from("finished".to_string()),
            TaskStatus::Succeeded
        );
        assert_eq!(String::from(TaskStatus::Running), "running");
    }

    #[test]
    fn identity_ignores_attributes() {
        let a = Task {
            id: TaskId(1),
            name: "a".into(),
            status: TaskStatus::Running,
            actions: vec!["Stop".into()],
        };
        let b = Task {
            status: TaskStatus::Failed,
            actions: vec![],
            ..a.clone()
        };
        assert!(a.same_identity(&b));
        assert_ne!(a, b);
        assert!(a.has_action("Stop"));
        assert!(!b.has_action("Stop"));
    }

    #[test]
    fn actions_default_to_empty() {
        let task: Task =
            serde_json::from_str(r#"{"id": 1, "name": "x", "status": "pending"}"#).expect("parse");
        assert!(task.actions.is_empty());
    }
}
