//! Client → Server messages

use serde::{Deserialize, Serialize};

use crate::types::TaskId;

/// Body of a `POST /task-action` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskActionRequest {
    pub task: TaskId,
    pub action: String,
}
