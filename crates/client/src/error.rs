use taskdeck_protocol::TaskId;
use thiserror::Error;

/// Errors surfaced by the dashboard core
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Task {0} is not in the current task list")]
    UnknownTask(TaskId),

    #[error("Invalid server URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Channel closed")]
    ChannelClosed,
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
