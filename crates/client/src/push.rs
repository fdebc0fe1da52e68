//! Push-channel ingestion
//!
//! The server pushes a complete task list on `/tasks` whenever anything
//! changes. The reader task here forwards each text frame, undecoded, to the
//! dashboard loop, which hands it to `StateStore::ingest`.

use std::time::Duration;

use futures::StreamExt;
use taskdeck_protocol::{Task, TaskListMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const PUSH_CHANNEL_CAPACITY: usize = 64;

/// Decode one push message into the full replacement task list.
pub fn decode_snapshot(payload: &str) -> Result<Vec<Task>> {
    let message: TaskListMessage = serde_json::from_str(payload)?;
    Ok(message.tasks)
}

/// Open the long-lived task-list channel.
///
/// Returns the receiver the dashboard consumes plus the reader task. The
/// reader reconnects with exponential backoff when the connection drops and
/// exits once the receiver is dropped.
pub fn spawn_push_channel(url: Url, max_backoff: Duration) -> (mpsc::Receiver<String>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(PUSH_CHANNEL_CAPACITY);
    let handle = tokio::spawn(run_push_reader(url, tx, max_backoff));
    (rx, handle)
}

async fn run_push_reader(url: Url, tx: mpsc::Sender<String>, max_backoff: Duration) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match connect_async(url.as_str()).await {
            Ok((mut ws, _)) => {
                info!(
                    component = "push",
                    event = "push.connected",
                    url = %url,
                    "Task list channel connected"
                );
                backoff = INITIAL_BACKOFF;

                while let Some(frame) = ws.next().await {
                    let payload = match frame {
                        Ok(Message::Text(text)) => text.as_str().to_owned(),
                        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(
                                    component = "push",
                                    event = "push.frame.not_utf8",
                                    error = %e,
                                    "Dropping non UTF-8 task list frame"
                                );
                                continue;
                            }
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(
                                component = "push",
                                event = "push.connection.error",
                                error = %e,
                                "Task list channel failed"
                            );
                            break;
                        }
                    };
                    if tx.send(payload).await.is_err() {
                        debug!(component = "push", event = "push.receiver.dropped");
                        return;
                    }
                }
                info!(
                    component = "push",
                    event = "push.disconnected",
                    "Task list channel closed"
                );
            }
            Err(e) => {
                warn!(
                    component = "push",
                    event = "push.connect_failed",
                    url = %url,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "Failed to connect task list channel"
                );
            }
        }

        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = next_backoff(backoff, max_backoff);
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}
