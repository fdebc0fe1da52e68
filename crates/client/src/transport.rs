//! WebSocket transport for task output channels

use std::collections::HashMap;

use futures::StreamExt;
use taskdeck_protocol::{task_output_path, TaskId};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::output::{ChannelEvent, ChannelId, ChannelMessage, OutputTransport};

/// Opens one WebSocket per output channel. Each socket runs on its own
/// task and reports back through the shared event sender.
pub struct WsOutputTransport {
    ws_base: Url,
    events: mpsc::UnboundedSender<ChannelMessage>,
    channels: HashMap<ChannelId, oneshot::Sender<()>>,
}

impl WsOutputTransport {
    pub fn new(ws_base: Url, events: mpsc::UnboundedSender<ChannelMessage>) -> Self {
        Self {
            ws_base,
            events,
            channels: HashMap::new(),
        }
    }
}

impl OutputTransport for WsOutputTransport {
    fn open(&mut self, channel: ChannelId, task_id: TaskId) {
        // Forget channels whose socket task already finished.
        self.channels.retain(|_, stop| !stop.is_closed());

        let url = match self.ws_base.join(&task_output_path(task_id)) {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    component = "output",
                    event = "output.channel.bad_url",
                    task_id = %task_id,
                    error = %e,
                );
                let _ = self
                    .events
                    .send(ChannelMessage::new(channel, ChannelEvent::Closed));
                return;
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        self.channels.insert(channel, stop_tx);
        tokio::spawn(run_output_channel(url, channel, self.events.clone(), stop_rx));
    }

    fn close(&mut self, channel: ChannelId) {
        if let Some(stop) = self.channels.remove(&channel) {
            let _ = stop.send(());
        }
    }
}

async fn run_output_channel(
    url: Url,
    channel: ChannelId,
    events: mpsc::UnboundedSender<ChannelMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    let emit = |event: ChannelEvent| {
        let _ = events.send(ChannelMessage::new(channel, event));
    };

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = &mut stop => {
            emit(ChannelEvent::Closed);
            return;
        }
    };
    let mut ws = match connected {
        Ok((ws, _)) => ws,
        Err(e) => {
            warn!(
                component = "output",
                event = "output.channel.connect_failed",
                url = %url,
                error = %e,
                "Failed to open task output channel"
            );
            emit(ChannelEvent::Closed);
            return;
        }
    };
    emit(ChannelEvent::Opened);

    loop {
        tokio::select! {
            _ = &mut stop => {
                let _ = ws.close(None).await;
                break;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => emit(ChannelEvent::Chunk(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => emit(ChannelEvent::Chunk(text)),
                    Err(e) => {
                        warn!(
                            component = "output",
                            event = "output.chunk.decode_failed",
                            channel = channel.0,
                            error = %e,
                            "Dropping non UTF-8 output chunk"
                        );
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(
                        component = "output",
                        event = "output.channel.error",
                        channel = channel.0,
                        error = %e,
                    );
                    break;
                }
            }
        }
    }
    emit(ChannelEvent::Closed);
}
