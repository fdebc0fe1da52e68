//! Per-task output streaming session
//!
//! `OutputStreamSession` is a two-state machine (`Closed`, `Open`) over an
//! injected transport. Every channel the session opens gets a fresh
//! `ChannelId`; events carry the id of the channel that produced them, so
//! events from a superseded channel are recognised and dropped.
//!
//! ```text
//! Closed --connect--> Open            (transport.open)
//! Open   --connect--> Open            (no-op)
//! Open   --disconnect--> Closed       (transport.close)
//! Open   --Closed event--> Closed     (remote close, no retry)
//! any    --event for other channel--> unchanged (stale)
//! ```

use taskdeck_protocol::TaskId;
use tracing::{debug, info};

use crate::markup::MarkupRenderer;

/// Generation number of a channel opened by one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChannelId(pub u64);

/// Something a transport channel reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Chunk(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

impl ChannelMessage {
    pub fn new(channel: ChannelId, event: ChannelEvent) -> Self {
        Self { channel, event }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Open { channel: ChannelId, task_id: TaskId },
}

/// Opens and closes output channels. Implementations report back through
/// `ChannelMessage`s tagged with the id they were given.
pub trait OutputTransport {
    fn open(&mut self, channel: ChannelId, task_id: TaskId);

    /// Best effort; a `Closed` event for the channel may still arrive later.
    fn close(&mut self, channel: ChannelId);
}

/// Result of driving the session, for the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Connected { channel: ChannelId, task_id: TaskId },
    AlreadyOpen,
    Disconnected { channel: ChannelId, task_id: TaskId },
    AlreadyClosed,
    /// The current channel opened; buffer cleared.
    Reset,
    /// Rendered markup appended to the buffer; view should scroll to end.
    Appended(String),
    RemoteClosed { task_id: TaskId },
    Stale(ChannelId),
}

pub struct OutputStreamSession<T, R> {
    transport: T,
    state: ChannelState,
    next_channel: u64,
    renderer: R,
    buffer: String,
}

impl<T, R> OutputStreamSession<T, R>
where
    T: OutputTransport,
    R: MarkupRenderer + Default,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ChannelState::Closed,
            next_channel: 0,
            renderer: R::default(),
            buffer: String::new(),
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ChannelState::Open { .. })
    }

    /// Task the open channel belongs to.
    pub fn bound_task(&self) -> Option<TaskId> {
        match self.state {
            ChannelState::Open { task_id, .. } => Some(task_id),
            ChannelState::Closed => None,
        }
    }

    /// Rendered output of the current (or last) channel.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn connect(&mut self, task_id: TaskId) -> Transition {
        if self.is_connected() {
            return Transition::AlreadyOpen;
        }
        self.next_channel += 1;
        let channel = ChannelId(self.next_channel);
        self.state = ChannelState::Open { channel, task_id };
        self.transport.open(channel, task_id);
        info!(
            component = "output",
            event = "output.channel.opening",
            task_id = %task_id,
            channel = channel.0,
        );
        Transition::Connected { channel, task_id }
    }

    pub fn disconnect(&mut self) -> Transition {
        let ChannelState::Open { channel, task_id } = self.state else {
            return Transition::AlreadyClosed;
        };
        self.state = ChannelState::Closed;
        self.transport.close(channel);
        info!(
            component = "output",
            event = "output.channel.closed_locally",
            task_id = %task_id,
            channel = channel.0,
        );
        Transition::Disconnected { channel, task_id }
    }

    /// Apply one transport event.
    pub fn handle(&mut self, message: ChannelMessage) -> Transition {
        let (channel, task_id) = match self.state {
            ChannelState::Open { channel, task_id } if channel == message.channel => {
                (channel, task_id)
            }
            _ => {
                debug!(
                    component = "output",
                    event = "output.channel.stale_event",
                    channel = message.channel.0,
                );
                return Transition::Stale(message.channel);
            }
        };

        match message.event {
            ChannelEvent::Opened => {
                self.buffer.clear();
                self.renderer = R::default();
                Transition::Reset
            }
            ChannelEvent::Chunk(text) => {
                let markup = self.renderer.render(&text);
                self.buffer.push_str(&markup);
                Transition::Appended(markup)
            }
            ChannelEvent::Closed => {
                self.state = ChannelState::Closed;
                info!(
                    component = "output",
                    event = "output.channel.closed_remotely",
                    task_id = %task_id,
                    channel = channel.0,
                );
                Transition::RemoteClosed { task_id }
            }
        }
    }
}
