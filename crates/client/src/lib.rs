//! taskdeck Client
//!
//! Dashboard core: keeps the task list in sync with the server, preserves
//! the operator's selection across snapshots, streams the selected task's
//! output, and dispatches task actions.

pub mod action;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod markup;
pub mod output;
pub mod push;
pub mod store;
pub mod transport;

pub use action::{ActionDispatcher, ActionSink};
pub use config::ClientConfig;
pub use dashboard::{Dashboard, DashboardHandle, Intent, OutputEvent, OutputView};
pub use error::ClientError;
pub use markup::{AnsiHtmlRenderer, MarkupRenderer, PlainRenderer};
pub use output::{
    ChannelEvent, ChannelId, ChannelMessage, ChannelState, OutputStreamSession, OutputTransport,
    Transition,
};
pub use store::{reconcile_selection, AppState, StateStore, StateSubscriber, SubscriberRegistry};
pub use transport::WsOutputTransport;
