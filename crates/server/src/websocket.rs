//! HTTP and WebSocket endpoints

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use taskdeck_protocol::{
    TaskActionRequest, TaskId, HEALTH_PATH, TASKS_PATH, TASK_ACTION_PATH, TASK_OUTPUT_PATH,
};
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::registry::TaskRegistry;
use crate::stream::OutputCursor;
use crate::task::{TaskError, TaskEvent};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub fn router(registry: Arc<TaskRegistry>) -> Router {
    Router::new()
        .route(TASKS_PATH, get(task_list_handler))
        .route(&format!("{TASK_OUTPUT_PATH}/{{id}}"), get(task_output_handler))
        .route(TASK_ACTION_PATH, post(task_action_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(registry)
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn task_list_handler(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<TaskRegistry>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_task_list_socket(socket, registry))
}

/// Push the full task list on connect and after every status change.
async fn handle_task_list_socket(socket: WebSocket, registry: Arc<TaskRegistry>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.tasks.opened",
        connection_id = conn_id,
        "Task list connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut status = registry.subscribe_status();

    if send_task_list(&mut ws_tx, &registry, conn_id).await {
        loop {
            tokio::select! {
                changed = status.recv() => match changed {
                    Ok(task_id) => {
                        debug!(
                            component = "websocket",
                            event = "ws.tasks.status_changed",
                            connection_id = conn_id,
                            task_id = %task_id,
                        );
                        if !send_task_list(&mut ws_tx, &registry, conn_id).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            component = "websocket",
                            event = "ws.broadcast.lagged",
                            connection_id = conn_id,
                            skipped = n,
                            "Status subscriber lagged, skipped {n} changes"
                        );
                        if !send_task_list(&mut ws_tx, &registry, conn_id).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                incoming = ws_rx.next() => {
                    if !handle_incoming(incoming, &mut ws_tx, conn_id).await {
                        break;
                    }
                }
            }
        }
    }

    info!(
        component = "websocket",
        event = "ws.tasks.closed",
        connection_id = conn_id,
        "Task list connection closed"
    );
}

async fn send_task_list(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    registry: &TaskRegistry,
    conn_id: u64,
) -> bool {
    let json = match serde_json::to_string(&registry.snapshot()) {
        Ok(json) => json,
        Err(e) => {
            error!(
                component = "websocket",
                event = "ws.send.serialize_failed",
                connection_id = conn_id,
                error = %e,
                "Failed to serialize task list"
            );
            return true;
        }
    };
    send_text(ws_tx, json, conn_id).await
}

async fn send_text(ws_tx: &mut SplitSink<WebSocket, Message>, text: String, conn_id: u64) -> bool {
    if ws_tx.send(Message::Text(text.into())).await.is_err() {
        debug!(
            component = "websocket",
            event = "ws.send.disconnected",
            connection_id = conn_id,
            "WebSocket send failed, client disconnected"
        );
        return false;
    }
    true
}

/// Returns false when the connection should end.
async fn handle_incoming(
    incoming: Option<Result<Message, axum::Error>>,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    conn_id: u64,
) -> bool {
    match incoming {
        Some(Ok(Message::Ping(data))) => ws_tx.send(Message::Pong(data)).await.is_ok(),
        Some(Ok(Message::Close(_))) | None => {
            debug!(
                component = "websocket",
                event = "ws.connection.close_frame",
                connection_id = conn_id,
            );
            false
        }
        Some(Ok(_)) => true,
        Some(Err(e)) => {
            warn!(
                component = "websocket",
                event = "ws.connection.error",
                connection_id = conn_id,
                error = %e,
                "WebSocket error"
            );
            false
        }
    }
}

async fn task_output_handler(
    ws: WebSocketUpgrade,
    Path(task_id): Path<TaskId>,
    State(registry): State<Arc<TaskRegistry>>,
) -> Response {
    if registry.get(task_id).is_none() {
        return (StatusCode::NOT_FOUND, format!("Unknown task {task_id}")).into_response();
    }
    ws.on_upgrade(move |socket| handle_task_output_socket(socket, registry, task_id))
}

/// Send the output so far, then every new fragment.
async fn handle_task_output_socket(socket: WebSocket, registry: Arc<TaskRegistry>, task_id: TaskId) {
    let Some(task) = registry.get(task_id).cloned() else {
        return;
    };
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.output.opened",
        connection_id = conn_id,
        task_id = %task_id,
        "Task output connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = task.core().subscribe();
    let mut cursor = OutputCursor::default();
    let output = task.core().output();

    let mut open = match cursor.read(output) {
        Some(backlog) => send_text(&mut ws_tx, backlog, conn_id).await,
        None => true,
    };
    while open {
        tokio::select! {
            event = events.recv() => match event {
                Ok(TaskEvent::OutputUpdated) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    if let Some(fragment) = cursor.read(output) {
                        open = send_text(&mut ws_tx, fragment, conn_id).await;
                    }
                }
                Ok(TaskEvent::StatusChanged) => {}
                Err(broadcast::error::RecvError::Closed) => open = false,
            },
            incoming = ws_rx.next() => {
                open = handle_incoming(incoming, &mut ws_tx, conn_id).await;
            }
        }
    }

    info!(
        component = "websocket",
        event = "ws.output.closed",
        connection_id = conn_id,
        task_id = %task_id,
        bytes_sent = cursor.offset(),
        "Task output connection closed"
    );
}

async fn task_action_handler(
    State(registry): State<Arc<TaskRegistry>>,
    Json(request): Json<TaskActionRequest>,
) -> Response {
    let Some(task) = registry.get(request.task).cloned() else {
        warn!(
            component = "websocket",
            event = "action.unknown_task",
            task_id = %request.task,
            action = %request.action,
        );
        return (StatusCode::NOT_FOUND, format!("Unknown task {}", request.task)).into_response();
    };

    info!(
        component = "websocket",
        event = "action.performing",
        task_id = %request.task,
        action = %request.action,
        "Performing task action"
    );
    match task.perform_action(&request.action) {
        Ok(Some(body)) => (StatusCode::OK, body).into_response(),
        Ok(None) => (StatusCode::OK, "OK").into_response(),
        Err(e @ TaskError::UnsupportedAction(_)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e) => {
            error!(
                component = "websocket",
                event = "action.failed",
                task_id = %request.task,
                action = %request.action,
                error = %e,
                "Task action failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
