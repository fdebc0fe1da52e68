//! `taskdeck serve`: run the tasks in a session file and serve the dashboard endpoints.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::color;
use crate::config::SessionConfig;
use crate::websocket::router;

/// Ports tried after the preferred one is taken.
const PORT_FALLBACKS: u16 = 9;

pub struct ServeOptions<'a> {
    pub config_path: &'a Path,
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
}

pub async fn run(options: ServeOptions<'_>) -> anyhow::Result<()> {
    let config = SessionConfig::load(options.config_path)?;
    let bind = options.bind.unwrap_or(config.server.bind);
    let port = options.port.unwrap_or(config.server.port);

    let registry = Arc::new(config.build_registry());
    info!(
        component = "server",
        event = "server.session_loaded",
        session = %registry.name(),
        tasks = registry.len(),
        "Session loaded"
    );

    let listener = bind_with_fallback(bind, port).await?;
    let addr = listener.local_addr()?;
    color::status_ok("Session", registry.name());
    color::status_ok("Listening", &format!("http://{addr}"));

    registry.start_all();

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!(component = "server", event = "server.stopped", "Server stopped");
    Ok(())
}

fn port_candidates(port: u16) -> impl Iterator<Item = u16> {
    (0..=PORT_FALLBACKS).filter_map(move |offset| port.checked_add(offset))
}

async fn bind_with_fallback(bind: IpAddr, port: u16) -> anyhow::Result<TcpListener> {
    let mut last_err = None;
    for candidate in port_candidates(port) {
        match TcpListener::bind(SocketAddr::new(bind, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!(
                    component = "server",
                    event = "server.port_in_use",
                    port = candidate,
                    "Port in use, trying next"
                );
                last_err = Some(e);
            }
            Err(e) => return Err(e).with_context(|| format!("binding {bind}:{candidate}")),
        }
    }
    let err = last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::AddrInUse));
    Err(err).with_context(|| format!("no free port in {port}..={}", port.saturating_add(PORT_FALLBACKS)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal_failed",
            error = %e,
            "Failed to listen for ctrl-c"
        );
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_cover_preferred_port_and_nine_more() {
        let ports: Vec<_> = port_candidates(4242).collect();
        assert_eq!(ports.first(), Some(&4242));
        assert_eq!(ports.last(), Some(&4251));
        assert_eq!(ports.len(), 10);
    }

    #[test]
    fn candidates_stop_at_u16_max() {
        assert_eq!(port_candidates(u16::MAX - 1).count(), 2);
    }

    #[tokio::test]
    async fn taken_port_falls_through_to_next() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let listener = bind_with_fallback(IpAddr::from([127, 0, 0, 1]), port).await.unwrap();
        let bound = listener.local_addr().unwrap().port();
        assert_ne!(bound, port);
        assert!(bound > port && bound <= port.saturating_add(PORT_FALLBACKS));
    }
}
