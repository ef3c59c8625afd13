//! Session handling for the relay server.
//!
//! This module owns the accept loop and the per-session tasks that wire a
//! transport session to the core router: a writer task drains the
//! connection's bounded outbound queue into the socket, while the reader
//! loop feeds inbound envelopes to [`Router::inbound`].

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use relay_core::{ConnectionHandle, Router};
use relay_transport::{Session, SessionWriter, Transport, WebSocketConfig, WebSocketTransport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: Arc<Router>,
    /// Server configuration.
    pub config: Config,
    /// Number of sessions currently running.
    active_sessions: AtomicUsize,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: Arc::new(Router::new()),
            config,
            active_sessions: AtomicUsize::new(0),
        }
    }
}

/// Run the chat server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!("Failed to start metrics server: {}", e);
        }
    }

    let transport = WebSocketTransport::new(WebSocketConfig {
        bind_addr: config.bind_addr()?,
        max_message_size: config.limits.max_message_size,
    })
    .await?;

    info!(
        "Relay server listening on ws://{}",
        transport
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    );

    let state = Arc::new(AppState::new(config));
    run_accept_loop(transport, state).await
}

/// Accept sessions until the listener fails.
async fn run_accept_loop(transport: WebSocketTransport, state: Arc<AppState>) -> Result<()> {
    loop {
        match transport.accept().await {
            Ok(session) => {
                let active = state.active_sessions.load(Ordering::SeqCst);
                if active >= state.config.limits.max_connections {
                    warn!(active, "Connection limit reached, refusing session");
                    metrics::record_error("connection_limit");
                    continue; // dropping the session closes the socket
                }

                let state = Arc::clone(&state);
                tokio::spawn(handle_session(session, state));
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
                metrics::record_error("accept");
            }
        }
    }
}

/// Drive one session from accept to close.
async fn handle_session(session: Box<dyn Session>, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    state.active_sessions.fetch_add(1, Ordering::SeqCst);

    let remote = session.remote_addr();
    let (mut reader, writer) = session.split();

    let (handle, outbound_rx) = ConnectionHandle::new(state.config.limits.outbound_queue_capacity);
    // Registry cleanup is automatic from here on, whatever closes us.
    state.router.attach(&handle);

    debug!(
        connection = %handle.id(),
        remote = remote.as_deref().unwrap_or("unknown"),
        "Session started"
    );

    let writer_task = tokio::spawn(pump_outbound(
        writer,
        outbound_rx,
        handle.closed_signal(),
        Arc::clone(&handle),
    ));

    let mut closed = handle.closed_signal();
    loop {
        if *closed.borrow_and_update() {
            // Closed from the router side (overflow, routing error elsewhere).
            break;
        }

        tokio::select! {
            _ = closed.changed() => continue,

            inbound = reader.recv() => match inbound {
                Ok(Some(envelope)) => {
                    metrics::record_message("inbound");
                    let start = Instant::now();

                    if let Err(e) = state.router.inbound(&handle, envelope) {
                        warn!(connection = %handle.id(), error = %e, "Routing error, closing session");
                        metrics::record_error("routing");
                        break;
                    }

                    metrics::record_routing_latency(start.elapsed().as_secs_f64());
                    metrics::set_online_identities(state.router.stats().online_identities);
                }
                Ok(None) => {
                    debug!(connection = %handle.id(), "Peer closed the session");
                    break;
                }
                Err(e) => {
                    warn!(connection = %handle.id(), error = %e, "Transport error");
                    metrics::record_error("transport");
                    break;
                }
            },
        }
    }

    // Unbind and broadcast the updated user list, synchronously with close.
    handle.close();
    metrics::set_online_identities(state.router.stats().online_identities);

    let _ = writer_task.await;
    state.active_sessions.fetch_sub(1, Ordering::SeqCst);

    debug!(connection = %handle.id(), "Session ended");
}

/// Drain the connection's outbound queue into the transport writer.
///
/// Stops when the connection closes or the transport rejects a write; a
/// rejected write closes the connection so the registry stays consistent.
async fn pump_outbound(
    mut writer: Box<dyn SessionWriter>,
    mut outbound_rx: mpsc::Receiver<relay_protocol::Envelope>,
    mut closed: watch::Receiver<bool>,
    handle: Arc<ConnectionHandle>,
) {
    loop {
        if *closed.borrow_and_update() {
            let _ = writer.close().await;
            break;
        }

        tokio::select! {
            _ = closed.changed() => continue,

            maybe = outbound_rx.recv() => match maybe {
                Some(envelope) => {
                    if let Err(e) = writer.send(&envelope).await {
                        warn!(connection = %handle.id(), error = %e, "Write failed, closing session");
                        metrics::record_error("write");
                        handle.close();
                        break;
                    }
                    metrics::record_message("outbound");
                }
                None => break,
            },
        }
    }
}
