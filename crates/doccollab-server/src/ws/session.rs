//! Per-connection session task: upgrade through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use doccollab_core::ConnectionId;
use doccollab_core::protocol::{AUTH_FAILURE_CLOSE_CODE, ServerMessage};

use crate::config::ServerConfig;

use super::connection::{ClientConnection, OutboundFrame};
use super::rooms::RoomRegistry;
use super::router::MessageRouter;

/// How long to wait for queued frames to flush on teardown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a WebSocket session for one connected client.
///
/// 1. Creates the connection state (`Unauthenticated`) and its outbound
///    forwarder task
/// 2. Processes inbound frames strictly in arrival order, one at a time,
///    through the router's per-message error boundary
/// 3. Sends periodic Ping frames and disconnects unresponsive clients
/// 4. On any exit path — client close, protocol-fatal error, server
///    shutdown — leaves every joined room before the session is discarded
#[instrument(skip_all, fields(conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    router: Arc<MessageRouter>,
    rooms: Arc<RoomRegistry>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) {
    let conn_id = ConnectionId::new();
    let _ = tracing::Span::current().record("conn_id", conn_id.as_str());

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (send_tx, mut send_rx) = mpsc::channel::<OutboundFrame>(config.send_queue_depth);
    let connection = Arc::new(ClientConnection::new(conn_id.clone(), send_tx));

    let connection_start = std::time::Instant::now();
    info!("client connected");
    counter!("ws_connections_total").increment(1);
    gauge!("ws_connections_active").increment(1.0);

    // Outbound forwarder: drains the send queue in FIFO order and owns the
    // Ping schedule, so per-recipient delivery order is preserved. When it
    // exits — pong timeout or a dead sink — this token wakes the inbound
    // loop so the whole session tears down instead of pending forever on a
    // half-open socket.
    let writer_gone = CancellationToken::new();
    let ping_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let pong_timeout = Duration::from_secs(config.heartbeat_timeout_secs);
    // Weak so the session's final drop closes the queue and ends this task.
    let outbound_conn = Arc::downgrade(&connection);
    let writer_guard = writer_gone.clone();
    let mut outbound = tokio::spawn(async move {
        let _cancel_on_exit = writer_guard.drop_guard();
        let mut ticker = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    match frame {
                        Some(OutboundFrame::Text(text)) => {
                            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(OutboundFrame::Close(code)) => {
                            let _ = ws_tx
                                .send(Message::Close(Some(CloseFrame {
                                    code,
                                    reason: "authentication failed".into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    // Session gone: let recv() drain the remaining frames.
                    let Some(conn) = outbound_conn.upgrade() else { continue };
                    if !conn.check_alive() && conn.last_pong_elapsed() > pong_timeout {
                        warn!(conn_id = %conn.id, "client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound loop: strict arrival order, one message at a time.
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = writer_gone.cancelled() => {
                debug!("outbound writer ended, closing session");
                break;
            }
            () = cancel.cancelled() => {
                debug!("server shutting down, closing session");
                break;
            }
        };
        let Some(Ok(msg)) = msg else {
            break;
        };

        let text = match msg {
            Message::Text(ref text) => Some(text.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(text) => Some(text.to_owned()),
                Err(_) => {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };
        connection.mark_alive();

        // Per-message error boundary: one bad message never kills the loop.
        if let Err(err) = router.dispatch(&connection, &text).await {
            counter!("ws_message_errors_total").increment(1);
            debug!(error = %err, "message rejected");
            let _ = connection.send_message(&ServerMessage::error(err.to_string()));
            if err.is_fatal() {
                connection.reject();
                let _ = connection.close(AUTH_FAILURE_CLOSE_CODE);
                break;
            }
        }
    }

    // Teardown, on every exit path: leave all rooms first so no broadcast
    // can still target this session, then let queued frames flush.
    rooms.leave_all(&connection).await;

    info!(dropped = connection.drop_count(), "client disconnected");
    counter!("ws_disconnections_total").increment(1);
    gauge!("ws_connections_active").decrement(1.0);
    histogram!("ws_connection_duration_seconds").record(connection_start.elapsed().as_secs_f64());

    drop(connection);
    if tokio::time::timeout(FLUSH_TIMEOUT, &mut outbound).await.is_err() {
        outbound.abort();
    }
}

#[cfg(test)]
mod tests {
    // Session behavior (upgrade, close codes, heartbeat disconnects) needs a
    // real socket and is covered by tests/integration.rs. State-machine and
    // dispatch logic is unit-tested in connection.rs and router.rs.
}
