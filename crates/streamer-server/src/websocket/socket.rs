//! WebSocket session task: one connected client from upgrade to removal.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use super::handler::route_inbound;
use crate::metrics::{
    OUTBOUND_DROPPED_TOTAL, SESSION_DURATION_SECONDS, SESSIONS_ACTIVE, SESSIONS_CLOSED_TOTAL,
    SESSIONS_OPENED_TOTAL,
};
use crate::relay::RelayContext;
use crate::server::AppState;
use crate::session::ClientConnection;
use crate::session::lifecycle;

/// How long to wait for the writer to flush its close frame.
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Run one WebSocket session.
///
/// 1. Registers the connection and starts the relay and lifecycle tasks
/// 2. Routes inbound frames to the setup gate or the bridge
/// 3. Forwards outbound frames and sends periodic Pings
/// 4. On peer departure, reports a remote close to the lifecycle controller
/// 5. Removes the session only after its close rendezvous resolves
#[instrument(skip_all, fields(session_id))]
pub async fn run_ws_session(ws: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = ws.split();
    let config = state.config.clone();

    let (send_tx, send_rx) = mpsc::channel::<String>(config.outbound_queue);
    let connection = Arc::new(ClientConnection::new(send_tx));
    let session = state.registry.register(connection.clone());
    let session_id = session.id().clone();
    let _ = tracing::Span::current().record("session_id", session_id.as_str());

    let connection_start = Instant::now();
    info!(relay = state.relay.name(), "client connected");
    counter!(SESSIONS_OPENED_TOTAL).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);

    let (lifecycle, controller) =
        lifecycle::controller(session.clone(), state.registry.clone(), config.lifecycle);
    let ctx = RelayContext::new(session.clone(), state.registry.clone(), lifecycle.clone());
    let relay = state.relay.clone();
    let backend = tokio::spawn(async move { relay.run(ctx).await }.in_current_span());
    let lifecycle_task = tokio::spawn(controller.run(backend).in_current_span());

    let writer_done = CancellationToken::new();
    let mut writer = tokio::spawn(
        write_loop(
            ws_tx,
            send_rx,
            connection.clone(),
            config.heartbeat_interval,
            config.pong_timeout,
            writer_done.clone(),
        )
        .in_current_span(),
    );

    let shutdown = state.shutdown.token();
    let mut draining = false;
    let peer_gone = loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = route_inbound(&session, &lifecycle, text.as_str());
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => {
                        let _ = route_inbound(&session, &lifecycle, text);
                    }
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => connection.mark_alive(),
                Some(Ok(Message::Close(_))) => {
                    info!("client sent close frame");
                    break true;
                }
                Some(Err(error)) => {
                    debug!(%error, "websocket read failed");
                    break true;
                }
                None => break true,
            },
            () = session.close_complete().wait() => break false,
            () = writer_done.cancelled() => break true,
            () = shutdown.cancelled(), if !draining => {
                draining = true;
                lifecycle.shutdown();
            }
        }
    };

    if peer_gone {
        connection.mark_remote_closed();
        if !session.is_server_closed() {
            lifecycle.remote_closed();
        }
    }

    session.close_complete().wait().await;
    let _ = state.registry.remove(&session_id);
    match lifecycle_task.await {
        Ok(reason) => debug!(%reason, "lifecycle finished"),
        Err(error) => warn!(%error, "lifecycle task failed"),
    }
    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }

    let dropped = connection.drop_count();
    if dropped > 0 {
        counter!(OUTBOUND_DROPPED_TOTAL).increment(dropped);
    }
    info!(peer_gone, dropped, "client disconnected");
    counter!(SESSIONS_CLOSED_TOTAL).increment(1);
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Drain the outbound queue into the socket, send Pings, and finish with a
/// Close frame once the server asks for one. Queued text is flushed before
/// the Close frame.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<String>,
    connection: Arc<ClientConnection>,
    heartbeat_interval: Duration,
    pong_timeout: Duration,
    done: CancellationToken,
) {
    let _done = done.drop_guard();
    let mut ping_interval = tokio::time::interval(heartbeat_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;

            msg = send_rx.recv() => match msg {
                Some(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            () = connection.close_requested() => {
                let frame = connection.close_frame().unwrap_or_default();
                let close = CloseFrame {
                    code: frame.code,
                    reason: frame.reason.into(),
                };
                let _ = ws_tx.send(Message::Close(Some(close))).await;
                break;
            }
            _ = ping_interval.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > pong_timeout {
                    warn!("client unresponsive for {:?}, disconnecting", pong_timeout);
                    break;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}
