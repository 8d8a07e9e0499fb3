//! WebSocket connection handling.
//!
//! Each connection is registered with the room transport under a fresh
//! socket id, then served by a single task that multiplexes inbound client
//! frames, queued outbound frames, heartbeats and shutdown.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use bytes::BytesMut;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use herald_core::{JoinOutcome, LeaveReason, Socket};
use herald_protocol::{codec, ClientFrame, ServerFrame, PROTOCOL_VERSION};
use herald_transport::generate_socket_id;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::metrics::{self, ConnectionMetricsGuard};
use crate::server::AppState;

type Sender = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let socket = handshake_socket(generate_socket_id(), &headers);
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |ws| handle_websocket(ws, socket, state))
}

/// Build the socket context from the handshake headers.
fn handshake_socket(id: String, headers: &HeaderMap) -> Socket {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str(), value.to_str().ok()?)))
        .fold(Socket::new(id), |socket, (name, value)| {
            socket.with_header(name, value)
        })
}

async fn handle_websocket(ws: WebSocket, socket: Socket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let socket_id = socket.id().to_string();
    let mut outbound = state.transport.register(&socket_id);
    let mut shutdown = state.shutdown.clone();

    debug!(socket = %socket_id, "WebSocket connected");

    let (mut sender, mut receiver) = ws.split();

    let connected = ServerFrame::connected(&socket_id, PROTOCOL_VERSION);
    if send_frame(&mut sender, &connected).await.is_err() {
        error!(socket = %socket_id, "Failed to send connected frame");
        state.transport.unregister(&socket_id);
        return;
    }

    let mut read_buffer = BytesMut::with_capacity(4096);
    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(state.config.heartbeat.interval_ms.max(1)));
    heartbeat.tick().await;

    'connection: loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => {
                debug!(socket = %socket_id, "Closing connection for shutdown");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            Some(frame) = outbound.recv() => {
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::record_message(text.len(), "inbound");
                        match codec::decode_text::<ClientFrame>(&text) {
                            Ok(frame) => {
                                let work = handle_frame(frame, &socket, &state);
                                if flushing(work, &mut sender, &mut outbound).await.is_err() {
                                    break 'connection;
                                }
                            }
                            Err(e) => {
                                warn!(socket = %socket_id, error = %e, "Malformed client frame");
                                metrics::record_error("decode");
                            }
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_message(data.len(), "inbound");
                        read_buffer.extend_from_slice(&data);

                        loop {
                            match codec::decode_from::<ClientFrame>(&mut read_buffer) {
                                Ok(Some(frame)) => {
                                    let work = handle_frame(frame, &socket, &state);
                                    if flushing(work, &mut sender, &mut outbound).await.is_err() {
                                        break 'connection;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(socket = %socket_id, error = %e, "Malformed binary frame");
                                    metrics::record_error("decode");
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(socket = %socket_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(socket = %socket_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(socket = %socket_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Rooms are left before the socket is unregistered.
    let channels = state.transport.rooms_of(&socket_id);
    state.router.disconnect(&socket_id, &channels).await;
    for channel in &channels {
        if state.router.classifier().is_presence(channel) {
            metrics::record_presence_leave();
        }
    }
    state.transport.unregister(&socket_id);
    metrics::set_active_channels(state.transport.room_sizes().len());

    debug!(socket = %socket_id, channels = channels.len(), "WebSocket disconnected");
}

async fn handle_frame(frame: ClientFrame, socket: &Socket, state: &AppState) {
    trace!(socket = %socket.id(), frame = frame.name(), "Client frame");

    match frame {
        ClientFrame::Subscribe(data) => match state.router.join(socket, &data).await {
            JoinOutcome::Joined(kind) => {
                metrics::record_subscription(kind);
                metrics::set_active_channels(state.transport.room_sizes().len());
            }
            JoinOutcome::Rejected { code } => metrics::record_subscription_error(code),
            JoinOutcome::Ignored => {
                debug!(socket = %socket.id(), "Ignoring subscribe without channel");
            }
        },

        ClientFrame::Unsubscribe(data) => {
            if state.router.classifier().is_presence(&data.channel)
                && state.router.is_in_channel(socket.id(), &data.channel)
            {
                metrics::record_presence_leave();
            }
            state
                .router
                .leave(socket.id(), &data.channel, LeaveReason::Unsubscribed)
                .await;
            metrics::set_active_channels(state.transport.room_sizes().len());
        }

        ClientFrame::ClientEvent(data) => {
            if state.router.client_event(socket.id(), &data) {
                metrics::record_client_event();
            }
        }
    }
}

/// Drive `work` to completion while still delivering queued outbound
/// frames.
///
/// `work` always completes; a send failure is reported afterwards.
async fn flushing<F>(
    work: F,
    sender: &mut Sender,
    outbound: &mut mpsc::Receiver<ServerFrame>,
) -> Result<(), axum::Error>
where
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    loop {
        tokio::select! {
            biased;

            () = &mut work => return Ok(()),

            Some(frame) = outbound.recv() => {
                if let Err(e) = send_frame(sender, &frame).await {
                    work.await;
                    return Err(e);
                }
            }
        }
    }
}

async fn send_frame(sender: &mut Sender, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = match codec::encode_text(frame) {
        Ok(text) => text,
        Err(e) => {
            error!(event = %frame.event, error = %e, "Failed to encode frame");
            metrics::record_error("encode");
            return Ok(());
        }
    };
    metrics::record_message(text.len(), "outbound");
    sender.send(Message::Text(text)).await
}
