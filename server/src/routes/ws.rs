//! WebSocket handler: bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection id and enters a `select!` loop:
//! - Incoming client frames → decode + dispatch by syscall
//! - Broadcast frames queued by the relay → forward to client
//!
//! Session commands are applied under the relay lock and answered inline,
//! after any broadcasts already queued for the sender.
//! Tunnel commands run outside the lock: the transition is spawned, a
//! loading status is broadcast first and the settled status after, and the
//! direct reply reaches the sender through its relay queue.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → classify the peer as local or remote
//! 2. Send `session:connected` with `connection_id` and `is_local`
//! 3. Register with the relay; client frames → relay → replies + broadcasts
//! 4. Close → relay drops the peer and its controller registration

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Response;
use frames::{CodecError, Frame, Status};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use control::protocol::{Command, Event, syscall};

use crate::services::tunnel::TunnelError;
use crate::state::AppState;

/// Headers that reveal the request passed through a proxy or tunnel.
const PROXY_HEADERS: [&str; 10] = [
    "x-forwarded-for",
    "x-real-ip",
    "cf-connecting-ip",
    "true-client-ip",
    "fastly-client-ip",
    "x-cluster-client-ip",
    "x-forwarded",
    "forwarded-for",
    "forwarded",
    "ngrok-skip-browser-warning",
];

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let is_local = is_truly_local(addr, &headers);
    ws.on_upgrade(move |socket| run_ws(socket, state, is_local))
}

/// Loopback peer with no proxy header. Tunnelled traffic arrives from
/// loopback too, so the headers are what tell it apart.
#[must_use]
pub fn is_truly_local(addr: SocketAddr, headers: &HeaderMap) -> bool {
    addr.ip().to_canonical().is_loopback() && !PROXY_HEADERS.iter().any(|name| headers.contains_key(*name))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, is_local: bool) {
    let connection_id = Uuid::new_v4().to_string();

    // Per-connection queue for broadcasts and deferred replies.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_queue_capacity);

    let welcome = Event::Connected { connection_id: connection_id.clone(), is_local }.to_frame();
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }

    state.relay.lock().await.connect(&connection_id, client_tx, is_local);
    info!(%connection_id, is_local, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(msg) = msg else { break };
                let Ok(msg) = msg else { break };
                let inbound = match msg {
                    Message::Binary(bytes) => frames::decode_frame(&bytes),
                    Message::Text(text) => frames::decode_json_frame(text.as_str()),
                    Message::Close(_) => break,
                    _ => continue,
                };
                let replies = process_inbound(&state, &connection_id, is_local, inbound).await;
                for frame in with_queued_first(&mut client_rx, replies) {
                    let _ = send_frame(&mut socket, &frame).await;
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    state.relay.lock().await.disconnect(&connection_id);
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Process one decoded inbound frame and return frames for the sender.
///
/// Kept apart from the socket so tests can drive dispatch with plain
/// channels.
async fn process_inbound(
    state: &AppState,
    connection_id: &str,
    is_local: bool,
    inbound: Result<Frame, CodecError>,
) -> Vec<Frame> {
    let mut req = match inbound {
        Ok(frame) => frame,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let message = format!("invalid frame: {e}");
            return vec![Event::GatewayError { message }.to_frame()];
        }
    };

    if req.status != Status::Request {
        debug!(%connection_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: ignoring non-request frame");
        return Vec::new();
    }

    // Stamp the connection as `from`; clients never choose their identity.
    req.from = Some(connection_id.to_owned());
    info!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    match req.syscall.as_str() {
        syscall::TUNNEL_STATUS => vec![req.done_with(state.tunnel.status().await.to_data())],
        syscall::TUNNEL_TOGGLE => handle_tunnel_toggle(state, connection_id, is_local, &req).await,
        _ => vec![state.relay.lock().await.handle(connection_id, &req)],
    }
}

// =============================================================================
// TUNNEL HANDLER
// =============================================================================

async fn handle_tunnel_toggle(state: &AppState, connection_id: &str, is_local: bool, req: &Frame) -> Vec<Frame> {
    let enable = match Command::from_frame(req) {
        Ok(Command::ToggleTunnel { enable }) => enable,
        Ok(_) => return vec![req.error("expected tunnel:toggle")],
        Err(e) => return vec![req.error_from(&e)],
    };
    if !is_local {
        warn!(%connection_id, "ws: remote tunnel toggle rejected");
        return vec![req.error_from(&TunnelError::Forbidden)];
    }
    let guard = match state.tunnel.begin() {
        Ok(guard) => guard,
        Err(e) => return vec![req.error_from(&e)],
    };

    let loading = state.tunnel.status().await;
    state.relay.lock().await.broadcast(Event::TunnelChanged { status: loading });

    let state = state.clone();
    let connection_id = connection_id.to_owned();
    let req = req.clone();
    tokio::spawn(async move {
        let result = state.tunnel.toggle(guard, enable).await;
        let (reply, status) = match result {
            Ok(status) => (req.done_with(status.to_data()), status),
            Err(e) => (req.error_from(&e), state.tunnel.status().await),
        };
        let mut relay = state.relay.lock().await;
        if !relay.send_to(&connection_id, reply) {
            debug!(%connection_id, "ws: tunnel requester gone before reply");
        }
        relay.broadcast(Event::TunnelChanged { status });
    });

    Vec::new()
}

// =============================================================================
// HELPERS
// =============================================================================

/// Frames already queued for this connection go out ahead of `replies`, so
/// a reply (a `screen:init` snapshot in particular) is never followed by
/// broadcasts older than it.
fn with_queued_first(queue: &mut mpsc::Receiver<Frame>, replies: Vec<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = queue.try_recv() {
        frames.push(frame);
    }
    frames.extend(replies);
    frames
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    if frame.status == Status::Error {
        let code = frame.get_str(frames::FRAME_CODE).unwrap_or("-");
        let message = frame.error_message().unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    let bytes = frames::encode_frame(frame);
    socket.send(Message::Binary(bytes.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
