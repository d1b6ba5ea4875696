use super::*;
use crate::services::tunnel::TunnelManager;
use crate::state::test_helpers;
use axum::http::HeaderValue;
use control::content::Show;
use control::precedence::Flag;
use control::protocol::Snapshot;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;

const SHOW_JSON: &str = r#"{
    "projections": [
        { "title": "Intro", "contents": [
            { "type": "text", "content": "a", "group": "Verse" },
            { "type": "text", "content": "b" },
            { "type": "image", "content": "c.png", "group": "Chorus" }
        ], "loop_queue": [{ "group": 2 }, { "item": 1 }] },
        { "title": "Outro", "contents": [{ "type": "text", "content": "bye" }] }
    ]
}"#;

fn show() -> Show {
    Show::from_json(SHOW_JSON).expect("fixture show should parse")
}

fn sh_tunnel(script: &str) -> TunnelManager {
    TunnelManager::with_command("sh", vec!["-c".into(), script.into()], Duration::from_secs(5))
}

async fn join(state: &AppState, id: &str, is_local: bool) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(32);
    state.relay.lock().await.connect(id, tx, is_local);
    rx
}

async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed unexpectedly")
}

async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
    assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err(), "expected no frame");
}

// =============================================================================
// LOCAL DETECTION
// =============================================================================

#[test]
fn loopback_without_proxy_headers_is_local() {
    let addr: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
    assert!(is_truly_local(addr, &HeaderMap::new()));

    let v6: SocketAddr = "[::1]:5000".parse().expect("addr");
    assert!(is_truly_local(v6, &HeaderMap::new()));

    let mapped: SocketAddr = "[::ffff:127.0.0.1]:5000".parse().expect("addr");
    assert!(is_truly_local(mapped, &HeaderMap::new()));
}

#[test]
fn proxy_header_or_remote_peer_is_not_local() {
    let loopback: SocketAddr = "127.0.0.1:5000".parse().expect("addr");
    for name in PROXY_HEADERS {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static("1"));
        assert!(!is_truly_local(loopback, &headers), "{name} should mark the peer remote");
    }

    let lan: SocketAddr = "192.168.1.20:5000".parse().expect("addr");
    assert!(!is_truly_local(lan, &HeaderMap::new()));
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn undecodable_frame_yields_gateway_error() {
    let state = test_helpers::test_app_state();
    let replies = process_inbound(&state, "a", true, frames::decode_json_frame("{ nope")).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].syscall, syscall::GATEWAY_ERROR);
    assert!(replies[0].get_str("message").is_some_and(|m| m.starts_with("invalid frame")));
}

#[tokio::test]
async fn position_update_replies_and_broadcasts_stamped_frame() {
    let (state, _saved) = test_helpers::test_app_state_with(Some(show()), sh_tunnel("true"));
    let mut a = join(&state, "a", true).await;
    let mut b = join(&state, "b", false).await;

    let mut req = Command::UpdatePosition { projection: 0, slide: 2 }.to_frame();
    req.from = Some("spoofed".into());
    let replies = process_inbound(&state, "a", true, Ok(req.clone())).await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].status, Status::Done);
    assert_eq!(replies[0].parent_id.as_deref(), Some(req.id.as_str()));

    for rx in [&mut a, &mut b] {
        let frame = recv_frame(rx).await;
        assert_eq!(frame.syscall, syscall::POSITION_CHANGED);
        assert_eq!(frame.from.as_deref(), Some("a"));
        assert_eq!(frame.get_str("origin"), Some("a"));
    }
}

#[tokio::test]
async fn non_request_frames_are_ignored() {
    let state = test_helpers::test_app_state();
    let mut a = join(&state, "a", true).await;
    let reply = Command::InitScreen.to_frame().done();
    assert!(process_inbound(&state, "a", true, Ok(reply)).await.is_empty());
    assert_no_frame(&mut a).await;
}

#[tokio::test]
async fn screen_init_returns_snapshot_with_show() {
    let (state, _saved) = test_helpers::test_app_state_with(Some(show()), sh_tunnel("true"));
    let _a = join(&state, "a", false).await;
    process_inbound(&state, "a", false, Ok(Command::SetOverride { flag: Flag::Black, active: true }.to_frame())).await;

    let replies = process_inbound(&state, "a", false, Ok(Command::InitScreen.to_frame())).await;
    let snapshot = Snapshot::from_data(&replies[0].data).expect("snapshot");
    assert!(snapshot.flags.black);
    assert_eq!(snapshot.effective_view, -1);
    assert_eq!(snapshot.show.map(|s| s.len()), Some(2));
}

#[tokio::test]
async fn queued_broadcasts_go_out_before_snapshot_reply() {
    let (state, _saved) = test_helpers::test_app_state_with(Some(show()), sh_tunnel("true"));
    let mut display = join(&state, "display", false).await;
    let _ctl = join(&state, "ctl", true).await;
    process_inbound(&state, "ctl", true, Ok(Command::UpdatePosition { projection: 0, slide: 1 }.to_frame())).await;
    process_inbound(&state, "ctl", true, Ok(Command::UpdatePosition { projection: 0, slide: 2 }.to_frame())).await;

    let replies = process_inbound(&state, "display", false, Ok(Command::InitScreen.to_frame())).await;
    let outbound = with_queued_first(&mut display, replies);

    let syscalls: Vec<&str> = outbound.iter().map(|f| f.syscall.as_str()).collect();
    assert_eq!(syscalls, [syscall::POSITION_CHANGED, syscall::POSITION_CHANGED, syscall::SCREEN_INIT]);
    let last = outbound.last().expect("snapshot reply");
    assert_eq!(last.status, Status::Done);
    let snapshot = Snapshot::from_data(&last.data).expect("snapshot");
    assert_eq!((snapshot.projection, snapshot.slide), (0, 2));
    assert_no_frame(&mut display).await;
}

#[tokio::test]
async fn settings_update_is_persisted_and_broadcast_to_others() {
    let (state, mut saved) = test_helpers::test_app_state_with(None, sh_tunnel("true"));
    let mut a = join(&state, "a", true).await;
    let mut b = join(&state, "b", false).await;

    let mut settings = control::settings::Settings::default();
    settings.backdrop.color = "#112233ff".into();
    let old_revision = settings.revision().to_owned();
    let replies = process_inbound(&state, "a", true, Ok(Command::UpdateSettings { settings }.to_frame())).await;
    assert_eq!(replies[0].status, Status::Done);

    timeout(Duration::from_millis(200), saved.changed()).await.expect("save").expect("open");
    let stored = saved.borrow_and_update().clone();
    assert_eq!(stored.backdrop.color, "#112233ff");
    assert_ne!(stored.revision(), old_revision);

    assert_eq!(recv_frame(&mut b).await.syscall, syscall::SETTINGS_CHANGED);
    assert_no_frame(&mut a).await;
}

// =============================================================================
// TUNNEL
// =============================================================================

#[tokio::test]
async fn remote_tunnel_toggle_is_forbidden() {
    let state = test_helpers::test_app_state();
    let replies = process_inbound(&state, "r", false, Ok(Command::ToggleTunnel { enable: true }.to_frame())).await;
    assert_eq!(replies[0].status, Status::Error);
    assert_eq!(replies[0].get_str("code"), Some("E_FORBIDDEN"));
}

#[tokio::test]
async fn tunnel_toggle_while_busy_is_rejected() {
    let state = test_helpers::test_app_state();
    let _guard = state.tunnel.begin().expect("claim");
    let replies = process_inbound(&state, "l", true, Ok(Command::ToggleTunnel { enable: true }.to_frame())).await;
    assert_eq!(replies[0].get_str("code"), Some("E_TUNNEL_BUSY"));
}

#[tokio::test]
async fn tunnel_toggle_broadcasts_loading_then_settled_status() {
    let script = "echo 'INF https://calm-lake.trycloudflare.com' >&2; sleep 30";
    let (state, _saved) = test_helpers::test_app_state_with(None, sh_tunnel(script));
    let mut local = join(&state, "l", true).await;
    let mut display = join(&state, "d", false).await;

    let req = Command::ToggleTunnel { enable: true }.to_frame();
    assert!(process_inbound(&state, "l", true, Ok(req.clone())).await.is_empty());

    let loading = recv_frame(&mut display).await;
    assert_eq!(loading.syscall, syscall::TUNNEL_CHANGED);
    assert_eq!(loading.get_bool("active"), None);

    let settled = timeout(Duration::from_secs(5), display.recv()).await.expect("settled").expect("open");
    assert_eq!(settled.get_bool("active"), Some(true));
    assert_eq!(settled.get_str("url"), Some("https://calm-lake.trycloudflare.com"));

    // Requester sees the loading broadcast, its reply, then the settled broadcast.
    assert_eq!(recv_frame(&mut local).await.syscall, syscall::TUNNEL_CHANGED);
    let reply = recv_frame(&mut local).await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.parent_id.as_deref(), Some(req.id.as_str()));

    let status = process_inbound(&state, "d", false, Ok(Command::TunnelStatus.to_frame())).await;
    assert_eq!(status[0].get_bool("active"), Some(true));
    state.tunnel.shutdown().await;
}

#[tokio::test]
async fn failed_tunnel_start_replies_error_and_broadcasts_it() {
    let (state, _saved) = test_helpers::test_app_state_with(None, sh_tunnel("echo 'ERR boom' >&2; exit 1"));
    let mut local = join(&state, "l", true).await;

    process_inbound(&state, "l", true, Ok(Command::ToggleTunnel { enable: true }.to_frame())).await;
    assert_eq!(recv_frame(&mut local).await.get_bool("active"), None);

    let reply = timeout(Duration::from_secs(5), local.recv()).await.expect("reply").expect("open");
    assert_eq!(reply.status, Status::Error);
    assert_eq!(reply.get_str("code"), Some("E_TUNNEL_EXITED"));

    let settled = recv_frame(&mut local).await;
    assert_eq!(settled.get_bool("active"), Some(false));
    assert!(settled.get_str("error").is_some());
}

// =============================================================================
// END TO END
// =============================================================================

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = crate::routes::app(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await;
    });
    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.expect("ws connect");
    client
}

async fn next_frame(client: &mut Client) -> Frame {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("ws receive timed out")
            .expect("ws stream ended")
            .expect("ws error");
        if let WsMessage::Binary(bytes) = msg {
            return frames::decode_frame(&bytes).expect("binary frame should decode");
        }
    }
}

async fn send(client: &mut Client, frame: &Frame) {
    client.send(WsMessage::Binary(frames::encode_frame(frame).into())).await.expect("ws send");
}

#[tokio::test]
async fn websocket_clients_follow_each_other() {
    let addr = serve(test_helpers::test_app_state()).await;
    let mut ctl = connect(addr).await;
    let mut display = connect(addr).await;

    let hello = next_frame(&mut ctl).await;
    assert_eq!(hello.syscall, syscall::SESSION_CONNECTED);
    assert_eq!(hello.get_bool("is_local"), Some(true));
    let ctl_id = hello.get_str("connection_id").expect("connection id").to_owned();
    assert_eq!(next_frame(&mut display).await.syscall, syscall::SESSION_CONNECTED);

    send(&mut ctl, &Command::RegisterController { connection_id: ctl_id.clone() }.to_frame()).await;
    assert_eq!(next_frame(&mut ctl).await.get_bool("has_any"), Some(true));
    assert_eq!(next_frame(&mut display).await.syscall, syscall::CONTROLLER_HAS_ANY);

    let req = Command::UpdatePosition { projection: 1, slide: 4 }.to_frame();
    send(&mut ctl, &req).await;
    let reply = next_frame(&mut ctl).await;
    assert_eq!(reply.parent_id.as_deref(), Some(req.id.as_str()));

    let changed = next_frame(&mut display).await;
    assert_eq!(changed.syscall, syscall::POSITION_CHANGED);
    assert_eq!(changed.from.as_deref(), Some(ctl_id.as_str()));
    assert_eq!(changed.get_i64("slide"), Some(4));

    drop(ctl);
    let presence = next_frame(&mut display).await;
    assert_eq!(presence.syscall, syscall::CONTROLLER_HAS_ANY);
    assert_eq!(presence.get_bool("has_any"), Some(false));
}

#[tokio::test]
async fn websocket_accepts_json_text_frames() {
    let addr = serve(test_helpers::test_app_state()).await;
    let mut client = connect(addr).await;
    next_frame(&mut client).await;

    let req = Command::QueryControllers.to_frame();
    let text = serde_json::to_string(&req).expect("json");
    client.send(WsMessage::Text(text.into())).await.expect("ws send");

    let reply = next_frame(&mut client).await;
    assert_eq!(reply.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(reply.get_bool("has_any"), Some(false));

    client.send(WsMessage::Text("garbage".into())).await.expect("ws send");
    assert_eq!(next_frame(&mut client).await.syscall, syscall::GATEWAY_ERROR);
}

#[tokio::test]
async fn healthz_is_ok() {
    let addr = serve(test_helpers::test_app_state()).await;
    let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    tokio::io::AsyncWriteExt::write_all(&mut stream, b"GET /healthz HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .expect("write");
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response).await.expect("read");
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {response}");
}
