//! End-to-end tests using a real WebSocket client against a bound server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use streamer_core::{Notification, ProtocolError};
use streamer_server::config::ServerConfig;
use streamer_server::relay::{Relay, RelayContext, RelayError};
use streamer_server::server::GatewayServer;
use streamer_server::shutdown::DrainOutcome;
use streamer_server::session::LifecycleConfig;

const TIMEOUT: Duration = Duration::from_secs(5);
const TIME_OUT: Duration = Duration::from_millis(200);
const TIME_TO_SLEEP: Duration = Duration::from_millis(500);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Echoes every inbound JSON payload back as `{data: payload}`. Binds the
/// handshake's `user` field as identity when present.
struct EchoRelay {
    finished: Arc<AtomicUsize>,
}

struct CountOnDrop(Arc<AtomicUsize>);

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        let _ = self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Relay for EchoRelay {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn run(&self, ctx: RelayContext) -> Result<(), RelayError> {
        let _finished = CountOnDrop(self.finished.clone());
        let setup = ctx.setup().await?;
        if let Some(user) = setup.get("user").and_then(Value::as_str) {
            ctx.bind_identity(user)?;
        }
        let mut inbound = ctx.inbound()?;
        while let Some(message) = inbound.next().await {
            let value: Value = serde_json::from_str(&message).map_err(ProtocolError::InvalidJson)?;
            let _ = ctx.emit(Notification::data(value));
        }
        Ok(())
    }
}

struct Harness {
    url: String,
    server: GatewayServer,
    finished: Arc<AtomicUsize>,
}

async fn boot_server() -> Harness {
    boot_server_with(TIME_OUT, TIME_TO_SLEEP).await
}

/// Timers long enough that no escalation interferes with the test.
async fn boot_patient_server() -> Harness {
    boot_server_with(Duration::from_secs(30), Duration::from_secs(30)).await
}

async fn boot_server_with(time_out: Duration, time_to_sleep: Duration) -> Harness {
    let finished = Arc::new(AtomicUsize::new(0));
    let config = ServerConfig {
        lifecycle: LifecycleConfig {
            time_out,
            time_to_sleep,
            drain_timeout: Duration::from_secs(1),
        },
        ..ServerConfig::default()
    };
    let relay = Arc::new(EchoRelay {
        finished: finished.clone(),
    });
    let server = GatewayServer::new(config, relay);
    let (addr, _handle) = server.listen().await.unwrap();
    Harness {
        url: format!("ws://{addr}/ws"),
        server,
        finished,
    }
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next non-control frame.
async fn next_frame(ws: &mut WsStream) -> Message {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if !matches!(msg, Message::Ping(_) | Message::Pong(_)) {
            return msg;
        }
    }
}

async fn next_json(ws: &mut WsStream) -> Value {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn expect_normal_close(ws: &mut WsStream) {
    match next_frame(ws).await {
        Message::Close(Some(frame)) => {
            assert_eq!(u16::from(frame.code), 1000);
            assert_eq!(frame.reason.as_str(), "Closing connection");
        }
        other => panic!("expected close frame, got {other:?}"),
    }
}

async fn wait_until_empty(server: &GatewayServer) {
    timeout(TIMEOUT, async {
        while !server.registry().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sessions were not released");
}

#[tokio::test]
async fn silent_session_is_put_to_sleep() {
    let h = boot_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {"lang": "en"}})).await;

    let started = std::time::Instant::now();
    assert_eq!(next_json(&mut ws).await, json!({"data": null, "isAsleep": true}));
    assert!(started.elapsed() >= TIME_TO_SLEEP - Duration::from_millis(50));
    expect_normal_close(&mut ws).await;

    wait_until_empty(&h.server).await;
    assert_eq!(h.finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn active_session_goes_idle_after_short_grace() {
    let h = boot_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {"lang": "en"}})).await;
    send_json(&mut ws, json!({"text": "hello"})).await;

    assert_eq!(next_json(&mut ws).await, json!({"data": {"text": "hello"}}));
    let idle_from = std::time::Instant::now();
    assert_eq!(next_json(&mut ws).await, json!({"data": null, "isAsleep": false}));
    let waited = idle_from.elapsed();
    assert!(waited < TIME_TO_SLEEP, "short timer should have fired, waited {waited:?}");
    expect_normal_close(&mut ws).await;

    wait_until_empty(&h.server).await;
}

#[tokio::test]
async fn client_close_cleans_up_once_without_notification() {
    let h = boot_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {"lang": "en"}})).await;
    ws.close(None).await.unwrap();

    // Only the close handshake may arrive, never a lifecycle envelope.
    while let Ok(Some(Ok(msg))) = timeout(TIMEOUT, ws.next()).await {
        assert!(
            matches!(msg, Message::Close(_) | Message::Ping(_) | Message::Pong(_)),
            "unexpected frame after client close: {msg:?}"
        );
    }

    wait_until_empty(&h.server).await;
    // Outlive the long timer to prove nothing escalates again.
    tokio::time::sleep(TIME_TO_SLEEP + Duration::from_millis(100)).await;
    assert_eq!(h.finished.load(Ordering::SeqCst), 1);
    assert!(h.server.registry().is_empty());
}

#[tokio::test]
async fn second_session_for_identity_is_closed() {
    let h = boot_patient_server().await;
    let mut first = connect(&h.url).await;
    send_json(&mut first, json!({"setup": {"user": "u-1"}})).await;
    send_json(&mut first, json!({"n": 1})).await;
    assert_eq!(next_json(&mut first).await, json!({"data": {"n": 1}}));

    let mut second = connect(&h.url).await;
    send_json(&mut second, json!({"setup": {"user": "u-1"}})).await;
    expect_normal_close(&mut second).await;

    // The incumbent keeps working.
    send_json(&mut first, json!({"n": 2})).await;
    assert_eq!(next_json(&mut first).await, json!({"data": {"n": 2}}));
    assert_eq!(h.server.registry().identity_count(), 1);
}

#[tokio::test]
async fn repeated_setup_is_not_forwarded() {
    let h = boot_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {"lang": "en"}})).await;
    send_json(&mut ws, json!({"setup": {"lang": "fr"}})).await;
    send_json(&mut ws, json!({"n": 1})).await;

    assert_eq!(next_json(&mut ws).await, json!({"data": {"n": 1}}));
    assert_eq!(next_json(&mut ws).await, json!({"data": null, "isAsleep": false}));
}

#[tokio::test]
async fn malformed_frame_fails_session() {
    let h = boot_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {}})).await;
    ws.send(Message::Text("not json".into())).await.unwrap();

    assert_eq!(next_json(&mut ws).await, json!({"data": null}));
    expect_normal_close(&mut ws).await;
    wait_until_empty(&h.server).await;
}

#[tokio::test]
async fn health_reports_live_connections() {
    let h = boot_patient_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {"user": "u-9"}})).await;
    send_json(&mut ws, json!({"n": 1})).await;
    let _ = next_json(&mut ws).await;

    let health_url = h.url.replace("ws://", "http://").replace("/ws", "/health");
    let parsed: Value = reqwest::get(&health_url).await.unwrap().json().await.unwrap();
    assert_eq!(parsed["connections"], 1);
    assert_eq!(parsed["active_sessions"], 1);
}

#[tokio::test]
async fn shutdown_ends_open_sessions() {
    let h = boot_patient_server().await;
    let mut ws = connect(&h.url).await;
    send_json(&mut ws, json!({"setup": {}})).await;
    send_json(&mut ws, json!({"n": 1})).await;
    let _ = next_json(&mut ws).await;

    h.server.shutdown().shutdown();
    assert_eq!(next_json(&mut ws).await, json!({"data": null}));
    expect_normal_close(&mut ws).await;
}

/// Takes a while to wrap up once its inbound stream ends.
struct SlowWrapUpRelay {
    streaming: Arc<AtomicBool>,
    wrapped_up: Arc<AtomicBool>,
}

#[async_trait]
impl Relay for SlowWrapUpRelay {
    fn name(&self) -> &'static str {
        "slow-wrap-up"
    }

    async fn run(&self, ctx: RelayContext) -> Result<(), RelayError> {
        let _ = ctx.setup().await?;
        let mut inbound = ctx.inbound()?;
        self.streaming.store(true, Ordering::SeqCst);
        while inbound.next().await.is_some() {}
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.wrapped_up.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn graceful_shutdown_waits_for_session_wrap_up() {
    let streaming = Arc::new(AtomicBool::new(false));
    let wrapped_up = Arc::new(AtomicBool::new(false));
    let config = ServerConfig {
        lifecycle: LifecycleConfig {
            time_out: Duration::from_secs(30),
            time_to_sleep: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(5),
        },
        ..ServerConfig::default()
    };
    let relay = Arc::new(SlowWrapUpRelay {
        streaming: streaming.clone(),
        wrapped_up: wrapped_up.clone(),
    });
    let server = GatewayServer::new(config, relay);
    let (addr, handle) = server.listen().await.unwrap();

    let mut ws = connect(&format!("ws://{addr}/ws")).await;
    send_json(&mut ws, json!({"setup": {}})).await;
    timeout(TIMEOUT, async {
        while !streaming.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let outcome = server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(Duration::from_secs(10)))
        .await;

    assert_eq!(outcome, DrainOutcome::Completed);
    assert!(wrapped_up.load(Ordering::SeqCst));
    assert!(server.registry().is_empty());
    assert_eq!(server.shutdown().live_sessions(), 0);
    assert_eq!(next_json(&mut ws).await, json!({"data": null}));
    expect_normal_close(&mut ws).await;
}
