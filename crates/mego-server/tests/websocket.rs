//! End-to-end tests using a real WebSocket client.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use mego_core::Status;
use mego_protocol::{Codec, Request, Response, SUBSCRIBE_METHOD};
use mego_server::{Engine, EngineConfig, EngineBuilder, ServerResult, WsServer, handler};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestServer {
    url: String,
    engine: Engine,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<ServerResult<()>>,
}

impl TestServer {
    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        timeout(TIMEOUT, self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Boot a server on an ephemeral port.
async fn boot_server(config: EngineConfig, setup: impl FnOnce(&mut EngineBuilder)) -> TestServer {
    let config = EngineConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..config
    };
    let mut builder = Engine::builder(config);
    setup(&mut builder);

    let server = WsServer::bind(builder.build()).await.unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let engine = server.engine().clone();
    let (stop, stopped) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run_until_shutdown(async {
        let _ = stopped.await;
    }));

    TestServer {
        url,
        engine,
        stop: Some(stop),
        handle,
    }
}

fn demo(builder: &mut EngineBuilder) {
    builder.event("chat");
    builder.register(
        "Sum",
        [handler(|c| {
            Box::pin(async move {
                match (c.param_i64(0), c.param_i64(1)) {
                    (Ok(a), Ok(b)) => c.respond(Status::Ok, a + b),
                    _ => c.respond_error(Status::Invalid, "expected two integers"),
                }
            })
        })],
    );
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("connect timed out")
        .unwrap();
    ws
}

async fn call(ws: &mut WsStream, request: &Request) {
    let text = serde_json::to_string(request).unwrap();
    ws.send(Message::text(text)).await.unwrap();
}

async fn next_message(ws: &mut WsStream) -> Message {
    timeout(TIMEOUT, ws.next())
        .await
        .expect("no message before timeout")
        .expect("stream ended")
        .unwrap()
}

async fn next_response(ws: &mut WsStream) -> Response {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn sum_over_websocket() {
    let server = boot_server(EngineConfig::default(), demo).await;
    let mut ws = connect(&server.url).await;

    call(&mut ws, &Request::new("Sum", 7).with_params([json!(3), json!(4)])).await;
    let response = next_response(&mut ws).await;
    assert_eq!(serde_json::to_value(&response).unwrap(), json!({"id": 7, "status": 0, "result": 7}));

    call(&mut ws, &Request::new("Ghost", 8)).await;
    assert_eq!(next_response(&mut ws).await.status, Status::NotFound);

    server.stop().await;
}

#[tokio::test]
async fn garbage_frame_is_invalid() {
    let server = boot_server(EngineConfig::default(), demo).await;
    let mut ws = connect(&server.url).await;

    ws.send(Message::text("not json")).await.unwrap();
    let response = next_response(&mut ws).await;
    assert_eq!(response.status, Status::Invalid);
    assert!(response.id.is_none());

    server.stop().await;
}

#[tokio::test]
async fn chat_rooms() {
    let server = boot_server(EngineConfig::default(), demo).await;
    let mut alice = connect(&server.url).await;
    let mut bob = connect(&server.url).await;
    let mut carol = connect(&server.url).await;

    for (ws, room) in [(&mut alice, "room1"), (&mut bob, "room1"), (&mut carol, "room2")] {
        call(ws, &Request::new(SUBSCRIBE_METHOD, 1).with_params([json!("chat"), json!(room)])).await;
        assert_eq!(next_response(ws).await.status, Status::Ok);
    }

    let delivered = server
        .engine
        .emit("chat", "room1", json!({"text": "hi"}))
        .await
        .unwrap();
    assert_eq!(delivered, 2);

    for ws in [&mut alice, &mut bob] {
        let response = next_response(ws).await;
        assert_eq!(response.event.as_deref(), Some("chat"));
        assert_eq!(response.result, json!({"text": "hi"}));
    }
    assert!(timeout(Duration::from_millis(200), carol.next()).await.is_err());

    server.stop().await;
}

#[tokio::test]
async fn disconnect_releases_session() {
    let server = boot_server(EngineConfig::default(), demo).await;
    let mut ws = connect(&server.url).await;
    call(&mut ws, &Request::new("Sum", 1).with_params([json!(1), json!(1)])).await;
    next_response(&mut ws).await;
    assert_eq!(server.engine.len().await, 1);

    ws.close(None).await.unwrap();
    drop(ws);

    timeout(TIMEOUT, async {
        while !server.engine.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not released");

    server.stop().await;
}

#[tokio::test]
async fn oversized_message_drops_connection() {
    let server = boot_server(EngineConfig::default().with_max_size(1024), demo).await;
    let mut ws = connect(&server.url).await;

    ws.send(Message::text("x".repeat(8 * 1024))).await.unwrap();
    match timeout(TIMEOUT, ws.next()).await.expect("connection stayed open") {
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {}
        Some(Ok(other)) => panic!("expected the connection to close, got {other:?}"),
    }

    timeout(TIMEOUT, async {
        while !server.engine.is_empty().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session was not released");

    server.stop().await;
}

#[tokio::test]
async fn session_limit_closes_with_policy() {
    let server = boot_server(EngineConfig::default().with_max_sessions(1), demo).await;
    let mut first = connect(&server.url).await;
    call(&mut first, &Request::new("Sum", 1).with_params([json!(1), json!(2)])).await;
    next_response(&mut first).await;

    let mut second = connect(&server.url).await;
    match next_message(&mut second).await {
        Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Policy),
        other => panic!("expected policy close, got {other:?}"),
    }
    assert_eq!(server.engine.len().await, 1);

    server.stop().await;
}

#[tokio::test]
async fn msgpack_uses_binary_frames() {
    let config = EngineConfig::default().with_codec(Codec::Msgpack);
    let server = boot_server(config, demo).await;
    let mut ws = connect(&server.url).await;

    let request = Request::new("Sum", 2).with_params([json!(20), json!(22)]);
    let frame = Codec::Msgpack.encode(&request).unwrap();
    ws.send(Message::binary(frame)).await.unwrap();

    match next_message(&mut ws).await {
        Message::Binary(data) => {
            let response: Response = Codec::Msgpack.decode(&data).unwrap();
            assert_eq!(response.status, Status::Ok);
            assert_eq!(response.result, Value::from(42));
        }
        other => panic!("expected binary frame, got {other:?}"),
    }

    server.stop().await;
}

#[tokio::test]
async fn stopping_server_closes_clients() {
    let server = boot_server(EngineConfig::default(), demo).await;
    let mut ws = connect(&server.url).await;
    call(&mut ws, &Request::new("Sum", 1).with_params([json!(1), json!(1)])).await;
    next_response(&mut ws).await;

    let engine = server.engine.clone();
    server.stop().await;

    assert!(matches!(next_message(&mut ws).await, Message::Close(_)));
    assert!(engine.is_closed());
    assert!(engine.is_empty().await);
}
