// Shared primitives for one-time server bootstrapping across integration tests.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Global base URL used by all tests after the server publishes its bound address.
static SERVER_URL: OnceLock<String> = OnceLock::new();
static SERVER_READY: OnceLock<()> = OnceLock::new();

// Ensure the test server is running and return the shared base URL.
pub fn ensure_server() -> &'static str {
    SERVER_READY.get_or_init(|| {
        let published_url = Arc::new(OnceLock::<String>::new());
        let published_url_thread = Arc::clone(&published_url);
        // Spawn an OS thread so the server outlives individual `#[tokio::test]` runtimes.
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("test runtime");
            runtime.block_on(async move {
                // Ephemeral port to avoid collisions with local services.
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind ephemeral test port");
                let addr = listener.local_addr().expect("get local addr");
                let _ = published_url_thread.set(format!("http://{}", addr));
                arena_server::run(listener).await.expect("server failed");
            });
        });
        wait_for_server_url_and_readiness(published_url);
    });

    SERVER_URL
        .get()
        .expect("server url should be initialized")
        .as_str()
}

// Wait for URL publication and then wait for the server socket to accept TCP connections.
fn wait_for_server_url_and_readiness(published_url: Arc<OnceLock<String>>) {
    let base_url = loop {
        if let Some(url) = published_url.get() {
            break url.clone();
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let _ = SERVER_URL.set(base_url.clone());

    let addr = base_url
        .strip_prefix("http://")
        .expect("base url should use http://");

    // Retry for a short period to avoid racing server bind/accept.
    for _ in 0..100 {
        if std::net::TcpStream::connect(addr).is_ok() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }

    panic!("server did not become ready in time");
}

pub fn ws_url() -> String {
    let base_url = ensure_server();
    format!("ws://{}/ws", base_url.trim_start_matches("http://"))
}

pub async fn connect() -> WsStream {
    let (stream, _response) = connect_async(ws_url()).await.expect("websocket connect");
    stream
}

pub async fn send_json(stream: &mut WsStream, value: Value) {
    stream
        .send(Message::text(value.to_string()))
        .await
        .expect("send frame");
}

/// Next text frame as JSON, or `None` once the server closed the socket.
pub async fn next_json(stream: &mut WsStream) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("frame in time")?;
        match frame.ok()? {
            Message::Text(text) => {
                return Some(serde_json::from_str(text.as_str()).expect("server sends json"));
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Skips frames until one with the given `type` arrives.
pub async fn next_of_type(stream: &mut WsStream, kind: &str) -> Value {
    loop {
        let value = next_json(stream)
            .await
            .unwrap_or_else(|| panic!("socket closed while waiting for {kind}"));
        if value["type"] == kind {
            return value;
        }
    }
}

/// Connects, joins, and returns the stream plus the assigned participant id.
pub async fn join(display_name: &str) -> (WsStream, u64) {
    let mut stream = connect().await;
    send_json(
        &mut stream,
        json!({"type": "Join", "data": {"display_name": display_name}}),
    )
    .await;

    let identity = next_json(&mut stream).await.expect("identity frame");
    assert_eq!(identity["type"], "Identity");
    let participant_id = identity["data"]["participant_id"]
        .as_u64()
        .expect("numeric participant id");
    (stream, participant_id)
}
