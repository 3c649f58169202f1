#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fanout::broker::registry::Registry;
use fanout::config::{BrokerConfig, Config};
use fanout::metrics::Metrics;
use fanout::protocol::{Envelope, Message};
use fanout::server::http;
use fanout::FanoutEngine;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub fn setup_registry() -> (Arc<Registry>, Arc<Metrics>) {
    setup_registry_with(BrokerConfig::default())
}

pub fn setup_registry_with(cfg: BrokerConfig) -> (Arc<Registry>, Arc<Metrics>) {
    let metrics = Arc::new(Metrics::new());
    (Arc::new(Registry::new(cfg, metrics.clone())), metrics)
}

pub fn msg(id: &str) -> Message {
    Message::new(id, json!({ "id": id }))
}

/// Serve the full router on an ephemeral port.
pub async fn spawn_server(broker: BrokerConfig) -> (SocketAddr, FanoutEngine, JoinHandle<()>) {
    let config = Config {
        broker,
        ..Config::default()
    };
    let engine = FanoutEngine::new(config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = http::router(engine.clone());
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (addr, engine, handle)
}

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("websocket handshake failed");
    ws
}

pub async fn send_frame(ws: &mut WsClient, frame: serde_json::Value) {
    ws.send(WsMessage::text(frame.to_string()))
        .await
        .expect("websocket send failed");
}

/// Next text frame, parsed as a server envelope.
pub async fn recv_envelope(ws: &mut WsClient) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("socket closed")
            .expect("websocket read failed");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).expect("frame is not an envelope");
        }
    }
}

/// Connect and consume the welcome frame, returning the assigned client id.
pub async fn ws_connect_welcomed(addr: SocketAddr) -> (WsClient, String) {
    let mut ws = ws_connect(addr).await;
    let welcome = recv_envelope(&mut ws).await;
    let client_id = welcome.client_id.expect("welcome frame without client_id");
    (ws, client_id)
}
