//! Relay Application Integration Tests
//!
//! Builds the whole relay from configuration, points both feeds at fake
//! vendor endpoints on loopback, and drives it through a downstream client
//! and the health port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async};
use tokio_util::sync::CancellationToken;

use market_relay::infrastructure::upstream::{ControlAction, ControlRequest};
use market_relay::{Feed, RelayApp, RelayConfig};

type Vendor = WebSocketStream<TcpStream>;
type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Fixtures
// =============================================================================

fn config(stocks: &TcpListener, options: &TcpListener) -> RelayConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("POLYGON_API_KEY", "app-key".to_string()),
        ("RELAY_HOST", "127.0.0.1".to_string()),
        ("WS_PORT", "0".to_string()),
        ("RELAY_HEALTH_PORT", "0".to_string()),
        (
            "POLYGON_STOCKS_WS_URL",
            format!("ws://{}", stocks.local_addr().unwrap()),
        ),
        (
            "POLYGON_OPTIONS_WS_URL",
            format!("ws://{}", options.local_addr().unwrap()),
        ),
        ("RELAY_RECONNECT_DELAY_MS", "50".to_string()),
    ]);
    RelayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Accept one vendor connection, check the key and report success.
async fn accept_vendor(listener: &TcpListener) -> Vendor {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut vendor = accept_async(stream).await.unwrap();

    let auth = next_request(&mut vendor).await;
    assert_eq!(auth.action, ControlAction::Auth);
    assert_eq!(auth.params, "app-key");

    vendor
        .send(Message::Text(
            r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    vendor
}

async fn next_request(vendor: &mut Vendor) -> ControlRequest {
    timeout(WAIT, async {
        loop {
            match vendor.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("relay went away: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

async fn next_json(ws: &mut Client) -> Value {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("socket ended: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

/// Plain HTTP/1.1 GET; returns the status line and body.
async fn http_get(addr: std::net::SocketAddr, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = String::new();
    timeout(WAIT, stream.read_to_string(&mut raw))
        .await
        .unwrap()
        .unwrap();

    let status = raw.lines().next().unwrap_or_default().to_string();
    let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
    (status, body)
}

async fn eventually(check: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn configured_relay_serves_clients_end_to_end() {
    let stocks = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cancel = CancellationToken::new();

    let app = RelayApp::bind(&config(&stocks, &options), cancel.clone())
        .await
        .unwrap();
    let relay_addr = app.relay_addr().unwrap();
    let health_addr = app.health_addr().unwrap();
    let service = std::sync::Arc::clone(app.service());
    let equities = std::sync::Arc::clone(app.connector(Feed::Equities));
    let running = tokio::spawn(app.run());

    let mut stocks_vendor = accept_vendor(&stocks).await;
    let _options_vendor = accept_vendor(&options).await;
    eventually(|| equities.is_connected()).await;

    // Downstream subscribe reaches the equities vendor.
    let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{relay_addr}/ws"))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "connected");
    client
        .send(Message::Text(
            json!({"type": "subscribe", "symbols": ["aapl"]}).to_string().into(),
        ))
        .await
        .unwrap();
    assert_eq!(next_json(&mut client).await["type"], "subscribed");

    let request = next_request(&mut stocks_vendor).await;
    assert_eq!(request.action, ControlAction::Subscribe);
    assert_eq!(request.params, "A.AAPL");

    // A vendor aggregate comes back out as a quote.
    stocks_vendor
        .send(Message::Text(
            r#"[{"ev":"A","sym":"AAPL","v":4110,"o":150.1,"c":150.3,"h":150.4,"l":150.0,"s":1700000000000,"e":1700000001000}]"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    let quote = next_json(&mut client).await;
    assert_eq!(quote["type"], "quote");
    assert_eq!(quote["data"]["symbol"], "AAPL");

    // The health port sees the same service.
    let (status, _) = http_get(health_addr, "/readyz").await;
    assert!(status.contains("200"), "{status}");
    let (_, body) = http_get(health_addr, "/stats").await;
    let stats: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["clients"], 1);
    assert_eq!(stats["symbols"], 1);

    // Shutdown closes the client and ends the run.
    cancel.cancel();
    let closed = timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    eventually(|| service.client_count() == 0).await;
}

#[tokio::test]
async fn bind_reports_a_taken_port() {
    let stocks = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let options = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();

    let mut config = config(&stocks, &options);
    config.server.relay_port = taken.local_addr().unwrap().port();

    let err = RelayApp::bind(&config, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to bind to 127.0.0.1:"));
}
