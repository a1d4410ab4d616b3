//! End-to-end test over a real websocket

use futures::{SinkExt, StreamExt};
use presence_hub::api::router;
use presence_hub::config::HubConfig;
use presence_hub::hub::BroadcastHub;
use presence_hub::state::AppState;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

async fn start_server() -> (SocketAddr, BroadcastHub) {
    let state = AppState::new(HubConfig::default());
    let hub = state.hub.clone();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    (addr, hub)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws/chat/", addr))
        .await
        .expect("websocket connect failed");
    ws
}

async fn wait_for_connections(hub: &BroadcastHub, n: usize) {
    tokio::time::timeout(WAIT, async {
        while hub.connection_count().await != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connections never registered");
}

async fn next_text(ws: &mut Client) -> String {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

async fn send_username(ws: &mut Client, name: &str) {
    let frame = format!(r#"{{"type": "username", "username": "{}"}}"#, name);
    ws.send(Message::Text(frame.into())).await.unwrap();
}

#[tokio::test]
async fn test_websocket_presence_flow() {
    let (addr, hub) = start_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_connections(&hub, 3).await;

    send_username(&mut a, "alice").await;
    let expected = r#"{"type":"connected_clients","clients":["alice"]}"#;
    assert_eq!(next_text(&mut a).await, expected);
    assert_eq!(next_text(&mut b).await, expected);
    assert_eq!(next_text(&mut c).await, expected);

    // Malformed frame is ignored and the connection survives
    b.send(Message::Text("{not json".into())).await.unwrap();
    send_username(&mut b, "bob").await;
    let expected = r#"{"type":"connected_clients","clients":["alice","bob"]}"#;
    assert_eq!(next_text(&mut a).await, expected);
    assert_eq!(next_text(&mut b).await, expected);
    assert_eq!(next_text(&mut c).await, expected);

    a.close(None).await.unwrap();
    let expected = r#"{"type":"connected_clients","clients":["bob"]}"#;
    assert_eq!(next_text(&mut b).await, expected);
    assert_eq!(next_text(&mut c).await, expected);
    wait_for_connections(&hub, 2).await;
}

#[tokio::test]
async fn test_dropped_socket_is_cleaned_up() {
    let (addr, hub) = start_server().await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_connections(&hub, 2).await;

    send_username(&mut a, "alice").await;
    next_text(&mut a).await;
    next_text(&mut b).await;

    // No close handshake, just gone
    drop(a);
    assert_eq!(
        next_text(&mut b).await,
        r#"{"type":"connected_clients","clients":[]}"#
    );
    wait_for_connections(&hub, 1).await;
}
