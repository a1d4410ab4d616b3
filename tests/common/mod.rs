#![allow(dead_code)]

use presence_hub::config::HubConfig;
use presence_hub::hub::BroadcastHub;
use presence_hub::protocol::ServerEvent;
use presence_hub::session::spawn_session;
use presence_hub::transport::memory::{self, MemoryClient};
use presence_hub::types::SessionState;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn test_config() -> HubConfig {
    HubConfig {
        send_timeout: Duration::from_millis(200),
        outbound_buffer: 64,
        max_username_len: 32,
        ..Default::default()
    }
}

pub struct TestClient {
    pub client: MemoryClient,
    pub handle: JoinHandle<SessionState>,
}

impl TestClient {
    pub fn set_username(&self, name: &str) {
        let frame = serde_json::json!({ "type": "username", "username": name });
        assert!(self.client.send_text(frame.to_string()));
    }

    /// Next broadcast, panicking if none arrives in time
    pub async fn next_clients(&mut self) -> Vec<String> {
        let frame = tokio::time::timeout(WAIT, self.client.recv())
            .await
            .expect("timed out waiting for broadcast")
            .expect("connection closed");
        match serde_json::from_str::<ServerEvent>(&frame).expect("invalid server frame") {
            ServerEvent::ConnectedClients { clients } => clients,
        }
    }

    /// Assert nothing else is queued after giving in-flight work a moment
    pub async fn assert_silent(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(self.client.try_recv(), None);
    }
}

/// Connect a client through the in-memory transport
pub fn connect(hub: &BroadcastHub, config: &HubConfig, capacity: usize) -> TestClient {
    let (sender, receiver, client) = memory::pair(capacity);
    let handle = spawn_session(hub.clone(), config.send_timeout, sender, receiver);
    TestClient { client, handle }
}

/// Wait until the hub sees exactly `n` connections
pub async fn wait_for_connections(hub: &BroadcastHub, n: usize) {
    tokio::time::timeout(WAIT, async {
        while hub.connection_count().await != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("hub never reached {} connections", n));
}
