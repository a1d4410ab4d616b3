//! Transport boundary
//!
//! Sessions only need four things from a connection: it was accepted, the
//! next inbound text frame, sending a text frame, and closing. Accepting is
//! implicit in handing a sender/receiver pair to a session; the other three
//! are the traits below.
//!
//! Two adapters are provided: [`WsSender`]/[`WsReceiver`] over an axum
//! websocket, and an in-memory pair in [`memory`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Transport I/O error: {0}")]
    Io(String),
}

/// Outbound half of a connection
#[async_trait]
pub trait FrameSender: Send + 'static {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Inbound half of a connection
#[async_trait]
pub trait FrameReceiver: Send + 'static {
    /// Suspends until the next text frame arrives.
    ///
    /// `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;
}

pub struct WsSender(SplitSink<WebSocket, Message>);

pub struct WsReceiver(SplitStream<WebSocket>);

/// Split an upgraded websocket into transport halves
pub fn split_websocket(socket: WebSocket) -> (WsSender, WsReceiver) {
    let (sink, stream) = socket.split();
    (WsSender(sink), WsReceiver(stream))
}

#[async_trait]
impl FrameSender for WsSender {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameReceiver for WsReceiver {
    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Close(_))) | None => return None,
                // Pings are answered by the websocket layer itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }
}

/// In-process transport backed by tokio channels.
///
/// Useful for driving sessions without a network. The server->client
/// direction is bounded so a client that stops reading applies backpressure
/// exactly like a stalled socket would.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    pub struct MemorySender {
        tx: Option<mpsc::Sender<String>>,
    }

    pub struct MemoryReceiver {
        rx: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    }

    /// The peer's end of an in-memory connection
    pub struct MemoryClient {
        tx: Option<mpsc::UnboundedSender<Result<String, TransportError>>>,
        rx: mpsc::Receiver<String>,
    }

    /// Create a connected transport pair. `capacity` bounds how many frames
    /// may sit unread on the client side before sends start to block.
    pub fn pair(capacity: usize) -> (MemorySender, MemoryReceiver, MemoryClient) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::channel(capacity.max(1));
        (
            MemorySender {
                tx: Some(to_client),
            },
            MemoryReceiver { rx: from_client },
            MemoryClient {
                tx: Some(to_server),
                rx: from_server,
            },
        )
    }

    #[async_trait]
    impl FrameSender for MemorySender {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            match &self.tx {
                Some(tx) => tx.send(text).await.map_err(|_| TransportError::Closed),
                None => Err(TransportError::Closed),
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.tx.take();
            Ok(())
        }
    }

    #[async_trait]
    impl FrameReceiver for MemoryReceiver {
        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            self.rx.recv().await
        }
    }

    impl MemoryClient {
        /// Send a text frame to the server. Returns false once closed.
        pub fn send_text(&self, text: impl Into<String>) -> bool {
            match &self.tx {
                Some(tx) => tx.send(Ok(text.into())).is_ok(),
                None => false,
            }
        }

        /// Simulate a transport error on the inbound side
        pub fn fail(&self, reason: impl Into<String>) -> bool {
            match &self.tx {
                Some(tx) => tx.send(Err(TransportError::Io(reason.into()))).is_ok(),
                None => false,
            }
        }

        /// Next frame from the server, `None` once the server closed
        pub async fn recv(&mut self) -> Option<String> {
            self.rx.recv().await
        }

        /// Non-blocking read of an already delivered frame
        pub fn try_recv(&mut self) -> Option<String> {
            self.rx.try_recv().ok()
        }

        /// Close the client side; the server observes end of stream
        pub fn close(&mut self) {
            self.tx.take();
        }
    }

}
