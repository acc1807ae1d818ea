//! Transport-neutral WebSocket handle attached to upgraded contexts.

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};

use crate::error::AppError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Close,
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::Text(value.to_string())
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::Text(value)
    }
}

impl From<Bytes> for Message {
    fn from(value: Bytes) -> Self {
        Message::Binary(value)
    }
}

/// Application side of an upgraded connection.
#[derive(Debug)]
pub struct WebSocket {
    outgoing: mpsc::Sender<Message>,
    incoming: mpsc::Receiver<Message>,
}

/// Transport side of an upgraded connection. The adapter forwards `outgoing` to the client and
/// feeds frames from the client into `incoming`.
#[derive(Debug)]
pub struct WebSocketPeer {
    pub outgoing: mpsc::Receiver<Message>,
    pub incoming: mpsc::Sender<Message>,
}

impl WebSocket {
    pub fn channel(buffer: usize) -> (WebSocket, WebSocketPeer) {
        let (out_tx, out_rx) = mpsc::channel(buffer);
        let (in_tx, in_rx) = mpsc::channel(buffer);
        (
            WebSocket {
                outgoing: out_tx,
                incoming: in_rx,
            },
            WebSocketPeer {
                outgoing: out_rx,
                incoming: in_tx,
            },
        )
    }

    pub async fn send<M>(&mut self, message: M) -> Result<(), AppError>
    where
        M: Into<Message>,
    {
        self.outgoing
            .send(message.into())
            .await
            .map_err(|_| AppError::internal(anyhow::anyhow!("websocket connection closed")))
    }

    /// The next frame from the client, or `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.next().await
    }

    pub async fn close(&mut self) -> Result<(), AppError> {
        self.send(Message::Close).await?;
        self.outgoing.close_channel();
        Ok(())
    }
}
