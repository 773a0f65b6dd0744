// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Socket abstraction so the bus server handles axum-upgraded websockets,
//! tokio-tungstenite streams, and in-process test duplexes identically.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("websocket error: {0}")]
    Ws(String),
}

/// A bidirectional text-frame socket.
#[async_trait]
pub trait BusSocket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SocketError>;

    /// Next text frame. `None` when the peer closed. Ping/pong/binary frames
    /// are handled internally and never surface.
    async fn recv_text(&mut self) -> Option<Result<String, SocketError>>;

    async fn close(&mut self);
}

#[async_trait]
impl<S> BusSocket for WebSocketStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_text(&mut self, text: String) -> Result<(), SocketError> {
        self.send(Message::text(text)).await.map_err(|e| SocketError::Ws(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, SocketError>> {
        loop {
            match self.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(data)) => {
                    if self.send(Message::Pong(data)).await.is_err() {
                        return None;
                    }
                }
                // Pong/binary/raw frames are ignored.
                Ok(_) => {}
                Err(e) => return Some(Err(SocketError::Ws(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = SinkExt::close(self).await;
    }
}
