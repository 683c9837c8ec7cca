use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{ChatError, Result};
use crate::transport::{CloseReason, Connection, Connector, Inbound};

/// Opens `ws://` / `wss://` connections with tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        WebSocketConnector
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>> {
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ChatError::InvalidUrl(format!(
                    "unsupported scheme {other:?} (expected ws or wss)"
                )))
            }
        }

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| ChatError::ConnectionFailed(e.to_string()))?;
        info!(
            "WebSocket handshake with {} completed ({})",
            url.host_str().unwrap_or("<unknown host>"),
            response.status()
        );

        Ok(Box::new(WebSocketConnection { stream }))
    }
}

pub struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::text(text))
            .await
            .map_err(|e| ChatError::ConnectionLost(e.to_string()))
    }

    async fn recv(&mut self) -> Inbound {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Inbound::Text(text.as_str().to_owned()),
                Some(Ok(Message::Close(frame))) => {
                    let close = match frame {
                        Some(frame) => CloseReason {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_owned(),
                        },
                        None => CloseReason::abnormal("close frame without status"),
                    };
                    return Inbound::Closed(close);
                }
                Some(Ok(other)) => {
                    // ping/pong are answered by tungstenite itself
                    debug!("Ignoring non-text frame ({} bytes)", other.len());
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return Inbound::Closed(CloseReason::abnormal(e.to_string()));
                }
                None => return Inbound::Closed(CloseReason::abnormal("stream ended")),
            }
        }
    }

    async fn close(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "client going away".into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            debug!("Close handshake failed: {}", e);
        }
    }
}
