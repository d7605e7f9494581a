use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

#[derive(Debug, Clone, PartialEq, Eq)]
/// Enumerates supported `Frame` values.
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Error)]
/// Enumerates supported `TransportError` values.
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    WebSocket(String),
}

#[async_trait]
/// Trait contract for `Transport` behavior: opens one connection per channel.
pub trait Transport: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

#[async_trait]
/// Trait contract for `Connection` behavior.
///
/// `receive` returns `None` once the peer has closed the stream; control
/// frames are handled below this interface.
pub trait Connection: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
    async fn receive(&mut self) -> Option<Result<Frame, TransportError>>;
    async fn close(&mut self);
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (sink, source) = stream.split();
        Ok(Box::new(WsConnection { sink, source }))
    }
}

struct WsConnection {
    sink: SplitSink<WsStream, WsMessage>,
    source: SplitStream<WsStream>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        self.sink
            .send(message)
            .await
            .map_err(|error| TransportError::WebSocket(error.to_string()))
    }

    async fn receive(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.source.next().await? {
                Ok(message) => message,
                Err(error) => return Some(Err(TransportError::WebSocket(error.to_string()))),
            };
            match message {
                WsMessage::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                WsMessage::Binary(bytes) => return Some(Ok(Frame::Binary(bytes.to_vec()))),
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                WsMessage::Close(_) => return None,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}
