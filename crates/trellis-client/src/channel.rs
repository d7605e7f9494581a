use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::transport::{Frame, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Enumerates supported `ChannelName` values.
pub enum ChannelName {
    Auth,
    Config,
    Telemetry,
}

impl ChannelName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Config => "config",
            Self::Telemetry => "telemetry",
        }
    }

    /// Path appended to the endpoint base URL when opening the channel.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Auth => "/api/auth",
            Self::Config => "/api/config",
            Self::Telemetry => "/api/telemetry",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Why a channel task ended. Every spawned channel reports exactly one of
/// these through its final `ChannelEvent::Closed`.
pub enum CloseReason {
    Cancelled,
    PeerClosed,
    ConnectFailed(String),
    TransportError(String),
}

impl CloseReason {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ConnectFailed(_) | Self::TransportError(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => formatter.write_str("cancelled"),
            Self::PeerClosed => formatter.write_str("peer closed"),
            Self::ConnectFailed(error) => write!(formatter, "connect failed: {error}"),
            Self::TransportError(error) => write!(formatter, "transport error: {error}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Typed events delivered from channel tasks into the coordinator inbox.
/// Order is preserved within a channel; nothing is assumed across channels.
pub enum ChannelEvent {
    Opened(ChannelName),
    Message(ChannelName, Frame),
    Closed(ChannelName, CloseReason),
}

/// Spawns the reader/writer task for one channel. The task owns the
/// connection; everything it learns is reported through `events`.
pub(crate) fn spawn_channel_task(
    transport: Arc<dyn Transport>,
    name: ChannelName,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut cancel: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    tokio::spawn(async move {
        let mut connection = tokio::select! {
            _ = cancel.changed() => {
                let _ = events.send(ChannelEvent::Closed(name, CloseReason::Cancelled));
                return;
            }
            result = transport.connect(&url) => match result {
                Ok(connection) => connection,
                Err(error) => {
                    let _ = events.send(ChannelEvent::Closed(
                        name,
                        CloseReason::ConnectFailed(error.to_string()),
                    ));
                    return;
                }
            },
        };
        let _ = events.send(ChannelEvent::Opened(name));

        let reason = loop {
            tokio::select! {
                _ = cancel.changed() => {
                    connection.close().await;
                    break CloseReason::Cancelled;
                }
                maybe_message = connection.receive() => match maybe_message {
                    Some(Ok(frame)) => {
                        if events.send(ChannelEvent::Message(name, frame)).is_err() {
                            break CloseReason::Cancelled;
                        }
                    }
                    Some(Err(error)) => break CloseReason::TransportError(error.to_string()),
                    None => break CloseReason::PeerClosed,
                },
                maybe_frame = outbound.recv() => match maybe_frame {
                    Some(frame) => {
                        if let Err(error) = connection.send(frame).await {
                            break CloseReason::TransportError(error.to_string());
                        }
                    }
                    None => {
                        connection.close().await;
                        break CloseReason::Cancelled;
                    }
                },
            }
        };
        let _ = events.send(ChannelEvent::Closed(name, reason));
    });
}
