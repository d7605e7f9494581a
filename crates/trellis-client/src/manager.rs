use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::channel::{spawn_channel_task, ChannelEvent, ChannelName};
use crate::transport::{Frame, Transport};

struct ChannelHandle {
    outbound: mpsc::UnboundedSender<Frame>,
    cancel: watch::Sender<bool>,
    open: bool,
    closing: bool,
    closed: bool,
}

/// Registry of the session's channels. Owned exclusively by the coordinator
/// loop; open/closing state lives here as plain fields, never behind locks.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    channels: HashMap<ChannelName, ChannelHandle>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, events: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        Self {
            transport,
            events,
            channels: HashMap::new(),
        }
    }

    /// Opens every named channel independently. No ordering is implied: each
    /// channel connects on its own task and reports readiness through the
    /// event inbox.
    pub fn open(&mut self, endpoint: &str, names: &[ChannelName]) {
        for name in names {
            if self.channels.contains_key(name) {
                continue;
            }
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let url = format!("{}{}", endpoint.trim_end_matches('/'), name.path());
            spawn_channel_task(
                self.transport.clone(),
                *name,
                url,
                outbound_rx,
                cancel_rx,
                self.events.clone(),
            );
            self.channels.insert(
                *name,
                ChannelHandle {
                    outbound: outbound_tx,
                    cancel: cancel_tx,
                    open: false,
                    closing: false,
                    closed: false,
                },
            );
        }
    }

    /// Hands a frame to the channel task. Fails when the channel has not
    /// reported `Opened` yet or has already gone away.
    pub fn send(&mut self, name: ChannelName, frame: Frame) -> Result<()> {
        let Some(handle) = self.channels.get(&name) else {
            bail!("'{name}' channel was never opened");
        };
        if !handle.open || handle.closed {
            bail!("'{name}' channel is not open for sending");
        }
        if handle.outbound.send(frame).is_err() {
            bail!("'{name}' channel task is gone");
        }
        Ok(())
    }

    pub fn mark_open(&mut self, name: ChannelName) {
        if let Some(handle) = self.channels.get_mut(&name) {
            handle.open = true;
        }
    }

    pub fn mark_closed(&mut self, name: ChannelName) {
        if let Some(handle) = self.channels.get_mut(&name) {
            handle.open = false;
            handle.closed = true;
        }
    }

    pub fn is_open(&self, name: ChannelName) -> bool {
        self.channels
            .get(&name)
            .map(|handle| handle.open)
            .unwrap_or(false)
    }

    /// True once `stop` has been requested for the channel; transport errors
    /// arriving afterwards are expected fallout, not failures.
    pub fn is_closing(&self, name: ChannelName) -> bool {
        self.channels
            .get(&name)
            .map(|handle| handle.closing)
            .unwrap_or(false)
    }

    /// Requests shutdown of one channel. Idempotent: repeated stops are
    /// no-ops, and stopping an already-closed channel is harmless.
    pub fn stop(&mut self, name: ChannelName) {
        let Some(handle) = self.channels.get_mut(&name) else {
            return;
        };
        if handle.closing {
            debug!(channel = %name, "stop requested twice; ignoring");
            return;
        }
        handle.closing = true;
        let _ = handle.cancel.send(true);
    }

    /// Stops every channel regardless of state. Only signals, never waits,
    /// so it is safe to call from any event handler.
    pub fn stop_all(&mut self) {
        let names = self.channels.keys().copied().collect::<Vec<_>>();
        for name in names {
            self.stop(name);
        }
    }

    /// True once every spawned channel has delivered its final close event.
    pub fn all_closed(&self) -> bool {
        self.channels.values().all(|handle| handle.closed)
    }
}
