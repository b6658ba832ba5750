// Event Router - reaches sockets and runs anywhere in the fleet
//
// Local targets are served directly. Everything else goes out on the queue's
// pub/sub channel and is picked up by the relay of the process that owns it.

use super::registry::ConnectionRegistry;
use crate::application::pipeline::CancellationRegistry;
use crate::application::worker::ShutdownToken;
use crate::domain::{OutboundEvent, RequestId, SocketId};
use crate::error::{AppError, Result};
use crate::port::{EventSink, SharedStateStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Message carried on the bus channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    Deliver {
        socket_id: SocketId,
        event: OutboundEvent,
    },
    Cancel {
        request_id: RequestId,
    },
}

pub struct EventRouter {
    store: Arc<dyn SharedStateStore>,
    channel: String,
    connections: Arc<ConnectionRegistry>,
    cancellations: Arc<CancellationRegistry>,
    /// Ordered outbox; drained by the relay so pushes keep their order
    outbox: mpsc::UnboundedSender<BusMessage>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<BusMessage>>>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        channel: impl Into<String>,
        connections: Arc<ConnectionRegistry>,
        cancellations: Arc<CancellationRegistry>,
    ) -> Self {
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        Self {
            store,
            channel: channel.into(),
            connections,
            cancellations,
            outbox,
            outbox_rx: Mutex::new(Some(outbox_rx)),
        }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn cancellations(&self) -> &Arc<CancellationRegistry> {
        &self.cancellations
    }

    /// Push `event` to `socket_id`, wherever it is connected
    pub fn deliver(&self, socket_id: &str, event: OutboundEvent) {
        if self.connections.send(socket_id, event.clone()) {
            return;
        }
        self.enqueue(BusMessage::Deliver {
            socket_id: socket_id.to_string(),
            event,
        });
    }

    /// Raise the cancel flag of a run, wherever it executes
    pub fn request_cancel(&self, request_id: &str) {
        if self.cancellations.cancel(request_id) {
            debug!(request_id = %request_id, "Cancelled local run");
            return;
        }
        self.enqueue(BusMessage::Cancel {
            request_id: request_id.to_string(),
        });
    }

    /// EventSink for a run whose client sits on `socket_id`
    pub fn sink_for(self: &Arc<Self>, socket_id: Option<SocketId>) -> Arc<dyn EventSink> {
        Arc::new(JobEventSink {
            router: Arc::clone(self),
            socket_id,
        })
    }

    fn enqueue(&self, message: BusMessage) {
        if self.outbox.send(message).is_err() {
            warn!("Event bus outbox closed, dropping message");
        }
    }

    /// Publish the outbox and dispatch bus messages until shutdown
    pub async fn run_relay(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let mut outbox = self
            .outbox_rx
            .lock()
            .map_err(|_| AppError::Internal("relay outbox lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| AppError::Internal("event relay already running".to_string()))?;
        let mut inbound = self.store.subscribe(&self.channel).await?;

        info!(channel = %self.channel, "Event relay started");
        loop {
            tokio::select! {
                message = inbound.recv() => match message {
                    Some(raw) => self.dispatch(&raw),
                    None => {
                        warn!(channel = %self.channel, "Event bus subscription closed");
                        return Err(AppError::Store("event bus subscription closed".to_string()));
                    }
                },
                Some(message) = outbox.recv() => self.publish(&message).await,
                _ = shutdown.wait() => break,
            }
        }

        // Flush what is already queued
        while let Ok(message) = outbox.try_recv() {
            self.publish(&message).await;
        }
        info!(channel = %self.channel, "Event relay stopped");
        Ok(())
    }

    async fn publish(&self, message: &BusMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode bus message");
                return;
            }
        };
        if let Err(e) = self.store.publish(&self.channel, &payload).await {
            warn!(error = %e, "Failed to publish bus message");
        }
    }

    fn dispatch(&self, raw: &str) {
        let message: BusMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed bus message");
                return;
            }
        };

        match message {
            BusMessage::Deliver { socket_id, event } => {
                if self.connections.send(&socket_id, event) {
                    debug!(socket_id = %socket_id, "Delivered relayed event");
                }
            }
            BusMessage::Cancel { request_id } => {
                if self.cancellations.cancel(&request_id) {
                    info!(request_id = %request_id, "Cancelled run on request from another process");
                }
            }
        }
    }
}

/// Routes a run's events to the socket that submitted it
pub struct JobEventSink {
    router: Arc<EventRouter>,
    socket_id: Option<SocketId>,
}

impl EventSink for JobEventSink {
    fn emit(&self, event: OutboundEvent) {
        match &self.socket_id {
            Some(socket_id) => self.router.deliver(socket_id, event),
            None => debug!(event = event.name(), "Run has no client socket, event dropped"),
        }
    }
}
