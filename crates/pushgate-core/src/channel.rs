use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tokio::sync::{
    broadcast::{self, error::RecvError, error::TryRecvError},
    mpsc,
};
use tracing::{debug, warn};

use crate::{
    lock,
    types::{GatewayCommand, HostEvent, UndeliveredEventPolicy},
};

/// Errors returned by gateway channel operations.
#[derive(Debug, Error)]
pub enum GatewayChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Fan-out of host events with a pre-listener policy.
///
/// Failure events are logged synchronously before delivery, so the error
/// signal survives even when the policy drops the event itself.
#[derive(Clone, Debug)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

#[derive(Debug)]
struct EmitterInner {
    event_tx: broadcast::Sender<HostEvent>,
    backlog: Mutex<VecDeque<HostEvent>>,
    policy: UndeliveredEventPolicy,
}

impl EventEmitter {
    pub fn new(event_buffer: usize, policy: UndeliveredEventPolicy) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(EmitterInner {
                event_tx,
                backlog: Mutex::new(VecDeque::new()),
                policy,
            }),
        }
    }

    pub fn policy(&self) -> UndeliveredEventPolicy {
        self.inner.policy
    }

    /// Number of events waiting for a first subscriber.
    pub fn backlog_len(&self) -> usize {
        lock(&self.inner.backlog).len()
    }

    /// Emit one event. Never blocks on listeners.
    pub fn emit(&self, event: HostEvent) {
        match &event {
            HostEvent::InitializationFailed(reason) | HostEvent::TokenFetchFailed(reason) => {
                warn!(event = event.name(), %reason, "gateway operation failed");
            }
            _ => debug!(event = event.name(), "emitting host event"),
        }

        let mut backlog = lock(&self.inner.backlog);
        let event = match self.inner.event_tx.send(event) {
            Ok(_) => return,
            Err(broadcast::error::SendError(event)) => event,
        };

        match self.inner.policy {
            UndeliveredEventPolicy::Buffer { capacity } => {
                if capacity == 0 {
                    debug!(event = event.name(), "no listener and zero backlog; dropping");
                    return;
                }
                while backlog.len() >= capacity {
                    if let Some(evicted) = backlog.pop_front() {
                        warn!(event = evicted.name(), capacity, "event backlog full; evicting oldest");
                    }
                }
                backlog.push_back(event);
            }
            UndeliveredEventPolicy::Drop => {
                debug!(event = event.name(), "no listener attached; dropping event");
            }
        }
    }

    /// Subscribe to host events. The first subscriber after a quiet period
    /// also receives everything buffered while nobody was listening.
    pub fn subscribe(&self) -> EventStream {
        let mut backlog = lock(&self.inner.backlog);
        let rx = self.inner.event_tx.subscribe();
        EventStream {
            backlog: std::mem::take(&mut *backlog),
            rx,
        }
    }
}

/// Host event receiver: buffered events first, then live ones.
#[derive(Debug)]
pub struct EventStream {
    backlog: VecDeque<HostEvent>,
    rx: broadcast::Receiver<HostEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once every emitter is gone.
    pub async fn recv(&mut self) -> Option<HostEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "host event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already available.
    pub fn try_recv(&mut self) -> Option<HostEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "host event subscriber lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Command/event channel pair used by the runtime loop and host bridges.
#[derive(Clone, Debug)]
pub struct GatewayChannels {
    command_tx: mpsc::Sender<GatewayCommand>,
    emitter: EventEmitter,
}

impl GatewayChannels {
    /// Create a channel set around `emitter` and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        emitter: EventEmitter,
    ) -> (Self, mpsc::Receiver<GatewayCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        (
            Self {
                command_tx,
                emitter,
            },
            command_rx,
        )
    }

    /// Clone the command sender.
    pub fn command_sender(&self) -> mpsc::Sender<GatewayCommand> {
        self.command_tx.clone()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Subscribe to emitted host events.
    pub fn subscribe(&self) -> EventStream {
        self.emitter.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: GatewayCommand) -> Result<(), GatewayChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| GatewayChannelError::CommandChannelClosed)
    }

    pub fn emit(&self, event: HostEvent) {
        self.emitter.emit(event);
    }
}
