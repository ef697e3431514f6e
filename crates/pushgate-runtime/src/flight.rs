//! Single-flight fan-out: one owner completes, every joined waiter gets a clone.

use tokio::sync::broadcast;

pub(crate) struct Flight<T> {
    id: u64,
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Flight<T> {
    pub(crate) fn new(id: u64) -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { id, tx }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Attach a waiter. Must happen before `complete` to observe the value.
    pub(crate) fn join(&self) -> FlightWaiter<T> {
        FlightWaiter {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish the result to every waiter; returns how many were attached.
    pub(crate) fn complete(self, value: T) -> usize {
        self.tx.send(value).unwrap_or(0)
    }
}

pub(crate) struct FlightWaiter<T> {
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> FlightWaiter<T> {
    /// `None` when the flight was dropped without completing.
    pub(crate) async fn wait(mut self) -> Option<T> {
        self.rx.recv().await.ok()
    }
}
