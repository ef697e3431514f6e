use std::sync::Arc;

use pushgate_core::{PermissionError, PermissionState, PermissionStateMachine, PermissionStep};
use pushgate_platform::PermissionSubsystem;
use tracing::{debug, info, warn};

use crate::{
    flight::{Flight, FlightWaiter},
    lock,
};

/// Reconciles notification permission with the OS permission subsystem.
///
/// At most one OS prompt is outstanding at a time; concurrent checks join
/// it. Callbacks are matched on the correlation code issued with the prompt.
#[derive(Clone)]
pub struct PermissionCoordinator {
    inner: Arc<PermissionInner>,
}

struct PermissionInner {
    os: Arc<dyn PermissionSubsystem>,
    slot: std::sync::Mutex<PermissionSlot>,
}

struct PermissionSlot {
    machine: PermissionStateMachine,
    flight: Option<Flight<bool>>,
}

/// Result of `check_or_request`: either already known, or pending on an OS prompt.
pub struct PermissionTicket {
    request_code: Option<u32>,
    resolution: Resolution,
}

enum Resolution {
    Ready(bool),
    Waiting(FlightWaiter<bool>),
}

impl PermissionTicket {
    fn resolved(granted: bool) -> Self {
        Self {
            request_code: None,
            resolution: Resolution::Ready(granted),
        }
    }

    fn waiting(request_code: u32, waiter: FlightWaiter<bool>) -> Self {
        Self {
            request_code: Some(request_code),
            resolution: Resolution::Waiting(waiter),
        }
    }

    /// Correlation code of the OS prompt this ticket waits on.
    pub fn request_code(&self) -> Option<u32> {
        self.request_code
    }

    /// The decision, if it was available without waiting.
    pub fn immediate(&self) -> Option<bool> {
        match self.resolution {
            Resolution::Ready(granted) => Some(granted),
            Resolution::Waiting(_) => None,
        }
    }

    /// Wait for the decision. A prompt that is torn down unanswered reads as denied.
    pub async fn outcome(self) -> bool {
        match self.resolution {
            Resolution::Ready(granted) => granted,
            Resolution::Waiting(waiter) => waiter.wait().await.unwrap_or(false),
        }
    }
}

impl PermissionCoordinator {
    pub fn new(os: Arc<dyn PermissionSubsystem>, allow_rerequest_after_denial: bool) -> Self {
        Self {
            inner: Arc::new(PermissionInner {
                os,
                slot: std::sync::Mutex::new(PermissionSlot {
                    machine: PermissionStateMachine::new(allow_rerequest_after_denial),
                    flight: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> PermissionState {
        lock(&self.inner.slot).machine.state()
    }

    pub fn check_or_request(&self) -> PermissionTicket {
        let os = &self.inner.os;
        if !os.requires_permission() {
            lock(&self.inner.slot).machine.grant_implicitly();
            info!("platform grants notification permission implicitly");
            return PermissionTicket::resolved(true);
        }

        // Query the OS outside the slot lock; the state can still move in
        // between, in which case `begin` falls back to a locked query.
        let os_status = lock(&self.inner.slot)
            .machine
            .needs_os_status()
            .then(|| os.current_status());

        let mut slot = lock(&self.inner.slot);
        let step = slot
            .machine
            .begin(|| os_status.unwrap_or_else(|| os.current_status()));
        let (request_code, waiter) = match step {
            PermissionStep::Resolved(granted) => {
                debug!(granted, "notification permission already resolved");
                return PermissionTicket::resolved(granted);
            }
            PermissionStep::Join(request_code) => {
                let flight = slot
                    .flight
                    .get_or_insert_with(|| Flight::new(u64::from(request_code)));
                debug!(request_code, "joining pending permission request");
                return PermissionTicket::waiting(request_code, flight.join());
            }
            PermissionStep::Request(request_code) => {
                let flight = Flight::new(u64::from(request_code));
                let waiter = flight.join();
                slot.flight = Some(flight);
                (request_code, waiter)
            }
        };
        // The OS may answer synchronously from inside `request`.
        drop(slot);

        info!(request_code, "requesting notification permission");
        if let Err(err) = os.request(request_code) {
            warn!(request_code, error = %err, "permission request could not be dispatched");
            let mut slot = lock(&self.inner.slot);
            if slot.machine.abandon(request_code)
                && let Some(flight) = slot.flight.take()
            {
                flight.complete(false);
            }
        }

        PermissionTicket::waiting(request_code, waiter)
    }

    /// Apply an OS callback. Mismatched codes are logged and leave state untouched.
    pub fn on_callback(&self, request_code: u32, granted: bool) -> Result<bool, PermissionError> {
        let mut slot = lock(&self.inner.slot);
        match slot.machine.on_callback(request_code, granted) {
            Ok(granted) => {
                info!(request_code, granted, "permission request completed");
                if let Some(flight) = slot.flight.take() {
                    flight.complete(granted);
                }
                Ok(granted)
            }
            Err(err) => {
                warn!(request_code, error = %err, "ignoring stale permission callback");
                Err(err)
            }
        }
    }
}
