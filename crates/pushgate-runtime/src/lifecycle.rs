use std::sync::Arc;

use pushgate_core::{
    ClientCredentials, ClientLifecycleState, ClientStateMachine, InitError, InitOutcome, InitStep,
    ProviderError, ProviderErrorKind,
};
use pushgate_platform::{MessagingClient, MessagingClientFactory};
use tracing::{debug, error, info, warn};

use crate::{
    flight::{Flight, FlightWaiter},
    lock,
};

type InitResult = Result<InitOutcome, InitError>;

/// At-most-once construction of the remote-messaging client.
///
/// Concurrent `initialize` calls share one construction attempt and observe
/// the same result. The attempt runs on its own task, so a caller dropping
/// its future cannot strand the others in `Initializing`.
#[derive(Clone)]
pub struct ClientLifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    factory: Arc<dyn MessagingClientFactory>,
    slot: std::sync::Mutex<ClientSlot>,
}

#[derive(Default)]
struct ClientSlot {
    machine: ClientStateMachine,
    flight: Option<Flight<InitResult>>,
    client: Option<Arc<dyn MessagingClient>>,
}

impl ClientLifecycle {
    pub fn new(factory: Arc<dyn MessagingClientFactory>) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                factory,
                slot: std::sync::Mutex::new(ClientSlot::default()),
            }),
        }
    }

    pub fn state(&self) -> ClientLifecycleState {
        lock(&self.inner.slot).machine.state()
    }

    /// The constructed client, once `Ready`.
    pub fn client(&self) -> Option<Arc<dyn MessagingClient>> {
        let slot = lock(&self.inner.slot);
        match slot.machine.state() {
            ClientLifecycleState::Ready => slot.client.clone(),
            _ => None,
        }
    }

    pub async fn initialize(&self, credentials: ClientCredentials) -> InitResult {
        let waiter = match self.begin(credentials) {
            Ok(waiter) => waiter,
            Err(outcome) => return Ok(outcome),
        };

        waiter.wait().await.unwrap_or_else(|| {
            Err(InitError::Unknown(
                "initialization attempt ended without a result".to_owned(),
            ))
        })
    }

    fn begin(&self, credentials: ClientCredentials) -> Result<FlightWaiter<InitResult>, InitOutcome> {
        let mut slot = lock(&self.inner.slot);
        match slot.machine.begin() {
            InitStep::AlreadyReady => {
                debug!("messaging client already initialized");
                Err(InitOutcome::AlreadyInitialized)
            }
            InitStep::Join => {
                let attempt = u64::from(slot.machine.attempts());
                let flight = slot.flight.get_or_insert_with(|| Flight::new(attempt));
                debug!(attempt = flight.id(), "joining in-flight initialization");
                Ok(flight.join())
            }
            InitStep::Start => {
                let attempt = slot.machine.attempts();
                let flight = Flight::new(u64::from(attempt));
                let waiter = flight.join();
                slot.flight = Some(flight);
                drop(slot);

                self.spawn_construction(attempt, credentials);
                Ok(waiter)
            }
        }
    }

    fn spawn_construction(&self, attempt: u32, credentials: ClientCredentials) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            info!(
                attempt,
                project_id = %credentials.project_id,
                package_name = %credentials.package_name,
                "constructing messaging client"
            );

            let factory = Arc::clone(&inner.factory);
            let construction =
                tokio::spawn(async move { factory.construct(&credentials).await });
            let result = construction.await.unwrap_or_else(|join_err| {
                Err(ProviderError::new(
                    ProviderErrorKind::Internal,
                    format!("client construction aborted: {join_err}"),
                ))
            });

            finish_construction(&inner, attempt, result);
        });
    }
}

fn finish_construction(
    inner: &LifecycleInner,
    attempt: u32,
    result: Result<Arc<dyn MessagingClient>, ProviderError>,
) {
    let mut slot = lock(&inner.slot);
    let outcome = match result {
        Ok(client) => {
            slot.client = Some(client);
            Ok(InitOutcome::Initialized)
        }
        Err(err) => Err(map_init_error(err)),
    };

    if let Err(err) = slot.machine.on_init_result(outcome.is_ok()) {
        error!(attempt, error = %err, "client lifecycle out of sync with construction attempt");
    }

    match &outcome {
        Ok(_) => info!(attempt, "messaging client ready"),
        Err(err) => warn!(attempt, code = err.code(), error = %err, "messaging client construction failed"),
    }

    if let Some(flight) = slot.flight.take() {
        let waiters = flight.complete(outcome);
        debug!(attempt, waiters, "initialization result delivered");
    }
}

/// Map a provider construction failure onto the init error taxonomy.
pub fn map_init_error(err: ProviderError) -> InitError {
    match err.kind {
        ProviderErrorKind::InvalidCredentials => InitError::InvalidCredentials(err.message),
        ProviderErrorKind::TransportUnavailable
        | ProviderErrorKind::Network
        | ProviderErrorKind::Timeout => InitError::TransportUnavailable(err.message),
        ProviderErrorKind::RateLimited
        | ProviderErrorKind::Unregistered
        | ProviderErrorKind::Internal => InitError::Unknown(err.message),
    }
}
