use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use pushgate_core::{
    FetchError, PermissionStatus, ProviderError, ProviderErrorKind, PushToken, RetryPolicy,
};
use pushgate_platform::MessagingClient;
use tracing::{debug, info, warn};

use crate::{
    flight::Flight, lifecycle::ClientLifecycle, lock, permission::PermissionCoordinator,
};

type FetchResult = Result<PushToken, FetchError>;

/// Single-flight registration token retrieval with bounded retry.
#[derive(Clone)]
pub struct TokenAcquisition {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    lifecycle: ClientLifecycle,
    permissions: PermissionCoordinator,
    policy: RetryPolicy,
    in_flight: std::sync::Mutex<Option<Flight<FetchResult>>>,
    next_request_id: AtomicU64,
}

impl TokenAcquisition {
    pub fn new(
        lifecycle: ClientLifecycle,
        permissions: PermissionCoordinator,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                lifecycle,
                permissions,
                policy,
                in_flight: std::sync::Mutex::new(None),
                next_request_id: AtomicU64::new(1),
            }),
        }
    }

    /// Id of the fetch currently in flight, if any.
    pub fn in_flight_request(&self) -> Option<u64> {
        lock(&self.inner.in_flight).as_ref().map(Flight::id)
    }

    /// Fetch the registration token, joining an in-flight fetch when present.
    pub async fn fetch_token(&self) -> FetchResult {
        let waiter = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.as_ref() {
                Some(flight) => {
                    debug!(request_id = flight.id(), "joining in-flight token fetch");
                    flight.join()
                }
                None => {
                    let Some(client) = self.inner.lifecycle.client() else {
                        return Err(FetchError::NonTransient(
                            "client is not initialized".to_owned(),
                        ));
                    };
                    if self.inner.permissions.state().status() == PermissionStatus::Denied {
                        warn!("notification permission denied; fetching token anyway");
                    }

                    let request_id = self.inner.next_request_id.fetch_add(1, Ordering::Relaxed);
                    let flight = Flight::new(request_id);
                    let waiter = flight.join();
                    *in_flight = Some(flight);
                    self.spawn_fetch(request_id, client);
                    waiter
                }
            }
        };

        waiter.wait().await.unwrap_or_else(|| {
            Err(FetchError::NonTransient(
                "token request ended without a result".to_owned(),
            ))
        })
    }

    fn spawn_fetch(&self, request_id: u64, client: Arc<dyn MessagingClient>) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            debug!(request_id, "token fetch started");
            let outcome = fetch_with_retry(inner.policy, request_id, client).await;

            let flight = lock(&inner.in_flight).take();
            if let Some(flight) = flight {
                let waiters = flight.complete(outcome);
                debug!(request_id, waiters, "token fetch result delivered");
            }
        });
    }
}

async fn fetch_with_retry(
    policy: RetryPolicy,
    request_id: u64,
    client: Arc<dyn MessagingClient>,
) -> FetchResult {
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        let err = match fetch_once(&policy, Arc::clone(&client)).await {
            Ok(token) => {
                info!(request_id, attempts, "registration token received");
                return Ok(PushToken::new(token));
            }
            Err(err) => err,
        };

        let classified = classify_fetch_error(&err);
        if !classified.is_transient() {
            warn!(request_id, attempts, error = %err, "token fetch failed permanently");
            return Err(classified);
        }
        if !policy.allows_another_attempt(attempts) {
            warn!(request_id, attempts, error = %err, "token fetch retries exhausted");
            return Err(FetchError::RetriesExhausted {
                attempts,
                last_cause: err.message,
            });
        }

        let delay = policy.delay_for_attempt(attempts - 1, err.retry_after_ms);
        debug!(
            request_id,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient token fetch failure; backing off"
        );
        tokio::time::sleep(delay).await;
    }
}

/// One provider call bounded by the policy's per-attempt deadline.
async fn fetch_once(
    policy: &RetryPolicy,
    client: Arc<dyn MessagingClient>,
) -> Result<String, ProviderError> {
    let deadline = policy.attempt_timeout();
    let mut call = tokio::spawn(async move { client.fetch_token().await });

    match tokio::time::timeout(deadline, &mut call).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ProviderError::new(
            ProviderErrorKind::Internal,
            format!("token fetch aborted: {join_err}"),
        )),
        Err(_) => {
            call.abort();
            Err(ProviderError::new(
                ProviderErrorKind::Timeout,
                format!("no response within {} ms", deadline.as_millis()),
            ))
        }
    }
}

/// Split provider failures into retryable and terminal fetch errors.
pub fn classify_fetch_error(err: &ProviderError) -> FetchError {
    if err.kind.is_transient() {
        FetchError::Transient(err.message.clone())
    } else {
        FetchError::NonTransient(err.message.clone())
    }
}
