//! Seams to the collaborators the gateway does not own: the remote push
//! provider's client library and the OS notification-permission subsystem.
//!
//! The scripted implementations are in-memory stand-ins with call counters
//! and queued responses, used by tests and the smoke harness.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use pushgate_core::{ClientCredentials, PermissionStatus, ProviderError, lock};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("permission prompt unavailable: {0}")]
    PromptUnavailable(String),
}

/// A constructed remote-messaging client.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn fetch_token(&self) -> Result<String, ProviderError>;
}

/// Builds the remote-messaging client from resolved credentials.
#[async_trait]
pub trait MessagingClientFactory: Send + Sync {
    async fn construct(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<Arc<dyn MessagingClient>, ProviderError>;
}

/// OS notification-permission subsystem.
///
/// `request` only dispatches the prompt; the answer comes back later through
/// the gateway's permission callback, tagged with the same `request_code`.
pub trait PermissionSubsystem: Send + Sync {
    /// `false` on platforms where notifications need no runtime permission.
    fn requires_permission(&self) -> bool;

    fn current_status(&self) -> PermissionStatus;

    fn request(&self, request_code: u32) -> Result<(), PlatformError>;
}

/// Scripted provider: a factory whose clients share its response queues.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    inner: Arc<ScriptedProviderInner>,
}

#[derive(Default)]
struct ScriptedProviderInner {
    construct_results: Mutex<VecDeque<Result<(), ProviderError>>>,
    token_results: Mutex<VecDeque<Result<String, ProviderError>>>,
    last_credentials: Mutex<Option<ClientCredentials>>,
    latency: Mutex<Duration>,
    construct_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every construct/fetch call by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.inner.latency) = latency;
        self
    }

    /// Queue the result of the next construction. Unscripted calls succeed.
    pub fn push_construct_result(&self, result: Result<(), ProviderError>) {
        lock(&self.inner.construct_results).push_back(result);
    }

    /// Queue the result of the next token fetch. Unscripted calls return
    /// `scripted-token-<n>` where `n` is the fetch call number.
    pub fn push_token_result(&self, result: Result<String, ProviderError>) {
        lock(&self.inner.token_results).push_back(result);
    }

    pub fn construct_calls(&self) -> usize {
        self.inner.construct_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.inner.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn last_credentials(&self) -> Option<ClientCredentials> {
        lock(&self.inner.last_credentials).clone()
    }

    async fn simulate_latency(&self) {
        let latency = *lock(&self.inner.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl MessagingClientFactory for ScriptedProvider {
    async fn construct(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<Arc<dyn MessagingClient>, ProviderError> {
        self.inner.construct_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.inner.last_credentials) = Some(credentials.clone());
        self.simulate_latency().await;

        let scripted = lock(&self.inner.construct_results).pop_front();
        scripted.unwrap_or(Ok(()))?;
        Ok(Arc::new(ScriptedClient {
            provider: self.clone(),
        }))
    }
}

struct ScriptedClient {
    provider: ScriptedProvider,
}

#[async_trait]
impl MessagingClient for ScriptedClient {
    async fn fetch_token(&self) -> Result<String, ProviderError> {
        let call = self.provider.inner.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.provider.simulate_latency().await;

        let scripted = lock(&self.provider.inner.token_results).pop_front();
        scripted.unwrap_or_else(|| Ok(format!("scripted-token-{call}")))
    }
}

/// Scripted permission subsystem recording every dispatched request code.
#[derive(Clone)]
pub struct ScriptedPermissionSubsystem {
    inner: Arc<ScriptedPermissionInner>,
}

struct ScriptedPermissionInner {
    requires_permission: bool,
    status: Mutex<PermissionStatus>,
    requests: Mutex<Vec<u32>>,
    failure: Mutex<Option<String>>,
    status_queries: AtomicUsize,
}

impl ScriptedPermissionSubsystem {
    pub fn new(requires_permission: bool) -> Self {
        Self {
            inner: Arc::new(ScriptedPermissionInner {
                requires_permission,
                status: Mutex::new(PermissionStatus::Undetermined),
                requests: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                status_queries: AtomicUsize::new(0),
            }),
        }
    }

    /// Status the OS reports before any prompt.
    pub fn set_status(&self, status: PermissionStatus) {
        *lock(&self.inner.status) = status;
    }

    /// Make every subsequent `request` fail to dispatch.
    pub fn fail_requests_with(&self, message: impl Into<String>) {
        *lock(&self.inner.failure) = Some(message.into());
    }

    pub fn requests(&self) -> Vec<u32> {
        lock(&self.inner.requests).clone()
    }

    /// Number of times the OS was consulted at all (status or prompt).
    pub fn contacts(&self) -> usize {
        self.inner.status_queries.load(Ordering::SeqCst) + lock(&self.inner.requests).len()
    }
}

impl PermissionSubsystem for ScriptedPermissionSubsystem {
    fn requires_permission(&self) -> bool {
        self.inner.requires_permission
    }

    fn current_status(&self) -> PermissionStatus {
        self.inner.status_queries.fetch_add(1, Ordering::SeqCst);
        *lock(&self.inner.status)
    }

    fn request(&self, request_code: u32) -> Result<(), PlatformError> {
        if let Some(message) = lock(&self.inner.failure).clone() {
            return Err(PlatformError::PromptUnavailable(message));
        }
        lock(&self.inner.requests).push(request_code);
        Ok(())
    }
}
