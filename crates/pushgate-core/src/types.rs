use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Lifecycle of the process-wide remote-messaging client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClientLifecycleState {
    /// No initialization has been attempted yet.
    Uninitialized,
    /// A construction attempt is running.
    Initializing,
    /// The client is constructed and usable for token fetches.
    Ready,
    /// The last construction attempt failed; a new `initialize` may retry.
    Failed,
}

/// Tri-state notification permission as reported to readers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PermissionStatus {
    /// The user (or platform) granted notification permission.
    Granted,
    /// The user denied notification permission.
    Denied,
    /// No decision has been made yet.
    Undetermined,
}

impl PermissionStatus {
    pub fn is_granted(self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// Internal permission coordinator state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PermissionState {
    /// Nothing has been asked yet.
    Unknown,
    /// An OS prompt is outstanding, keyed by its correlation code.
    PendingRequest {
        /// Code the OS callback must echo back.
        request_code: u32,
    },
    /// Permission granted.
    Granted,
    /// Permission denied.
    Denied,
}

impl PermissionState {
    /// Collapse the coordinator state to the public tri-state.
    pub fn status(self) -> PermissionStatus {
        match self {
            Self::Granted => PermissionStatus::Granted,
            Self::Denied => PermissionStatus::Denied,
            Self::Unknown | Self::PendingRequest { .. } => PermissionStatus::Undetermined,
        }
    }
}

/// Credentials resolved for the running application from the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCredentials {
    /// Project identifier (`project_info.project_id`).
    pub project_id: String,
    /// Numeric sender id (`project_info.project_number`), kept as decimal text.
    pub sender_id: String,
    /// Provider application id (`client_info.mobilesdk_app_id`).
    pub application_id: String,
    /// Platform package identity the entry was matched on.
    pub package_name: String,
    /// First API key of the matched entry (`api_key[0].current_key`).
    pub api_key: String,
    /// Optional realtime database URL.
    pub database_url: Option<String>,
    /// Optional storage bucket.
    pub storage_bucket: Option<String>,
}

/// Successful result of `ClientLifecycle::initialize`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InitOutcome {
    /// This call (or the in-flight call it joined) constructed the client.
    Initialized,
    /// The client was already `Ready`; nothing was touched.
    AlreadyInitialized,
}

/// Registration token returned by the remote provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct PushToken(String);

impl PushToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for PushToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens to events emitted while no host listener is attached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UndeliveredEventPolicy {
    /// Keep up to `capacity` events for the first subscriber; oldest are evicted.
    Buffer {
        /// Maximum number of retained events.
        capacity: usize,
    },
    /// Discard events nobody is listening for (failures are still logged).
    Drop,
}

impl Default for UndeliveredEventPolicy {
    fn default() -> Self {
        Self::Buffer { capacity: 64 }
    }
}

/// Runtime tunables for one gateway instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Token fetch retry/backoff policy.
    pub retry: RetryPolicy,
    /// Pre-listener event policy.
    pub undelivered_events: UndeliveredEventPolicy,
    /// Whether a `Denied` permission may be asked again.
    pub allow_rerequest_after_denial: bool,
    /// Host command queue depth for the command runtime.
    pub command_buffer: usize,
    /// Broadcast capacity for live host events.
    pub event_buffer: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            undelivered_events: UndeliveredEventPolicy::default(),
            allow_rerequest_after_denial: false,
            command_buffer: 128,
            event_buffer: 512,
        }
    }
}

impl GatewaySettings {
    /// Per-attempt deadline applied to provider token fetches.
    pub fn token_attempt_timeout(&self) -> Duration {
        self.retry.attempt_timeout()
    }
}

/// Commands a host sends to the gateway runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum GatewayCommand {
    /// Resolve the configuration document and initialize the client.
    Init {
        /// Raw configuration document text.
        config_json: String,
    },
    /// Check notification permission, prompting the OS if undetermined.
    RequestPermission,
    /// Fetch the registration token.
    FetchToken,
    /// OS permission callback.
    PermissionResult {
        /// Correlation code echoed by the OS.
        request_code: u32,
        /// Whether the user granted the permission.
        granted: bool,
    },
}

/// Named events delivered to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "name", content = "payload", rename_all = "snake_case")]
pub enum HostEvent {
    /// Client initialization completed (or was already complete).
    Initialized,
    /// Configuration resolution or client construction failed.
    InitializationFailed(String),
    /// A registration token is available.
    TokenReceived(String),
    /// Token fetch failed terminally.
    TokenFetchFailed(String),
    /// A permission check finished.
    PermissionRequestCompleted(bool),
}

impl HostEvent {
    /// Stable signal name the host listens for.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::InitializationFailed(_) => "initialization_failed",
            Self::TokenReceived(_) => "token_received",
            Self::TokenFetchFailed(_) => "token_fetch_failed",
            Self::PermissionRequestCompleted(_) => "permission_request_completed",
        }
    }

    /// Whether this event reports a failed operation.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::InitializationFailed(_) | Self::TokenFetchFailed(_)
        )
    }
}

/// Point-in-time view of gateway state for status queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayStatus {
    /// Client lifecycle state.
    pub client: ClientLifecycleState,
    /// Permission coordinator state.
    pub permission: PermissionState,
}
