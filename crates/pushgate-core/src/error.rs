use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad failure category reported by remote-provider collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// API key or application id rejected.
    InvalidCredentials,
    /// Provider transport could not be brought up at all.
    TransportUnavailable,
    /// Transient network failure.
    Network,
    /// Provider did not answer in time.
    Timeout,
    /// Provider throttled the request.
    RateLimited,
    /// Application is not registered with the provider.
    Unregistered,
    /// Anything else, including provider bugs.
    Internal,
}

impl ProviderErrorKind {
    /// Whether a token fetch failing with this kind is worth retrying.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::RateLimited | Self::TransportUnavailable
        )
    }
}

/// Error payload returned by provider collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    /// High-level failure category.
    pub kind: ProviderErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }
}

/// Map HTTP status codes from HTTP-backed providers to provider error kinds.
pub fn classify_http_status(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::InvalidCredentials,
        404 | 410 => ProviderErrorKind::Unregistered,
        408 => ProviderErrorKind::Timeout,
        429 => ProviderErrorKind::RateLimited,
        502..=504 => ProviderErrorKind::Network,
        _ => ProviderErrorKind::Internal,
    }
}

/// Failure to pick credentials out of a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Document is not valid JSON, or a required field is missing or mistyped.
    #[error("malformed configuration: {reason}")]
    Malformed {
        /// What was wrong, including the field path when known.
        reason: String,
    },
    /// No client entry is keyed by the running application's identity.
    #[error("client config not found for package: {application_id}")]
    NoMatch {
        /// The identity that was searched for.
        application_id: String,
    },
}

impl ResolutionError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "config_malformed",
            Self::NoMatch { .. } => "config_no_match",
        }
    }
}

/// Failure to construct the remote-messaging client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum InitError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl InitError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "init_invalid_credentials",
            Self::TransportUnavailable(_) => "init_transport_unavailable",
            Self::Unknown(_) => "init_unknown",
        }
    }
}

/// Failure to obtain a registration token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Retryable failure (network, timeout, throttling).
    #[error("transient failure: {0}")]
    Transient(String),
    /// Failure that retrying cannot fix.
    #[error("{0}")]
    NonTransient(String),
    /// Every allowed attempt failed transiently.
    #[error("retries exhausted after {attempts} attempts: {last_cause}")]
    RetriesExhausted {
        /// Number of provider calls made.
        attempts: u32,
        /// Message of the final transient failure.
        last_cause: String,
    },
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Transient(_) => "fetch_transient",
            Self::NonTransient(_) => "fetch_non_transient",
            Self::RetriesExhausted { .. } => "fetch_retries_exhausted",
        }
    }
}

/// Permission callback problems. Logged, never surfaced to the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("permission callback code {received} does not match pending request {expected:?}")]
    CorrelationMismatch {
        /// Code of the outstanding request, if any.
        expected: Option<u32>,
        /// Code carried by the callback.
        received: u32,
    },
}

/// A state machine was asked to do something its current state forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot run '{action}' while {machine} is in state {state}")]
pub struct InvalidTransition {
    pub machine: &'static str,
    pub state: String,
    pub action: &'static str,
}

/// Host-visible operation that can fail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Stage {
    Initialization,
    TokenFetch,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialization => f.write_str("initialization"),
            Self::TokenFetch => f.write_str("token fetch"),
        }
    }
}

/// Terminal failure of a host-facing gateway operation.
///
/// `Display` names the stage and a terse cause; it is the exact string the
/// host receives in the matching failure event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("initialization failed: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("initialization failed: {0}")]
    Init(#[from] InitError),
    #[error("token fetch failed: {0}")]
    Fetch(#[from] FetchError),
}

impl GatewayError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Resolution(_) | Self::Init(_) => Stage::Initialization,
            Self::Fetch(_) => Stage::TokenFetch,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution(err) => err.code(),
            Self::Init(err) => err.code(),
            Self::Fetch(err) => err.code(),
        }
    }
}
