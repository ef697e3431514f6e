//! Core contract of the push registration gateway.
//!
//! This crate defines the host command/event protocol, the client and
//! permission state machines, configuration resolution, retry policy, and
//! the error taxonomy. It has no async collaborators of its own.

/// Command channel and host event emitter.
pub mod channel;
/// Error taxonomy and provider error classification.
pub mod error;
/// Outcome-to-event mapping.
pub mod normalization;
/// Configuration document parsing and credential selection.
pub mod resolver;
/// Backoff policy used by token acquisition.
pub mod retry;
/// Client lifecycle and permission state machines.
pub mod state_machine;
/// Poison-tolerant mutex access shared by the gateway crates.
pub mod sync;
/// Host-facing protocol types.
pub mod types;

pub use channel::{EventEmitter, EventStream, GatewayChannelError, GatewayChannels};
pub use error::{
    FetchError, GatewayError, InitError, InvalidTransition, PermissionError, ProviderError,
    ProviderErrorKind, ResolutionError, Stage, classify_http_status,
};
pub use normalization::{
    normalize_init_outcome, normalize_permission_outcome, normalize_token_outcome,
};
pub use resolver::{ClientEntry, ConfigDocument, ConfigResolver, ProjectInfo};
pub use retry::RetryPolicy;
pub use state_machine::{
    ClientStateMachine, InitStep, PERMISSION_REQUEST_CODE_BASE, PermissionStateMachine,
    PermissionStep,
};
pub use sync::lock;
pub use types::{
    ClientCredentials, ClientLifecycleState, GatewayCommand, GatewaySettings, GatewayStatus,
    HostEvent, InitOutcome, PermissionState, PermissionStatus, PushToken, UndeliveredEventPolicy,
};
