use crate::{
    error::{FetchError, GatewayError},
    types::{HostEvent, InitOutcome, PushToken},
};

/// Convert an init outcome into its single terminal host event.
///
/// `AlreadyInitialized` reports `initialized`, same as a fresh construction.
pub fn normalize_init_outcome(outcome: &Result<InitOutcome, GatewayError>) -> HostEvent {
    match outcome {
        Ok(_) => HostEvent::Initialized,
        Err(err) => HostEvent::InitializationFailed(err.to_string()),
    }
}

/// Convert a token fetch outcome into its single terminal host event.
pub fn normalize_token_outcome(outcome: &Result<PushToken, FetchError>) -> HostEvent {
    match outcome {
        Ok(token) => HostEvent::TokenReceived(token.as_str().to_owned()),
        Err(err) => HostEvent::TokenFetchFailed(GatewayError::from(err.clone()).to_string()),
    }
}

pub fn normalize_permission_outcome(granted: bool) -> HostEvent {
    HostEvent::PermissionRequestCompleted(granted)
}
