use crate::{
    error::{InvalidTransition, PermissionError},
    types::{ClientLifecycleState, PermissionState, PermissionStatus},
};

/// First correlation code handed to the OS permission subsystem.
pub const PERMISSION_REQUEST_CODE_BASE: u32 = 101;

/// What the caller of `ClientStateMachine::begin` must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Caller owns the construction attempt.
    Start,
    /// Another caller is constructing; wait for its result.
    Join,
    /// Client is ready; do nothing.
    AlreadyReady,
}

#[derive(Debug, Clone)]
pub struct ClientStateMachine {
    state: ClientLifecycleState,
    attempts: u32,
}

impl Default for ClientStateMachine {
    fn default() -> Self {
        Self {
            state: ClientLifecycleState::Uninitialized,
            attempts: 0,
        }
    }
}

impl ClientStateMachine {
    pub fn state(&self) -> ClientLifecycleState {
        self.state
    }

    /// Number of construction attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn begin(&mut self) -> InitStep {
        match self.state {
            ClientLifecycleState::Ready => InitStep::AlreadyReady,
            ClientLifecycleState::Initializing => InitStep::Join,
            ClientLifecycleState::Uninitialized | ClientLifecycleState::Failed => {
                self.state = ClientLifecycleState::Initializing;
                self.attempts = self.attempts.saturating_add(1);
                InitStep::Start
            }
        }
    }

    pub fn on_init_result(
        &mut self,
        success: bool,
    ) -> Result<ClientLifecycleState, InvalidTransition> {
        if self.state != ClientLifecycleState::Initializing {
            return Err(InvalidTransition {
                machine: "client",
                state: format!("{:?}", self.state),
                action: "on_init_result",
            });
        }

        self.state = if success {
            ClientLifecycleState::Ready
        } else {
            ClientLifecycleState::Failed
        };
        Ok(self.state)
    }
}

/// What the caller of `PermissionStateMachine::begin` must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStep {
    /// Outcome is known; `true` means granted.
    Resolved(bool),
    /// Caller must ask the OS, tagging the request with this code.
    Request(u32),
    /// A request with this code is already outstanding; wait for it.
    Join(u32),
}

#[derive(Debug, Clone)]
pub struct PermissionStateMachine {
    state: PermissionState,
    next_request_code: u32,
    allow_rerequest_after_denial: bool,
}

impl PermissionStateMachine {
    pub fn new(allow_rerequest_after_denial: bool) -> Self {
        Self {
            state: PermissionState::Unknown,
            next_request_code: PERMISSION_REQUEST_CODE_BASE,
            allow_rerequest_after_denial,
        }
    }

    pub fn state(&self) -> PermissionState {
        self.state
    }

    /// Record that the platform needs no runtime permission.
    pub fn grant_implicitly(&mut self) {
        self.state = PermissionState::Granted;
    }

    /// Whether the next `begin` would consult the OS status.
    pub fn needs_os_status(&self) -> bool {
        match self.state {
            PermissionState::Unknown => true,
            PermissionState::Denied => self.allow_rerequest_after_denial,
            PermissionState::Granted | PermissionState::PendingRequest { .. } => false,
        }
    }

    /// Start a permission check. `os_status` is only consulted when no
    /// decision is cached and no request is pending.
    pub fn begin(&mut self, os_status: impl FnOnce() -> PermissionStatus) -> PermissionStep {
        match self.state {
            PermissionState::Granted => PermissionStep::Resolved(true),
            PermissionState::Denied if !self.allow_rerequest_after_denial => {
                PermissionStep::Resolved(false)
            }
            PermissionState::PendingRequest { request_code } => PermissionStep::Join(request_code),
            PermissionState::Unknown | PermissionState::Denied => {
                if os_status().is_granted() {
                    self.state = PermissionState::Granted;
                    return PermissionStep::Resolved(true);
                }
                let request_code = self.next_request_code;
                self.next_request_code = self.next_request_code.wrapping_add(1);
                self.state = PermissionState::PendingRequest { request_code };
                PermissionStep::Request(request_code)
            }
        }
    }

    /// Apply an OS callback. Returns the committed grant decision.
    pub fn on_callback(&mut self, request_code: u32, granted: bool) -> Result<bool, PermissionError> {
        match self.state {
            PermissionState::PendingRequest {
                request_code: expected,
            } if expected == request_code => {
                self.state = if granted {
                    PermissionState::Granted
                } else {
                    PermissionState::Denied
                };
                Ok(granted)
            }
            PermissionState::PendingRequest {
                request_code: expected,
            } => Err(PermissionError::CorrelationMismatch {
                expected: Some(expected),
                received: request_code,
            }),
            _ => Err(PermissionError::CorrelationMismatch {
                expected: None,
                received: request_code,
            }),
        }
    }

    /// Drop a pending request that could not be dispatched to the OS.
    pub fn abandon(&mut self, request_code: u32) -> bool {
        if self.state == (PermissionState::PendingRequest { request_code }) {
            self.state = PermissionState::Unknown;
            return true;
        }
        false
    }
}
