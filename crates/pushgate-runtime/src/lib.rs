//! Asynchronous push registration gateway.
//!
//! `Gateway` wires configuration resolution, client lifecycle, permission
//! coordination and token acquisition to one host event emitter. Every host
//! call produces exactly one terminal event. `spawn_runtime` drives a
//! gateway from a command channel the way a plugin host issues discrete calls.

use std::sync::Arc;

use pushgate_core::{
    ClientLifecycleState, ConfigResolver, EventEmitter, EventStream, FetchError, GatewayChannelError,
    GatewayChannels, GatewayCommand, GatewayError, GatewaySettings, GatewayStatus, InitOutcome,
    PermissionError, PushToken, normalize_init_outcome, normalize_permission_outcome,
    normalize_token_outcome,
};
use pushgate_platform::{MessagingClientFactory, PermissionSubsystem};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

mod flight;
pub mod lifecycle;
pub mod permission;
pub mod token;

pub use lifecycle::{ClientLifecycle, map_init_error};
pub use permission::{PermissionCoordinator, PermissionTicket};
pub use token::{TokenAcquisition, classify_fetch_error};

pub(crate) use pushgate_core::lock;

/// Host-facing gateway for one application identity.
pub struct Gateway {
    resolver: ConfigResolver,
    emitter: EventEmitter,
    lifecycle: ClientLifecycle,
    permissions: PermissionCoordinator,
    tokens: TokenAcquisition,
}

impl Gateway {
    pub fn new(
        application_id: impl Into<String>,
        settings: &GatewaySettings,
        factory: Arc<dyn MessagingClientFactory>,
        permission_subsystem: Arc<dyn PermissionSubsystem>,
    ) -> Self {
        let lifecycle = ClientLifecycle::new(factory);
        let permissions = PermissionCoordinator::new(
            permission_subsystem,
            settings.allow_rerequest_after_denial,
        );
        let tokens = TokenAcquisition::new(lifecycle.clone(), permissions.clone(), settings.retry);

        Self {
            resolver: ConfigResolver::new(application_id),
            emitter: EventEmitter::new(settings.event_buffer, settings.undelivered_events),
            lifecycle,
            permissions,
            tokens,
        }
    }

    pub fn application_id(&self) -> &str {
        self.resolver.application_id()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn subscribe(&self) -> EventStream {
        self.emitter.subscribe()
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            client: self.lifecycle.state(),
            permission: self.permissions.state(),
        }
    }

    /// Resolve `config_json` for this application and initialize the client.
    ///
    /// Emits `initialized` or `initialization_failed`.
    pub async fn init(&self, config_json: &str) -> Result<InitOutcome, GatewayError> {
        let outcome = self.init_client(config_json).await;
        self.emitter.emit(normalize_init_outcome(&outcome));
        outcome
    }

    async fn init_client(&self, config_json: &str) -> Result<InitOutcome, GatewayError> {
        if self.lifecycle.state() == ClientLifecycleState::Ready {
            info!("messaging client already initialized; skipping configuration");
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let credentials = self.resolver.resolve_str(config_json)?;
        Ok(self.lifecycle.initialize(credentials).await?)
    }

    /// Check notification permission, prompting the OS when undetermined.
    ///
    /// Emits `permission_request_completed`.
    pub async fn request_permission(&self) -> bool {
        let granted = self.permissions.check_or_request().outcome().await;
        self.emitter.emit(normalize_permission_outcome(granted));
        granted
    }

    /// OS permission callback entry point.
    pub fn on_permission_result(
        &self,
        request_code: u32,
        granted: bool,
    ) -> Result<bool, PermissionError> {
        self.permissions.on_callback(request_code, granted)
    }

    /// Fetch the registration token.
    ///
    /// Emits `token_received` or `token_fetch_failed`.
    pub async fn get_token(&self) -> Result<PushToken, FetchError> {
        let outcome = self.tokens.fetch_token().await;
        self.emitter.emit(normalize_token_outcome(&outcome));
        outcome
    }
}

/// Handle to a running gateway command loop.
#[derive(Clone, Debug)]
pub struct GatewayHandle {
    channels: GatewayChannels,
    shutdown: CancellationToken,
}

impl GatewayHandle {
    pub async fn send(&self, command: GatewayCommand) -> Result<(), GatewayChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Stop accepting commands. Operations already running still finish.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

pub fn spawn_runtime(gateway: Arc<Gateway>, settings: &GatewaySettings) -> GatewayHandle {
    let (channels, command_rx) =
        GatewayChannels::new(settings.command_buffer, gateway.emitter().clone());
    let shutdown = CancellationToken::new();
    let runtime = GatewayRuntime {
        gateway,
        command_rx,
        shutdown: shutdown.child_token(),
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    GatewayHandle { channels, shutdown }
}

struct GatewayRuntime {
    gateway: Arc<Gateway>,
    command_rx: mpsc::Receiver<GatewayCommand>,
    shutdown: CancellationToken,
}

impl GatewayRuntime {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = self.command_rx.recv() => {
                    let Some(command) = command else { break };
                    self.dispatch(command);
                }
            }
        }
        debug!("gateway runtime exiting");
    }

    // Each call runs on its own task so a pending permission prompt never
    // blocks the callback that resolves it.
    fn dispatch(&self, command: GatewayCommand) {
        debug!(command = command_kind(&command), "dispatching gateway command");
        let gateway = Arc::clone(&self.gateway);
        match command {
            GatewayCommand::Init { config_json } => {
                tokio::spawn(async move {
                    let _ = gateway.init(&config_json).await;
                });
            }
            GatewayCommand::RequestPermission => {
                tokio::spawn(async move {
                    gateway.request_permission().await;
                });
            }
            GatewayCommand::FetchToken => {
                tokio::spawn(async move {
                    let _ = gateway.get_token().await;
                });
            }
            GatewayCommand::PermissionResult {
                request_code,
                granted,
            } => {
                // Stale callbacks are logged by the coordinator.
                let _ = gateway.on_permission_result(request_code, granted);
            }
        }
    }
}

fn command_kind(command: &GatewayCommand) -> &'static str {
    match command {
        GatewayCommand::Init { .. } => "init",
        GatewayCommand::RequestPermission => "request_permission",
        GatewayCommand::FetchToken => "fetch_token",
        GatewayCommand::PermissionResult { .. } => "permission_result",
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use pushgate_core::{
        ClientCredentials, HostEvent, InitError, PERMISSION_REQUEST_CODE_BASE, PermissionState,
        ProviderError, ProviderErrorKind, ResolutionError, RetryPolicy,
    };
    use pushgate_platform::{MessagingClient, ScriptedPermissionSubsystem, ScriptedProvider};
    use tokio::{task::JoinSet, time::timeout};

    use super::*;

    const APP_ID: &str = "com.example.app";

    fn services_json() -> String {
        serde_json::json!({
            "project_info": {
                "project_number": "123456789012",
                "project_id": "demo-project",
                "firebase_url": "https://demo-project.firebaseio.com"
            },
            "client": [
                {
                    "client_info": {
                        "mobilesdk_app_id": "1:123456789012:android:other",
                        "android_client_info": { "package_name": "com.example.other" }
                    },
                    "api_key": [{ "current_key": "other-key" }]
                },
                {
                    "client_info": {
                        "mobilesdk_app_id": "1:123456789012:android:app",
                        "android_client_info": { "package_name": APP_ID }
                    },
                    "api_key": [{ "current_key": "app-key" }]
                }
            ]
        })
        .to_string()
    }

    fn gateway_with(
        provider: &ScriptedProvider,
        os: &ScriptedPermissionSubsystem,
        settings: GatewaySettings,
    ) -> Gateway {
        Gateway::new(
            APP_ID,
            &settings,
            Arc::new(provider.clone()),
            Arc::new(os.clone()),
        )
    }

    async fn next_event(events: &mut EventStream) -> HostEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("event timeout")
            .expect("event stream closed")
    }

    async fn wait_for_prompt(os: &ScriptedPermissionSubsystem) {
        timeout(Duration::from_secs(2), async {
            while os.requests().is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("permission prompt should be dispatched");
    }

    #[tokio::test]
    async fn init_resolves_credentials_and_emits_initialized() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());
        let mut events = gateway.subscribe();

        let outcome = gateway.init(&services_json()).await;

        assert_eq!(outcome, Ok(InitOutcome::Initialized));
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        let creds = provider.last_credentials().expect("credentials passed to provider");
        assert_eq!(creds.api_key, "app-key");
        assert_eq!(
            creds.database_url.as_deref(),
            Some("https://demo-project.firebaseio.com")
        );
        assert_eq!(gateway.status().client, ClientLifecycleState::Ready);
    }

    #[tokio::test]
    async fn missing_client_entry_never_constructs_client() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = Gateway::new(
            "com.example.unknown",
            &GatewaySettings::default(),
            Arc::new(provider.clone()),
            Arc::new(os),
        );
        let mut events = gateway.subscribe();

        let err = gateway
            .init(&services_json())
            .await
            .expect_err("init must fail");

        assert_eq!(
            err,
            GatewayError::Resolution(ResolutionError::NoMatch {
                application_id: "com.example.unknown".into()
            })
        );
        assert_eq!(provider.construct_calls(), 0);
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::InitializationFailed(
                "initialization failed: client config not found for package: com.example.unknown"
                    .into()
            )
        );
        assert_eq!(gateway.status().client, ClientLifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn concurrent_init_constructs_once_and_both_callers_agree() {
        let provider = ScriptedProvider::new().with_latency(Duration::from_millis(20));
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());
        let mut events = gateway.subscribe();
        let doc = services_json();

        let (a, b) = tokio::join!(gateway.init(&doc), gateway.init(&doc));

        assert_eq!(a, Ok(InitOutcome::Initialized));
        assert_eq!(a, b);
        assert_eq!(provider.construct_calls(), 1);
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test]
    async fn repeat_init_skips_parsing_once_ready() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());
        let mut events = gateway.subscribe();
        gateway.init(&services_json()).await.expect("init should work");
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        assert_eq!(events.try_recv(), None);

        let outcome = gateway.init("not even json").await;

        assert_eq!(outcome, Ok(InitOutcome::AlreadyInitialized));
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        assert_eq!(events.try_recv(), None);
        assert_eq!(provider.construct_calls(), 1);
    }

    #[tokio::test]
    async fn construction_failure_reports_reason_and_allows_retry() {
        let provider = ScriptedProvider::new();
        provider.push_construct_result(Err(ProviderError::new(
            ProviderErrorKind::InvalidCredentials,
            "API key not valid",
        )));
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());
        let mut events = gateway.subscribe();

        let err = gateway
            .init(&services_json())
            .await
            .expect_err("first init fails");
        assert_eq!(
            err,
            GatewayError::Init(InitError::InvalidCredentials("API key not valid".into()))
        );
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::InitializationFailed(
                "initialization failed: invalid credentials: API key not valid".into()
            )
        );
        assert_eq!(gateway.status().client, ClientLifecycleState::Failed);

        gateway
            .init(&services_json())
            .await
            .expect("retry after failure should work");
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        assert_eq!(provider.construct_calls(), 2);
    }

    struct PanickingFactory;

    #[async_trait]
    impl MessagingClientFactory for PanickingFactory {
        async fn construct(
            &self,
            _credentials: &ClientCredentials,
        ) -> Result<Arc<dyn MessagingClient>, ProviderError> {
            panic!("vendor library blew up");
        }
    }

    #[tokio::test]
    async fn provider_panic_surfaces_as_unknown_init_failure() {
        let gateway = Gateway::new(
            APP_ID,
            &GatewaySettings::default(),
            Arc::new(PanickingFactory),
            Arc::new(ScriptedPermissionSubsystem::new(true)),
        );
        let mut events = gateway.subscribe();

        let err = gateway
            .init(&services_json())
            .await
            .expect_err("panicking provider must fail init");

        assert!(matches!(err, GatewayError::Init(InitError::Unknown(_))));
        assert!(matches!(
            next_event(&mut events).await,
            HostEvent::InitializationFailed(_)
        ));
        assert_eq!(gateway.status().client, ClientLifecycleState::Failed);
    }

    #[tokio::test]
    async fn concurrent_token_requests_share_one_fetch() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = Arc::new(gateway_with(&provider, &os, GatewaySettings::default()));
        let mut events = gateway.subscribe();
        gateway.init(&services_json()).await.expect("init should work");
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        let provider = provider.with_latency(Duration::from_millis(50));

        let mut calls = JoinSet::new();
        for _ in 0..4 {
            let gateway = Arc::clone(&gateway);
            calls.spawn(async move { gateway.get_token().await });
        }
        let mut results = Vec::new();
        while let Some(joined) = calls.join_next().await {
            results.push(joined.expect("task should not panic"));
        }

        assert_eq!(provider.fetch_calls(), 1);
        assert!(
            results
                .iter()
                .all(|r| r.as_ref().map(PushToken::as_str) == Ok("scripted-token-1"))
        );
        for _ in 0..4 {
            assert_eq!(
                next_event(&mut events).await,
                HostEvent::TokenReceived("scripted-token-1".into())
            );
        }
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_emit_token_fetch_failed() {
        let provider = ScriptedProvider::new();
        for _ in 0..2 {
            provider.push_token_result(Err(ProviderError::new(
                ProviderErrorKind::Timeout,
                "deadline exceeded",
            )));
        }
        let os = ScriptedPermissionSubsystem::new(true);
        let settings = GatewaySettings {
            retry: RetryPolicy::new(200, 2_000).with_max_attempts(2),
            ..GatewaySettings::default()
        };
        let gateway = gateway_with(&provider, &os, settings);
        let mut events = gateway.subscribe();
        gateway.init(&services_json()).await.expect("init should work");
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);

        let err = gateway.get_token().await.expect_err("fetch must fail");

        assert_eq!(err.code(), "fetch_retries_exhausted");
        assert_eq!(provider.fetch_calls(), 2);
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::TokenFetchFailed(
                "token fetch failed: retries exhausted after 2 attempts: deadline exceeded".into()
            )
        );
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test]
    async fn token_before_init_fails_with_one_event() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());
        let mut events = gateway.subscribe();

        gateway.get_token().await.expect_err("fetch must fail");

        assert_eq!(
            next_event(&mut events).await,
            HostEvent::TokenFetchFailed("token fetch failed: client is not initialized".into())
        );
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test]
    async fn permission_is_granted_without_os_on_legacy_platforms() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(false);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());
        let mut events = gateway.subscribe();

        assert!(gateway.request_permission().await);
        assert_eq!(os.contacts(), 0);
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::PermissionRequestCompleted(true)
        );
        assert_eq!(gateway.status().permission, PermissionState::Granted);
    }

    #[tokio::test]
    async fn concurrent_permission_checks_coalesce_and_ignore_stale_callbacks() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let gateway = Arc::new(gateway_with(&provider, &os, GatewaySettings::default()));
        let mut events = gateway.subscribe();

        let mut checks = JoinSet::new();
        for _ in 0..2 {
            let gateway = Arc::clone(&gateway);
            checks.spawn(async move { gateway.request_permission().await });
        }
        wait_for_prompt(&os).await;

        let stale = gateway.on_permission_result(PERMISSION_REQUEST_CODE_BASE + 40, true);
        assert!(matches!(
            stale,
            Err(PermissionError::CorrelationMismatch { .. })
        ));
        assert_eq!(
            gateway.status().permission,
            PermissionState::PendingRequest {
                request_code: PERMISSION_REQUEST_CODE_BASE
            }
        );
        assert_eq!(events.try_recv(), None);

        gateway
            .on_permission_result(PERMISSION_REQUEST_CODE_BASE, false)
            .expect("matching callback should apply");
        while let Some(joined) = checks.join_next().await {
            assert!(!joined.expect("task should not panic"));
        }

        assert_eq!(os.requests(), vec![PERMISSION_REQUEST_CODE_BASE]);
        for _ in 0..2 {
            assert_eq!(
                next_event(&mut events).await,
                HostEvent::PermissionRequestCompleted(false)
            );
        }
        assert_eq!(events.try_recv(), None);
        assert_eq!(gateway.status().permission, PermissionState::Denied);
    }

    #[tokio::test]
    async fn events_emitted_before_subscription_are_buffered() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(false);
        let gateway = gateway_with(&provider, &os, GatewaySettings::default());

        gateway.init(&services_json()).await.expect("init should work");
        gateway.get_token().await.expect("token should be fetched");

        let mut events = gateway.subscribe();
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::TokenReceived("scripted-token-1".into())
        );
    }

    #[tokio::test]
    async fn runtime_drives_full_registration_flow() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let settings = GatewaySettings::default();
        let gateway = Arc::new(gateway_with(&provider, &os, settings.clone()));
        let handle = spawn_runtime(Arc::clone(&gateway), &settings);
        let mut events = handle.subscribe();

        handle
            .send(GatewayCommand::Init {
                config_json: services_json(),
            })
            .await
            .expect("command should enqueue");
        assert_eq!(next_event(&mut events).await, HostEvent::Initialized);

        handle
            .send(GatewayCommand::RequestPermission)
            .await
            .expect("command should enqueue");
        wait_for_prompt(&os).await;
        handle
            .send(GatewayCommand::PermissionResult {
                request_code: PERMISSION_REQUEST_CODE_BASE,
                granted: true,
            })
            .await
            .expect("command should enqueue");
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::PermissionRequestCompleted(true)
        );

        handle
            .send(GatewayCommand::FetchToken)
            .await
            .expect("command should enqueue");
        assert_eq!(
            next_event(&mut events).await,
            HostEvent::TokenReceived("scripted-token-1".into())
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn runtime_stops_accepting_commands_after_shutdown() {
        let provider = ScriptedProvider::new();
        let os = ScriptedPermissionSubsystem::new(true);
        let settings = GatewaySettings::default();
        let gateway = Arc::new(gateway_with(&provider, &os, settings.clone()));
        let handle = spawn_runtime(gateway, &settings);

        handle.shutdown();
        let closed = timeout(Duration::from_secs(2), async {
            loop {
                if handle.send(GatewayCommand::FetchToken).await.is_err() {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;

        assert!(closed.is_ok(), "command channel should close after shutdown");
        assert_eq!(provider.fetch_calls(), 0);
    }
}
