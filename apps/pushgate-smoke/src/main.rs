mod config;
mod logging;

use std::{process, sync::Arc, time::Duration};

use config::SmokeConfig;
use pushgate_core::{EventStream, GatewayCommand, HostEvent};
use pushgate_platform::{ScriptedPermissionSubsystem, ScriptedProvider};
use pushgate_runtime::{Gateway, GatewayHandle, spawn_runtime};
use tracing::{error, info};

const EVENT_WAIT: Duration = Duration::from_secs(30);
const PROMPT_POLL: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(2);
        }
    };

    let provider = ScriptedProvider::new();
    let os = ScriptedPermissionSubsystem::new(config.permission_required);
    let gateway = Arc::new(Gateway::new(
        config.application_id.clone(),
        &config.settings,
        Arc::new(provider.clone()),
        Arc::new(os.clone()),
    ));
    let handle = spawn_runtime(Arc::clone(&gateway), &config.settings);
    let mut events = handle.subscribe();

    let config_json = config
        .config_json
        .clone()
        .unwrap_or_else(|| sample_config(&config.application_id));

    let init = run_step(&handle, &mut events, GatewayCommand::Init { config_json }).await;
    if init.is_failure() {
        finish(&handle, 1);
    }

    if let Err(err) = handle.send(GatewayCommand::RequestPermission).await {
        error!(error = %err, "failed to send permission request");
        finish(&handle, 1);
    }
    if config.permission_required {
        let Some(request_code) = wait_for_prompt(&os, EVENT_WAIT).await else {
            error!("no permission prompt within {} s", EVENT_WAIT.as_secs());
            finish(&handle, 1);
        };
        info!(request_code, "answering scripted permission prompt");
        if let Err(err) = handle
            .send(GatewayCommand::PermissionResult {
                request_code,
                granted: true,
            })
            .await
        {
            error!(error = %err, "failed to deliver permission result");
            finish(&handle, 1);
        }
    }
    print_event(&next_event(&mut events).await);

    let token = run_step(&handle, &mut events, GatewayCommand::FetchToken).await;
    info!(
        status = ?gateway.status(),
        construct_calls = provider.construct_calls(),
        fetch_calls = provider.fetch_calls(),
        "smoke run finished"
    );
    finish(&handle, if token.is_failure() { 1 } else { 0 });
}

async fn run_step(
    handle: &GatewayHandle,
    events: &mut EventStream,
    command: GatewayCommand,
) -> HostEvent {
    if let Err(err) = handle.send(command).await {
        error!(error = %err, "failed to send command");
        finish(handle, 1);
    }
    let event = next_event(events).await;
    print_event(&event);
    event
}

async fn next_event(events: &mut EventStream) -> HostEvent {
    match tokio::time::timeout(EVENT_WAIT, events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => {
            eprintln!("Event stream closed unexpectedly");
            process::exit(1);
        }
        Err(_) => {
            eprintln!("No event within {} s", EVENT_WAIT.as_secs());
            process::exit(1);
        }
    }
}

async fn wait_for_prompt(os: &ScriptedPermissionSubsystem, wait: Duration) -> Option<u32> {
    let poll = async {
        loop {
            if let Some(code) = os.requests().last().copied() {
                return code;
            }
            tokio::time::sleep(PROMPT_POLL).await;
        }
    };
    tokio::time::timeout(wait, poll).await.ok()
}

fn print_event(event: &HostEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("Failed to encode {} event: {err}", event.name()),
    }
}

fn finish(handle: &GatewayHandle, code: i32) -> ! {
    handle.shutdown();
    process::exit(code);
}

fn sample_config(application_id: &str) -> String {
    serde_json::json!({
        "project_info": {
            "project_number": "123456789012",
            "project_id": "pushgate-smoke",
            "storage_bucket": "pushgate-smoke.appspot.com"
        },
        "client": [
            {
                "client_info": {
                    "mobilesdk_app_id": "1:123456789012:android:0123456789abcdef",
                    "android_client_info": { "package_name": application_id }
                },
                "api_key": [{ "current_key": "AIzaSySmokeTestKey" }]
            }
        ]
    })
    .to_string()
}
