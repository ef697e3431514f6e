//! Environment-backed settings for the smoke harness.

use std::{env, error::Error, fmt, time::Duration};

use pushgate_core::{GatewaySettings, RetryPolicy, UndeliveredEventPolicy};

const DEFAULT_APP_ID: &str = "com.example.app";

/// Settings for one smoke run.
#[derive(Debug, Clone, PartialEq)]
pub struct SmokeConfig {
    /// Application identity the gateway resolves credentials for.
    pub application_id: String,
    /// Configuration document text. `None` uses a generated sample.
    pub config_json: Option<String>,
    /// Whether the scripted OS demands a runtime permission prompt.
    pub permission_required: bool,
    /// Gateway tunables.
    pub settings: GatewaySettings,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let application_id = optional_trimmed_env("PUSHGATE_APP_ID", &mut lookup)
            .unwrap_or_else(|| DEFAULT_APP_ID.to_owned());
        let config_json = optional_trimmed_env("PUSHGATE_CONFIG_JSON", &mut lookup);

        let defaults = RetryPolicy::default();
        let max_attempts = parse_positive_u64(
            "PUSHGATE_TOKEN_MAX_ATTEMPTS",
            u64::from(defaults.max_attempts()),
            &mut lookup,
        )?;
        let max_attempts =
            u32::try_from(max_attempts).map_err(|err| ConfigError::InvalidValue {
                key: "PUSHGATE_TOKEN_MAX_ATTEMPTS",
                value: max_attempts.to_string(),
                reason: err.to_string(),
            })?;
        let base_delay_ms = parse_positive_u64(
            "PUSHGATE_TOKEN_BASE_DELAY_MS",
            defaults.base_delay_ms(),
            &mut lookup,
        )?;
        let max_delay_ms = parse_positive_u64(
            "PUSHGATE_TOKEN_MAX_DELAY_MS",
            defaults.max_delay_ms(),
            &mut lookup,
        )?;
        let attempt_timeout_ms = parse_positive_u64(
            "PUSHGATE_TOKEN_ATTEMPT_TIMEOUT_MS",
            defaults.attempt_timeout().as_millis() as u64,
            &mut lookup,
        )?;

        if max_delay_ms < base_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "PUSHGATE_TOKEN_MAX_DELAY_MS",
                value: max_delay_ms.to_string(),
                reason: format!("must be at least the base delay ({base_delay_ms} ms)"),
            });
        }

        let undelivered_events = match lookup("PUSHGATE_EVENT_BACKLOG") {
            None => UndeliveredEventPolicy::default(),
            Some(value) => {
                let capacity =
                    value
                        .trim()
                        .parse::<usize>()
                        .map_err(|err| ConfigError::InvalidValue {
                            key: "PUSHGATE_EVENT_BACKLOG",
                            value: value.clone(),
                            reason: err.to_string(),
                        })?;
                if capacity == 0 {
                    UndeliveredEventPolicy::Drop
                } else {
                    UndeliveredEventPolicy::Buffer { capacity }
                }
            }
        };

        let permission_required =
            parse_bool("PUSHGATE_PERMISSION_REQUIRED", true, &mut lookup)?;

        Ok(Self {
            application_id,
            config_json,
            permission_required,
            settings: GatewaySettings {
                retry: RetryPolicy::new(base_delay_ms, max_delay_ms)
                    .with_max_attempts(max_attempts)
                    .with_attempt_timeout(Duration::from_millis(attempt_timeout_ms)),
                undelivered_events,
                ..GatewaySettings::default()
            },
        })
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_positive_u64<F>(key: &'static str, default: u64, lookup: &mut F) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    let parsed = value
        .trim()
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: value.clone(),
            reason: err.to_string(),
        })?;
    if parsed == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "must be at least 1".to_owned(),
        });
    }
    Ok(parsed)
}

fn parse_bool<F>(key: &'static str, default: bool, lookup: &mut F) -> Result<bool, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}
