//! Configuration document parsing and per-application credential selection.
//!
//! The document is the provider's services file: a `project_info` object and
//! an ordered `client` array whose entries are keyed by
//! `client_info.android_client_info.package_name`. Unknown fields are ignored.

use serde::Deserialize;
use tracing::debug;

use crate::{error::ResolutionError, types::ClientCredentials};

/// Project-level metadata shared by every client entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub project_id: String,
    /// Decimal sender id, validated to be all digits.
    pub project_number: String,
    pub database_url: Option<String>,
    pub storage_bucket: Option<String>,
}

/// One per-application entry of the `client` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEntry {
    pub package_name: String,
    pub mobilesdk_app_id: Option<String>,
    /// `current_key` of every `api_key` element, in document order.
    pub api_keys: Vec<Option<String>>,
}

/// Schema-validated configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigDocument {
    pub project_info: ProjectInfo,
    pub clients: Vec<ClientEntry>,
}

#[derive(Deserialize)]
struct RawDocument {
    project_info: RawProjectInfo,
    client: Vec<RawClient>,
}

#[derive(Deserialize)]
struct RawProjectInfo {
    project_id: String,
    project_number: RawSenderId,
    #[serde(default)]
    firebase_url: Option<String>,
    #[serde(default)]
    storage_bucket: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSenderId {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct RawClient {
    client_info: RawClientInfo,
    #[serde(default)]
    api_key: Vec<RawApiKey>,
}

#[derive(Deserialize)]
struct RawClientInfo {
    #[serde(default)]
    mobilesdk_app_id: Option<String>,
    android_client_info: RawAndroidClientInfo,
}

#[derive(Deserialize)]
struct RawAndroidClientInfo {
    package_name: String,
}

#[derive(Deserialize)]
struct RawApiKey {
    #[serde(default)]
    current_key: Option<String>,
}

impl ConfigDocument {
    /// Parse and validate the document text.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let doc: RawDocument = serde_json::from_str(raw)
            .map_err(|err| ResolutionError::malformed(err.to_string()))?;

        if doc.project_info.project_id.trim().is_empty() {
            return Err(ResolutionError::malformed("project_info.project_id is empty"));
        }

        let project_number = match doc.project_info.project_number {
            RawSenderId::Number(value) => value.to_string(),
            RawSenderId::Text(value) => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ResolutionError::malformed(format!(
                        "project_info.project_number '{value}' is not a numeric sender id"
                    )));
                }
                value
            }
        };

        let clients = doc
            .client
            .into_iter()
            .map(|entry| ClientEntry {
                package_name: entry.client_info.android_client_info.package_name,
                mobilesdk_app_id: entry.client_info.mobilesdk_app_id,
                api_keys: entry.api_key.into_iter().map(|key| key.current_key).collect(),
            })
            .collect();

        Ok(Self {
            project_info: ProjectInfo {
                project_id: doc.project_info.project_id,
                project_number,
                database_url: non_blank(doc.project_info.firebase_url),
                storage_bucket: non_blank(doc.project_info.storage_bucket),
            },
            clients,
        })
    }
}

/// Selects the client entry for one application identity.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    application_id: String,
}

impl ConfigResolver {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
        }
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Parse `raw` and resolve credentials in one step.
    pub fn resolve_str(&self, raw: &str) -> Result<ClientCredentials, ResolutionError> {
        let document = ConfigDocument::parse(raw)?;
        self.resolve(&document)
    }

    /// Resolve credentials for this application. First exact match wins.
    pub fn resolve(&self, document: &ConfigDocument) -> Result<ClientCredentials, ResolutionError> {
        if self.application_id.trim().is_empty() {
            return Err(ResolutionError::malformed("application id is empty"));
        }

        let Some((index, entry)) = document
            .clients
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.package_name == self.application_id)
        else {
            return Err(ResolutionError::NoMatch {
                application_id: self.application_id.clone(),
            });
        };
        debug!(
            application_id = %self.application_id,
            index,
            "matched client entry"
        );

        let application_id = entry
            .mobilesdk_app_id
            .clone()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ResolutionError::malformed(format!(
                    "client[{index}].client_info.mobilesdk_app_id is missing"
                ))
            })?;

        let api_key = match entry.api_keys.first() {
            None => {
                return Err(ResolutionError::malformed(format!(
                    "client[{index}].api_key is empty"
                )));
            }
            Some(None) => {
                return Err(ResolutionError::malformed(format!(
                    "client[{index}].api_key[0].current_key is missing"
                )));
            }
            Some(Some(key)) => key.clone(),
        };

        Ok(ClientCredentials {
            project_id: document.project_info.project_id.clone(),
            sender_id: document.project_info.project_number.clone(),
            application_id,
            package_name: entry.package_name.clone(),
            api_key,
            database_url: document.project_info.database_url.clone(),
            storage_bucket: document.project_info.storage_bucket.clone(),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_client_document() -> String {
        serde_json::json!({
            "project_info": {
                "project_number": "123456789012",
                "project_id": "demo-project",
                "storage_bucket": "demo-project.appspot.com"
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
                        "android_client_info": { "package_name": "com.example.app" }
                    },
                    "oauth_client": [],
                    "api_key": [
                        { "current_key": "AIzaSyExampleFirstKey" },
                        { "current_key": "AIzaSyExampleSecondKey" }
                    ]
                }
            ],
            "configuration_version": "1"
        })
        .to_string()
    }

    #[test]
    fn resolves_matching_entry_with_first_api_key() {
        let creds = ConfigResolver::new("com.example.app")
            .resolve_str(&two_client_document())
            .expect("document should resolve");

        assert_eq!(creds.api_key, "AIzaSyExampleFirstKey");
        assert_eq!(creds.application_id, "1:123456789012:android:app");
        assert_eq!(creds.project_id, "demo-project");
        assert_eq!(creds.sender_id, "123456789012");
        assert_eq!(creds.package_name, "com.example.app");
        assert_eq!(
            creds.storage_bucket.as_deref(),
            Some("demo-project.appspot.com")
        );
        assert_eq!(creds.database_url, None);
    }

    #[test]
    fn reports_no_match_for_unknown_application() {
        let err = ConfigResolver::new("com.example.missing")
            .resolve_str(&two_client_document())
            .expect_err("unknown package must not resolve");
        assert_eq!(
            err,
            ResolutionError::NoMatch {
                application_id: "com.example.missing".into()
            }
        );
    }

    #[test]
    fn matching_is_exact_and_first_match_wins() {
        let raw = serde_json::json!({
            "project_info": { "project_number": 42, "project_id": "p" },
            "client": [
                {
                    "client_info": {
                        "mobilesdk_app_id": "upper",
                        "android_client_info": { "package_name": "COM.EXAMPLE.APP" }
                    },
                    "api_key": [{ "current_key": "k0" }]
                },
                {
                    "client_info": {
                        "mobilesdk_app_id": "first",
                        "android_client_info": { "package_name": "com.example.app" }
                    },
                    "api_key": [{ "current_key": "k1" }]
                },
                {
                    "client_info": {
                        "mobilesdk_app_id": "second",
                        "android_client_info": { "package_name": "com.example.app" }
                    },
                    "api_key": [{ "current_key": "k2" }]
                }
            ]
        })
        .to_string();

        let creds = ConfigResolver::new("com.example.app")
            .resolve_str(&raw)
            .expect("document should resolve");
        assert_eq!(creds.application_id, "first");
        assert_eq!(creds.api_key, "k1");
        assert_eq!(creds.sender_id, "42");
    }

    #[test]
    fn rejects_invalid_json_as_malformed() {
        let err = ConfigResolver::new("com.example.app")
            .resolve_str("{ not json")
            .expect_err("garbage must fail");
        assert_eq!(err.code(), "config_malformed");
    }

    #[test]
    fn rejects_missing_required_fields_as_malformed() {
        let missing_clients = r#"{"project_info":{"project_id":"p","project_number":"1"}}"#;
        let missing_project = r#"{"client":[]}"#;
        let missing_number = r#"{"project_info":{"project_id":"p"},"client":[]}"#;

        for raw in [missing_clients, missing_project, missing_number] {
            let err = ConfigDocument::parse(raw).expect_err("document must be rejected");
            assert!(matches!(err, ResolutionError::Malformed { .. }), "{raw}");
        }
    }

    #[test]
    fn rejects_non_numeric_sender_id() {
        let raw = r#"{"project_info":{"project_id":"p","project_number":"12ab"},"client":[]}"#;
        let err = ConfigDocument::parse(raw).expect_err("sender id must be numeric");
        assert!(matches!(err, ResolutionError::Malformed { .. }));
    }

    #[test]
    fn empty_client_list_is_no_match() {
        let raw = r#"{"project_info":{"project_id":"p","project_number":"1"},"client":[]}"#;
        let err = ConfigResolver::new("com.example.app")
            .resolve_str(raw)
            .expect_err("empty client list cannot match");
        assert_eq!(err.code(), "config_no_match");
    }

    #[test]
    fn optional_urls_tolerate_absence_null_and_blank() {
        let raw = serde_json::json!({
            "project_info": {
                "project_id": "p",
                "project_number": "1",
                "firebase_url": null,
                "storage_bucket": "  "
            },
            "client": []
        })
        .to_string();
        let doc = ConfigDocument::parse(&raw).expect("optional fields must be tolerated");
        assert_eq!(doc.project_info.database_url, None);
        assert_eq!(doc.project_info.storage_bucket, None);
    }

    #[test]
    fn matched_entry_without_api_key_is_malformed() {
        let raw = serde_json::json!({
            "project_info": { "project_id": "p", "project_number": "1" },
            "client": [{
                "client_info": {
                    "mobilesdk_app_id": "app",
                    "android_client_info": { "package_name": "com.example.app" }
                },
                "api_key": []
            }]
        })
        .to_string();
        let err = ConfigResolver::new("com.example.app")
            .resolve_str(&raw)
            .expect_err("empty api_key must fail");
        assert_eq!(
            err,
            ResolutionError::malformed("client[0].api_key is empty")
        );
    }

    #[test]
    fn non_matching_entries_need_only_a_package_name() {
        let raw = serde_json::json!({
            "project_info": { "project_id": "p", "project_number": "1" },
            "client": [
                { "client_info": { "android_client_info": { "package_name": "com.other" } } },
                {
                    "client_info": {
                        "mobilesdk_app_id": "app",
                        "android_client_info": { "package_name": "com.example.app" }
                    },
                    "api_key": [{ "current_key": "key" }]
                }
            ]
        })
        .to_string();
        let creds = ConfigResolver::new("com.example.app")
            .resolve_str(&raw)
            .expect("sparse non-matching entry is fine");
        assert_eq!(creds.api_key, "key");
    }

    #[test]
    fn empty_application_id_is_rejected() {
        let err = ConfigResolver::new("")
            .resolve_str(&two_client_document())
            .expect_err("empty identity must fail");
        assert_eq!(err, ResolutionError::malformed("application id is empty"));
    }
}
