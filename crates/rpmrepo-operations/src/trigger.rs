//! Decoding of blob-created notifications.
//!
//! Notifications follow the Event Grid schema: a single object or an array of
//! objects with `id`, `eventType`, `subject`
//! (`/blobServices/default/containers/{container}/blobs/{key}`) and
//! `data.url`.

use miette::Diagnostic;
use percent_encoding::percent_decode_str;
use rpmrepo_core::RepoLayout;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

const BLOB_CREATED: &str = "Microsoft.Storage.BlobCreated";
const SUBJECT_PREFIX: &str = "/blobServices/default/containers/";

#[derive(Error, Diagnostic, Debug)]
pub enum TriggerError {
    #[error("Invalid trigger payload: {0}")]
    #[diagnostic(
        code(rpmrepo::trigger::json),
        help("Expected an Event Grid event object or an array of them")
    )]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    #[serde(default)]
    pub id: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub data: Option<TriggerData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerData {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Payload {
    Many(Vec<TriggerEvent>),
    One(TriggerEvent),
}

/// What a notification asks the pipeline to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Upload { id: Option<String>, key: String },
    Ignored { id: Option<String>, reason: String },
}

pub fn decode_events(payload: &str) -> Result<Vec<TriggerEvent>, TriggerError> {
    Ok(match serde_json::from_str::<Payload>(payload)? {
        Payload::Many(events) => events,
        Payload::One(event) => vec![event],
    })
}

impl TriggerEvent {
    /// Blob key the event refers to, from the subject or else the URL.
    pub fn blob_key(&self) -> Option<String> {
        self.subject
            .as_deref()
            .and_then(key_from_subject)
            .or_else(|| {
                self.data
                    .as_ref()
                    .and_then(|data| data.url.as_deref())
                    .and_then(key_from_url)
            })
    }

    pub fn route(&self, layout: &RepoLayout) -> Trigger {
        let id = self.id.clone();
        if self.event_type != BLOB_CREATED {
            return Trigger::Ignored {
                id,
                reason: format!("event type `{}`", self.event_type),
            };
        }
        match self.blob_key() {
            Some(key) if layout.is_upload_key(&key) => Trigger::Upload { id, key },
            Some(key) => {
                Trigger::Ignored {
                    id,
                    reason: format!("`{key}` is not an RPM in `{}`", layout.upload_prefix()),
                }
            }
            None => {
                Trigger::Ignored {
                    id,
                    reason: "no blob key in event".to_string(),
                }
            }
        }
    }
}

fn key_from_subject(subject: &str) -> Option<String> {
    let rest = subject.strip_prefix(SUBJECT_PREFIX)?;
    let (_container, key) = rest.split_once("/blobs/")?;
    (!key.is_empty()).then(|| key.to_string())
}

/// `https://account.blob.core.windows.net/{container}/{key}`
fn key_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let path = url.path().trim_start_matches('/');
    let (_container, key) = path.split_once('/')?;
    let key = percent_decode_str(key).decode_utf8().ok()?;
    (!key.is_empty()).then(|| key.into_owned())
}

/// Decodes `payload` and routes every event it contains.
pub fn decode_triggers(payload: &str, layout: &RepoLayout) -> Result<Vec<Trigger>, TriggerError> {
    Ok(decode_events(payload)?
        .iter()
        .map(|event| event.route(layout))
        .collect())
}

#[cfg(test)]
mod tests {
    use rpmrepo_config::policy::LayoutKind;

    use super::*;

    fn layout() -> RepoLayout {
        RepoLayout::new(LayoutKind::Distribution, "upload", "rejected")
    }

    const EVENT: &str = r#"{
        "id": "831e1650-001e-001b-66ab-eeb76e069631",
        "topic": "/subscriptions/x/resourceGroups/y/providers/Microsoft.Storage/storageAccounts/repo",
        "subject": "/blobServices/default/containers/repo/blobs/upload/demo-1.0.0-1.el8.x86_64.rpm",
        "eventType": "Microsoft.Storage.BlobCreated",
        "eventTime": "2024-01-01T00:00:00.000Z",
        "data": {
            "api": "PutBlob",
            "contentType": "application/x-rpm",
            "url": "https://repo.blob.core.windows.net/repo/upload/demo-1.0.0-1.el8.x86_64.rpm"
        },
        "dataVersion": "",
        "metadataVersion": "1"
    }"#;

    #[test]
    fn test_decode_single_event() {
        let triggers = decode_triggers(EVENT, &layout()).unwrap();
        assert_eq!(
            triggers,
            [Trigger::Upload {
                id: Some("831e1650-001e-001b-66ab-eeb76e069631".into()),
                key: "upload/demo-1.0.0-1.el8.x86_64.rpm".into()
            }]
        );
    }

    #[test]
    fn test_decode_array_and_filtering() {
        let payload = r#"[
            {"eventType": "Microsoft.Storage.BlobCreated",
             "subject": "/blobServices/default/containers/repo/blobs/el/8/repodata/repomd.xml"},
            {"eventType": "Microsoft.Storage.BlobDeleted",
             "subject": "/blobServices/default/containers/repo/blobs/upload/a.rpm"},
            {"eventType": "Microsoft.EventGrid.SubscriptionValidationEvent", "data": {}},
            {"eventType": "Microsoft.Storage.BlobCreated",
             "subject": "/blobServices/default/containers/repo/blobs/upload/b.rpm"}
        ]"#;
        let triggers = decode_triggers(payload, &layout()).unwrap();
        assert_eq!(triggers.len(), 4);
        assert!(matches!(triggers[0], Trigger::Ignored { .. }));
        assert!(matches!(triggers[1], Trigger::Ignored { .. }));
        assert!(matches!(triggers[2], Trigger::Ignored { .. }));
        assert_eq!(
            triggers[3],
            Trigger::Upload {
                id: None,
                key: "upload/b.rpm".into()
            }
        );
    }

    #[test]
    fn test_key_from_url_only() {
        let payload = r#"{"eventType": "Microsoft.Storage.BlobCreated",
            "data": {"url": "https://repo.blob.core.windows.net/repo/upload/my%20pkg.rpm"}}"#;
        assert_eq!(
            decode_triggers(payload, &layout()).unwrap(),
            [Trigger::Upload {
                id: None,
                key: "upload/my pkg.rpm".into()
            }]
        );
    }

    #[test]
    fn test_invalid_payload() {
        assert!(matches!(
            decode_events("not json"),
            Err(TriggerError::InvalidJson(_))
        ));
        assert!(decode_events(r#"{"subject": "x"}"#).is_err());
    }

    #[test]
    fn test_key_from_subject() {
        assert_eq!(
            key_from_subject("/blobServices/default/containers/c/blobs/a/b.rpm").as_deref(),
            Some("a/b.rpm")
        );
        assert_eq!(key_from_subject("/blobServices/default/containers/c/blobs/"), None);
        assert_eq!(key_from_subject("/something/else"), None);
    }
}
