use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{DispatcherError, DispatcherResult};

/// Correlation metadata carried by every event flowing through the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub parent_event_id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileList {
    Csv(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEvent {
    #[serde(alias = "type")]
    event_type: Option<String>,
    #[serde(default)]
    context: Option<EventContext>,
    #[serde(default)]
    files: Option<FileList>,
    #[serde(flatten)]
    data: BTreeMap<String, serde_json::Value>,
}

/// A decoded queue payload: the unit of work one dispatch turns into a workload.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    pub event_type: String,
    pub context: EventContext,
    pub files: Vec<String>,
    pub data: BTreeMap<String, serde_json::Value>,
}

impl DispatchEvent {
    /// Decodes a payload.
    ///
    /// Accepts `eventType` (or `type`), an optional `files` field given either
    /// as a comma separated string or as an array, and an optional `context`.
    /// Every other key is kept in `data`. A missing event id is generated; a
    /// missing correlation id starts a new flow rooted at this event.
    pub fn from_payload(payload: &[u8]) -> DispatcherResult<Self> {
        if payload.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DispatcherError::InvalidPayload("消息负载为空".to_string()));
        }

        let raw: RawEvent = serde_json::from_slice(payload)
            .map_err(|e| DispatcherError::InvalidPayload(format!("无法解析事件: {e}")))?;

        let event_type = raw
            .event_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                DispatcherError::InvalidPayload("事件缺少 'eventType' 字段".to_string())
            })?;

        let files = match raw.files {
            Some(FileList::Csv(csv)) => split_files(csv.split(',')),
            Some(FileList::List(list)) => split_files(list.iter().map(String::as_str)),
            None => Vec::new(),
        };

        let mut context = raw.context.unwrap_or_default();
        if context.event_id.is_empty() {
            context.event_id = uuid::Uuid::new_v4().to_string();
        }
        if context.correlation_id.is_empty() {
            context.correlation_id = context.event_id.clone();
        }

        Ok(Self {
            event_type,
            context,
            files,
            data: raw.data,
        })
    }

    /// First eight alphanumeric characters of the event id, lowercased.
    pub fn short_event_id(&self) -> String {
        self.context
            .event_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .take(8)
            .collect::<String>()
            .to_ascii_lowercase()
    }
}

fn split_files<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
