//! Attribute containers: the typed records a store persists.
//!
//! A container carries its type tag (`CONTAINER_TYPE`), an optional
//! [`Identifier`] assigned by the store that persisted it, and a set of named
//! fields. The identifier is never serialized; stores key containers by it.

use crate::core::identifiers::Identifier;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

pub const CONTAINER_TYPE_ANALYSIS_REPORT: &str = "analysis_report";
pub const CONTAINER_TYPE_EVENT: &str = "event";
pub const CONTAINER_TYPE_EVENT_DATA: &str = "event_data";
pub const CONTAINER_TYPE_EVENT_SOURCE: &str = "event_source";
pub const CONTAINER_TYPE_EVENT_TAG: &str = "event_tag";
pub const CONTAINER_TYPE_EXTRACTION_WARNING: &str = "extraction_warning";
pub const CONTAINER_TYPE_SESSION_COMPLETION: &str = "session_completion";
pub const CONTAINER_TYPE_SESSION_START: &str = "session_start";
pub const CONTAINER_TYPE_TASK_COMPLETION: &str = "task_completion";
pub const CONTAINER_TYPE_TASK_START: &str = "task_start";

pub const CONTAINER_TYPES: &[&str] = &[
    CONTAINER_TYPE_ANALYSIS_REPORT,
    CONTAINER_TYPE_EVENT,
    CONTAINER_TYPE_EVENT_DATA,
    CONTAINER_TYPE_EVENT_SOURCE,
    CONTAINER_TYPE_EVENT_TAG,
    CONTAINER_TYPE_EXTRACTION_WARNING,
    CONTAINER_TYPE_SESSION_COMPLETION,
    CONTAINER_TYPE_SESSION_START,
    CONTAINER_TYPE_TASK_COMPLETION,
    CONTAINER_TYPE_TASK_START,
];

pub trait AttributeContainer: Serialize + DeserializeOwned + 'static {
    const CONTAINER_TYPE: &'static str;

    fn identifier(&self) -> Option<&Identifier>;

    fn set_identifier(&mut self, identifier: Identifier);
}

macro_rules! attribute_container {
    ($name:ident, $container_type:expr) => {
        impl AttributeContainer for $name {
            const CONTAINER_TYPE: &'static str = $container_type;

            fn identifier(&self) -> Option<&Identifier> {
                self.identifier.as_ref()
            }

            fn set_identifier(&mut self, identifier: Identifier) {
                self.identifier = Some(identifier);
            }
        }
    };
}

/// A point on the timeline. Descriptive attributes live in the referenced [`EventData`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventObject {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    /// Microseconds since the Unix epoch.
    pub timestamp: i64,
    pub timestamp_desc: String,
    pub event_data_identifier: Option<Identifier>,
}

impl EventObject {
    pub fn new(timestamp: i64, timestamp_desc: &str) -> Self {
        Self {
            timestamp,
            timestamp_desc: timestamp_desc.to_string(),
            ..Default::default()
        }
    }

    pub fn set_event_data_identifier(&mut self, identifier: Identifier) {
        self.event_data_identifier = Some(identifier);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub data_type: String,
    pub parser: Option<String>,
    /// Parser-specific attributes, kept apart from the fixed fields so any
    /// attribute name is allowed.
    #[serde(default)]
    pub attributes: BTreeMap<String, JsonValue>,
}

impl EventData {
    pub fn new(data_type: &str) -> Self {
        Self {
            data_type: data_type.to_string(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<JsonValue>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTag {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub event_identifier: Option<Identifier>,
    pub labels: Vec<String>,
    pub comment: Option<String>,
}

impl EventTag {
    pub fn add_label(&mut self, label: &str) {
        if !self.labels.iter().any(|existing| existing == label) {
            self.labels.push(label.to_string());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSource {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub data_type: String,
    pub path_spec: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionWarning {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub message: String,
    pub parser_chain: Option<String>,
    pub path_spec: Option<String>,
}

impl ExtractionWarning {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub plugin_name: String,
    pub text: Option<String>,
    pub time_compiled: Option<i64>,
    pub analysis_counter: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStart {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub session_identifier: String,
    pub timestamp: i64,
    pub product_name: String,
    pub product_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionCompletion {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub session_identifier: String,
    pub timestamp: i64,
    pub aborted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStart {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub task_identifier: String,
    pub session_identifier: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    #[serde(skip)]
    pub identifier: Option<Identifier>,
    pub task_identifier: String,
    pub session_identifier: String,
    pub timestamp: i64,
    pub aborted: bool,
}

attribute_container!(AnalysisReport, CONTAINER_TYPE_ANALYSIS_REPORT);
attribute_container!(EventObject, CONTAINER_TYPE_EVENT);
attribute_container!(EventData, CONTAINER_TYPE_EVENT_DATA);
attribute_container!(EventSource, CONTAINER_TYPE_EVENT_SOURCE);
attribute_container!(EventTag, CONTAINER_TYPE_EVENT_TAG);
attribute_container!(ExtractionWarning, CONTAINER_TYPE_EXTRACTION_WARNING);
attribute_container!(SessionCompletion, CONTAINER_TYPE_SESSION_COMPLETION);
attribute_container!(SessionStart, CONTAINER_TYPE_SESSION_START);
attribute_container!(TaskCompletion, CONTAINER_TYPE_TASK_COMPLETION);
attribute_container!(TaskStart, CONTAINER_TYPE_TASK_START);
