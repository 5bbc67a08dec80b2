//! Event value model.
//!
//! An [`Event`] is an opaque key/value record. The buffering engine only
//! looks at a handful of fields: the `action` tag, the session uuid
//! (`pvid` or `vsid`) and the nested `data` map whose `ts` it refreshes.
//! Everything else is passed through untouched.
//!
//! Events are values: every "modification" returns a new event and leaves
//! the original (which may already be buffered) as it was.

mod builder;
mod metadata;

pub use builder::{DeviceInfo, EventsBuilder, SiteIdSource};
pub use metadata::{ContentMetadata, Metadata, VideoMetadata};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const KEY_ACTION: &str = "action";
pub const KEY_URL: &str = "url";
pub const KEY_URL_REF: &str = "urlref";
pub const KEY_SITE_ID: &str = "idsite";
pub const KEY_DATA: &str = "data";
pub const KEY_METADATA: &str = "metadata";
pub const KEY_PAGEVIEW_ID: &str = "pvid";
pub const KEY_VIDEO_START_ID: &str = "vsid";
pub const KEY_TIMESTAMP: &str = "ts";
pub const KEY_INCREMENT: &str = "inc";
pub const KEY_TOTAL_TIME: &str = "tt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "pageview")]
    Pageview,
    #[serde(rename = "heartbeat")]
    Heartbeat,
    #[serde(rename = "videostart")]
    VideoStart,
    #[serde(rename = "vheartbeat")]
    VideoHeartbeat,
}

impl Action {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pageview => "pageview",
            Self::Heartbeat => "heartbeat",
            Self::VideoStart => "videostart",
            Self::VideoHeartbeat => "vheartbeat",
        }
    }

    pub const fn is_video(&self) -> bool {
        matches!(self, Self::VideoStart | Self::VideoHeartbeat)
    }

    /// Field under which events of this action carry their session uuid.
    pub const fn session_key(&self) -> &'static str {
        if self.is_video() {
            KEY_VIDEO_START_ID
        } else {
            KEY_PAGEVIEW_ID
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pageview" => Ok(Self::Pageview),
            "heartbeat" => Ok(Self::Heartbeat),
            "videostart" => Ok(Self::VideoStart),
            "vheartbeat" => Ok(Self::VideoHeartbeat),
            other => Err(format!("unknown event action: {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn action(&self) -> Option<Action> {
        self.get(KEY_ACTION)?.as_str()?.parse().ok()
    }

    /// Session uuid this event belongs to, if any.
    pub fn session_id(&self) -> Option<&str> {
        let key = self.action()?.session_key();
        self.get(key)?.as_str()
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.get(KEY_DATA)?.as_object()
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.get(KEY_METADATA)?.as_object()
    }

    /// Copy of this event with one top-level field replaced.
    pub fn with_field(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut fields = self.0.clone();
        fields.insert(key.to_string(), value.into());
        Self(fields)
    }

    /// Copy of this event with one field of the nested `data` map replaced.
    /// A missing or non-object `data` entry is replaced by a fresh map.
    pub fn with_data_field(&self, key: &str, value: impl Into<Value>) -> Self {
        let mut data = self.data().cloned().unwrap_or_default();
        data.insert(key.to_string(), value.into());
        self.with_field(KEY_DATA, Value::Object(data))
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Drops exact structural duplicates, keeping the first occurrence of each
/// event in order.
///
/// Semantically equal events that differ in any field (a timestamp, say)
/// are both kept.
pub fn dedupe(events: impl IntoIterator<Item = Event>) -> Vec<Event> {
    let mut unique: Vec<Event> = Vec::new();
    for event in events {
        if !unique.contains(&event) {
            unique.push(event);
        }
    }
    unique
}
