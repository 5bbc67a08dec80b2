use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::{
    Action, Event, Metadata, KEY_ACTION, KEY_DATA, KEY_METADATA, KEY_SITE_ID, KEY_TIMESTAMP,
    KEY_URL, KEY_URL_REF,
};
use crate::clock::Clock;

/// Device and identity fields collected by the host platform
/// (`parsely_site_uuid`, `manufacturer`, `os`, `os_version`, ...).
pub type DeviceInfo = BTreeMap<String, String>;

/// Which site an event is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SiteIdSource {
    /// The site id the tracker was configured with.
    #[default]
    Default,
    Custom(String),
}

/// Turns an action plus its context into a wire-shaped [`Event`].
pub struct EventsBuilder {
    site_id: String,
    device_info: DeviceInfo,
    clock: Arc<dyn Clock>,
}

impl EventsBuilder {
    pub fn new(site_id: impl Into<String>, device_info: DeviceInfo, clock: Arc<dyn Clock>) -> Self {
        Self {
            site_id: site_id.into(),
            device_info,
            clock,
        }
    }

    /// Build an event.
    ///
    /// `extra_data` is copied into the `data` block first, then the device
    /// info and the current timestamp (epoch millis) are layered on top.
    /// `uuid` lands under `pvid` or `vsid` depending on the action.
    #[allow(clippy::too_many_arguments)]
    pub fn build_event(
        &self,
        url: &str,
        url_ref: &str,
        action: Action,
        metadata: Option<&Metadata>,
        extra_data: Option<&Map<String, Value>>,
        uuid: &str,
        site_id: &SiteIdSource,
    ) -> Event {
        tracing::debug!("building {action} event for {url}");

        let mut fields = Map::new();
        fields.insert(KEY_URL.to_string(), Value::from(url));
        fields.insert(KEY_URL_REF.to_string(), Value::from(url_ref));
        let site_id = match site_id {
            SiteIdSource::Default => &self.site_id,
            SiteIdSource::Custom(custom) => custom,
        };
        fields.insert(KEY_SITE_ID.to_string(), Value::from(site_id.as_str()));
        fields.insert(KEY_ACTION.to_string(), Value::from(action.as_str()));

        let mut data = extra_data.cloned().unwrap_or_default();
        data.insert(
            KEY_TIMESTAMP.to_string(),
            Value::from(self.clock.now_millis()),
        );
        for (key, value) in &self.device_info {
            data.insert(key.clone(), Value::from(value.clone()));
        }
        fields.insert(KEY_DATA.to_string(), Value::Object(data));

        if let Some(metadata) = metadata {
            fields.insert(KEY_METADATA.to_string(), Value::Object(metadata.to_map()));
        }
        fields.insert(action.session_key().to_string(), Value::from(uuid));

        Event::new(fields)
    }
}
