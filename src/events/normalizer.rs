//! # Event Normalizer
//!
//! Turns a retrieved value into the canonical event shape. Scalars are wrapped
//! as `{"value": scalar}`, objects are used as-is; the result becomes the event
//! root or is nested under the configured `target` field. A metadata envelope
//! describing where the data came from is attached under `metadata_target`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::event::{Event, EventKind};
use crate::config::InputConfig;
use crate::constants::fields;
use crate::registry::QuerySpec;

/// Provenance attached to every emitted event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEnvelope {
    pub host: String,
    pub event: EventKind,
    pub query_name: String,
    pub query: Map<String, Value>,
    /// Wall-clock fetch time; `None` for streamed data
    pub runtime_seconds: Option<f64>,
    /// Location of a streamed change relative to the subscribed path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Builds events from retrieved values
#[derive(Debug, Clone)]
pub struct EventNormalizer {
    host: String,
    target: Option<String>,
    metadata_target: Option<String>,
}

impl EventNormalizer {
    pub fn new(
        host: impl Into<String>,
        target: Option<String>,
        metadata_target: Option<String>,
    ) -> Self {
        Self {
            host: host.into(),
            target,
            metadata_target,
        }
    }

    pub fn from_config(config: &InputConfig) -> Self {
        Self::new(
            config.resolved_host(),
            config.target.clone(),
            config.metadata_field().map(str::to_string),
        )
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn metadata_target(&self) -> Option<&str> {
        self.metadata_target.as_deref()
    }

    /// Wrap non-object values as `{"value": data}`
    pub fn wrap(data: Value) -> Map<String, Value> {
        match data {
            Value::Object(map) => map,
            scalar => {
                let mut map = Map::new();
                map.insert(fields::VALUE.to_string(), scalar);
                map
            }
        }
    }

    /// Build the event for one retrieved value
    pub fn normalize(
        &self,
        query: &QuerySpec,
        kind: EventKind,
        data: Value,
        elapsed: Option<Duration>,
    ) -> Event {
        self.normalize_at(query, kind, data, elapsed, None)
    }

    /// Like `normalize`, recording the stream-relative path of the change
    pub fn normalize_at(
        &self,
        query: &QuerySpec,
        kind: EventKind,
        data: Value,
        elapsed: Option<Duration>,
        path: Option<&str>,
    ) -> Event {
        let wrapped = Self::wrap(data);

        let mut event = match &self.target {
            Some(target) => {
                let mut event = Event::new();
                event.set(target.clone(), Value::Object(wrapped));
                event
            }
            None => Event::from_fields(wrapped),
        };

        let envelope = self.metadata(query, kind, elapsed, path);
        self.attach_metadata(&mut event, &envelope);
        event
    }

    /// Build the metadata envelope for a query outcome
    pub fn metadata(
        &self,
        query: &QuerySpec,
        kind: EventKind,
        elapsed: Option<Duration>,
        path: Option<&str>,
    ) -> MetadataEnvelope {
        MetadataEnvelope {
            host: self.host.clone(),
            event: kind,
            query_name: query.name.clone(),
            query: query.to_stringified_map(),
            runtime_seconds: elapsed.map(|d| d.as_secs_f64()),
            path: path.map(str::to_string),
        }
    }

    /// Place the envelope under the metadata field; no-op when disabled
    pub fn attach_metadata(&self, event: &mut Event, envelope: &MetadataEnvelope) {
        let Some(field) = &self.metadata_target else {
            return;
        };
        match serde_json::to_value(envelope) {
            Ok(value) => event.set(field.clone(), value),
            Err(e) => tracing::warn!(
                query = %envelope.query_name,
                error = %e,
                "📦 NORMALIZER: Could not serialize metadata envelope"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn normalizer(target: Option<&str>) -> EventNormalizer {
        EventNormalizer::new(
            "test-host",
            target.map(str::to_string),
            Some("@metadata".to_string()),
        )
    }

    fn query() -> QuerySpec {
        QuerySpec::new("u", "/u")
    }

    #[test]
    fn test_object_data_becomes_event_root() {
        let event = normalizer(None).normalize(
            &query(),
            EventKind::Get,
            json!({ "name": "x" }),
            Some(Duration::from_millis(250)),
        );

        assert_eq!(event.get("name"), Some(&json!("x")));
        let metadata = event.get("@metadata").unwrap();
        assert_eq!(metadata["event"], "get");
        assert_eq!(metadata["query_name"], "u");
        assert_eq!(metadata["host"], "test-host");
        assert_eq!(metadata["query"], json!({ "path": "/u" }));
        assert_eq!(metadata["runtime_seconds"], json!(0.25));
        assert!(metadata.get("path").is_none());
    }

    #[test]
    fn test_scalar_is_wrapped() {
        let event = normalizer(None).normalize(&query(), EventKind::Get, json!(42), None);
        assert_eq!(event.body(Some("@metadata")), EventNormalizer::wrap(json!(42)));
        assert_eq!(event.get("value"), Some(&json!(42)));
    }

    #[test]
    fn test_null_is_wrapped() {
        let event = normalizer(None).normalize(&query(), EventKind::Put, Value::Null, None);
        assert_eq!(event.get("value"), Some(&Value::Null));
    }

    #[test]
    fn test_target_nests_data() {
        let event = normalizer(Some("firebase")).normalize(
            &query(),
            EventKind::Get,
            json!(42),
            None,
        );

        assert_eq!(event.get("firebase"), Some(&json!({ "value": 42 })));
        assert!(event.get("value").is_none());
        assert!(event.contains("@metadata"));
    }

    #[test]
    fn test_streamed_metadata_has_null_runtime_and_path() {
        let event = normalizer(None).normalize_at(
            &query(),
            EventKind::Put,
            json!({ "v": 1 }),
            None,
            Some("/child"),
        );

        let metadata = event.get("@metadata").unwrap();
        assert_eq!(metadata["event"], "put");
        assert_eq!(metadata["runtime_seconds"], Value::Null);
        assert_eq!(metadata["path"], "/child");
    }

    #[test]
    fn test_disabled_metadata() {
        let normalizer = EventNormalizer::new("h", None, None);
        let event = normalizer.normalize(&query(), EventKind::Get, json!({ "a": 1 }), None);
        assert_eq!(Value::Object(event.into_fields()), json!({ "a": 1 }));
    }

    proptest! {
        #[test]
        fn prop_object_normalisation_is_stable(key in "[a-z]{1,8}", n in any::<i64>()) {
            let data = json!({ key.clone(): n });
            let normalizer = normalizer(None);

            let first = normalizer.normalize(&query(), EventKind::Get, data.clone(), None);
            let second = normalizer.normalize(&query(), EventKind::Get, data.clone(), None);

            prop_assert_eq!(first.body(Some("@metadata")), second.body(Some("@metadata")));
            prop_assert_eq!(Value::Object(first.body(Some("@metadata"))), data);
        }
    }
}
