//! The canonical event emitted for every retrieval outcome.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::constants::fields;

/// How the data in an event was produced
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Scheduled single-shot fetch
    Get,
    /// Streamed replacement of a location
    Put,
    /// Streamed partial update of a location
    Patch,
    /// Retrieval failure
    Error,
    /// Any other streamed event name
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Get => "get",
            EventKind::Put => "put",
            EventKind::Patch => "patch",
            EventKind::Error => "error",
            EventKind::Other(name) => name,
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            "get" => EventKind::Get,
            "put" => EventKind::Put,
            "patch" => EventKind::Patch,
            "error" => EventKind::Error,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventKind::from(name.as_str()))
    }
}

/// A JSON object handed to the sink
///
/// Events are built by the normaliser or failure reporter and are not
/// modified after emission; ownership moves into the sink.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Add a tag unless already present
    pub fn tag(&mut self, tag: &str) {
        let tags = self
            .fields
            .entry(fields::TAGS)
            .or_insert_with(|| Value::Array(Vec::new()));

        if !tags.is_array() {
            // Keep a scalar `tags` value from the data as the first tag
            let existing = std::mem::take(tags);
            *tags = Value::Array(vec![existing]);
        }
        if let Value::Array(list) = tags {
            if !list.iter().any(|t| t.as_str() == Some(tag)) {
                list.push(Value::String(tag.to_string()));
            }
        }
    }

    pub fn tags(&self) -> Vec<&str> {
        match self.fields.get(fields::TAGS) {
            Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().contains(&tag)
    }

    /// Event body without the given metadata field
    pub fn body(&self, metadata_field: Option<&str>) -> Map<String, Value> {
        let mut body = self.fields.clone();
        if let Some(field) = metadata_field {
            body.remove(field);
        }
        body
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_round_trips_names() {
        for name in ["get", "put", "patch", "error", "keep-alive"] {
            assert_eq!(EventKind::from(name).as_str(), name);
        }
        assert_eq!(EventKind::from("put"), EventKind::Put);
        assert_eq!(
            serde_json::to_value(EventKind::Patch).unwrap(),
            json!("patch")
        );
    }

    #[test]
    fn test_tagging_is_idempotent() {
        let mut event = Event::new();
        event.tag("_firebasefailure");
        event.tag("_firebasefailure");

        assert_eq!(event.tags(), vec!["_firebasefailure"]);
        assert!(event.has_tag("_firebasefailure"));
    }

    #[test]
    fn test_tagging_preserves_scalar_tags_field() {
        let mut event = Event::new();
        event.set("tags", json!("existing"));
        event.tag("new");

        assert_eq!(event.tags(), vec!["existing", "new"]);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let mut event = Event::new();
        event.set("name", json!("x"));
        assert_eq!(event.to_json().unwrap(), r#"{"name":"x"}"#);
    }
}
