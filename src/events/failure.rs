//! # Failure Reporter
//!
//! Converts a retrieval or stream failure into a tagged event instead of an
//! error. The event carries a `firebase_failure` record describing the query
//! and the error plus the standard metadata envelope with `event = "error"`.
//! Failures while handing that event to the sink are logged and swallowed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{error, warn};

use super::event::{Event, EventKind};
use super::normalizer::EventNormalizer;
use super::sink::EventSink;
use crate::constants::{fields, tags};
use crate::error::InputError;
use crate::registry::QuerySpec;

/// Description of one failed retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub query: Map<String, Value>,
    pub query_name: String,
    pub error: String,
    /// Source chain of the error, outermost cause first; may be empty
    pub error_trace: Vec<String>,
    pub runtime_seconds: f64,
}

impl FailureRecord {
    pub fn new(query: &QuerySpec, error: &dyn StdError, elapsed: Duration) -> Self {
        let mut error_trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            error_trace.push(cause.to_string());
            source = cause.source();
        }

        Self {
            query: query.to_stringified_map(),
            query_name: query.name.clone(),
            error: error.to_string(),
            error_trace,
            runtime_seconds: elapsed.as_secs_f64(),
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("query".to_string(), Value::Object(self.query.clone()));
        map.insert(
            "query_name".to_string(),
            Value::String(self.query_name.clone()),
        );
        map.insert("error".to_string(), Value::String(self.error.clone()));
        map.insert(
            "error_trace".to_string(),
            Value::Array(
                self.error_trace
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        // Non-finite runtimes are not representable in JSON
        let runtime = serde_json::Number::from_f64(self.runtime_seconds)
            .map(Value::Number)
            .unwrap_or_else(|| Value::from(0));
        map.insert("runtime_seconds".to_string(), runtime);
        Value::Object(map)
    }
}

/// Builds and emits failure events
#[derive(Debug, Clone)]
pub struct FailureReporter {
    normalizer: EventNormalizer,
}

impl FailureReporter {
    pub fn new(normalizer: EventNormalizer) -> Self {
        Self { normalizer }
    }

    /// Build the failure event for `error`; never fails
    pub fn report(&self, query: &QuerySpec, error: &dyn StdError, elapsed: Duration) -> Event {
        let record = FailureRecord::new(query, error, elapsed);

        let mut event = Event::new();
        event.tag(tags::FAILURE);
        event.set(fields::FAILURE, record.to_value());

        let envelope = self
            .normalizer
            .metadata(query, EventKind::Error, Some(elapsed), None);
        self.normalizer.attach_metadata(&mut event, &envelope);

        warn!(
            query = %query.name,
            path = %query.path,
            error = %record.error,
            runtime_seconds = record.runtime_seconds,
            "🚨 FAILURE: Retrieval failed, emitting failure event"
        );
        event
    }

    /// Build the failure event and hand it to `sink`, swallowing any error
    pub async fn report_and_emit(
        &self,
        sink: &dyn EventSink,
        query: &QuerySpec,
        error: &(dyn StdError + Send + Sync),
        elapsed: Duration,
    ) {
        let event = self.report(query, error, elapsed);
        if let Err(e) = sink.emit(event).await {
            let reporting = InputError::Reporting(format!(
                "could not emit failure event for query '{}': {e}",
                query.name
            ));
            error!(query = %query.name, error = %reporting, "🚨 FAILURE: Dropped failure event");
        }
    }
}
