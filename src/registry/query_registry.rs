//! Named query specifications and the registry that owns them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ConfigResult, ConfigurationError, InputConfig};

/// One named reference into the remote database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub name: String,
    pub path: String,
    #[serde(rename = "orderBy", skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(rename = "limitToFirst", skip_serializing_if = "Option::is_none")]
    pub limit_to_first: Option<i64>,
}

impl QuerySpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            order_by: None,
            limit_to_first: None,
        }
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_limit_to_first(mut self, limit: i64) -> Self {
        self.limit_to_first = Some(limit);
        self
    }

    /// The query as configured, keyed by option name, for event metadata
    pub fn to_stringified_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("path".to_string(), Value::String(self.path.clone()));
        if let Some(order_by) = &self.order_by {
            map.insert("orderBy".to_string(), Value::String(order_by.clone()));
        }
        if let Some(limit) = self.limit_to_first {
            map.insert("limitToFirst".to_string(), Value::from(limit));
        }
        map
    }
}

/// Immutable collection of uniquely named queries
#[derive(Debug, Clone, Default)]
pub struct QueryRegistry {
    queries: Vec<Arc<QuerySpec>>,
}

impl QueryRegistry {
    /// Build a registry, rejecting duplicate names and empty paths
    pub fn from_specs(specs: Vec<QuerySpec>) -> ConfigResult<Self> {
        let mut seen = HashSet::new();
        let mut queries = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.path.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("refs.{}.path", spec.name),
                    spec.path,
                    "path must not be empty",
                ));
            }
            if !seen.insert(spec.name.clone()) {
                return Err(ConfigurationError::invalid_value(
                    "refs",
                    spec.name,
                    "query names must be unique",
                ));
            }
            debug!(query = %spec.name, path = %spec.path, "📚 REGISTRY: Registered query");
            queries.push(Arc::new(spec));
        }

        Ok(Self { queries })
    }

    /// Build the registry from the `refs` option
    pub fn from_config(config: &InputConfig) -> ConfigResult<Self> {
        let specs = config
            .refs
            .iter()
            .map(|(name, reference)| QuerySpec {
                name: name.clone(),
                path: reference.path.clone(),
                order_by: reference.order_by.clone(),
                limit_to_first: reference.limit_to_first,
            })
            .collect();
        Self::from_specs(specs)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<QuerySpec>> {
        self.queries.iter().find(|query| query.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<QuerySpec>> {
        self.queries.iter()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.queries.iter().map(|query| query.name.as_str()).collect()
    }
}
