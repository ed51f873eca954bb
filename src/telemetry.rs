//! Telemetry items and the batches posted to the live metrics service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of a telemetry item, matching the service's JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Metric,
    Request,
    Dependency,
    Exception,
    Event,
    Trace,
}

impl std::fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryKind::Metric => write!(f, "metric"),
            TelemetryKind::Request => write!(f, "request"),
            TelemetryKind::Dependency => write!(f, "dependency"),
            TelemetryKind::Exception => write!(f, "exception"),
            TelemetryKind::Event => write!(f, "event"),
            TelemetryKind::Trace => write!(f, "trace"),
        }
    }
}

/// A single telemetry item recorded by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryItem {
    /// Client-generated item ID
    pub id: Uuid,

    /// When the item was recorded
    pub timestamp: DateTime<Utc>,

    pub kind: TelemetryKind,

    /// Metric name, operation name, or message text
    pub name: String,

    /// Numeric value (metric value, duration in ms, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Additional structured properties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<HashMap<String, serde_json::Value>>,
}

impl TelemetryItem {
    pub fn new(kind: TelemetryKind, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            name: name.into(),
            value: None,
            properties: None,
        }
    }

    /// Shorthand for a metric sample.
    pub fn metric(name: impl Into<String>, value: f64) -> Self {
        Self::new(TelemetryKind::Metric, name).with_value(value)
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Add a single property, creating the map on first use.
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A batch of telemetry items prepared for one post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryBatch {
    /// Client-generated batch ID
    pub batch_id: Uuid,

    /// When the batch was prepared
    pub created_at: DateTime<Utc>,

    /// Instance name of the agent sending the batch
    pub source: String,

    pub items: Vec<TelemetryItem>,

    /// Endpoint the batch was prepared for; `None` targets the default.
    #[serde(skip)]
    pub endpoint: Option<String>,
}

impl TelemetryBatch {
    pub fn new(
        items: Vec<TelemetryItem>,
        source: impl Into<String>,
        endpoint: Option<String>,
    ) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            source: source.into(),
            items,
            endpoint,
        }
    }

    /// Get the number of items in the batch.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
