//! Event tracking contract and implementations.

use crate::error::AnalyticsError;
use async_trait::async_trait;
use caseflow_core::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, instrument};

/// An event accepted by a tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub name: String,
    pub properties: Map<String, JsonValue>,
    pub tracked_at: DateTime<Utc>,
}

impl TrackedEvent {
    /// Validates the name and properties and stamps the event.
    ///
    /// `null` properties are treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the properties are not an
    /// object.
    pub fn new(name: &str, properties: JsonValue) -> Result<Self, AnalyticsError> {
        if name.trim().is_empty() {
            return Err(AnalyticsError::EmptyEventName.into());
        }
        let properties = match properties {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            _ => {
                return Err(AnalyticsError::InvalidProperties {
                    event: name.to_string(),
                }
                .into());
            }
        };
        Ok(Self {
            name: name.to_string(),
            properties,
            tracked_at: Utc::now(),
        })
    }
}

/// Metrics capability used by workflow actions.
#[async_trait]
pub trait Analytics: Send + Sync {
    /// Records a named event with a JSON object of properties.
    async fn track_event(&self, name: &str, properties: JsonValue) -> Result<(), AnalyticsError>;
}

/// Keeps tracked events in memory. Cloning shares the event list.
#[derive(Debug, Clone, Default)]
pub struct RecordingAnalytics {
    events: Arc<Mutex<Vec<TrackedEvent>>>,
}

impl RecordingAnalytics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<TrackedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of events recorded under `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.name == name)
            .count()
    }
}

#[async_trait]
impl Analytics for RecordingAnalytics {
    async fn track_event(&self, name: &str, properties: JsonValue) -> Result<(), AnalyticsError> {
        let event = TrackedEvent::new(name, properties)?;
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

/// Writes tracked events to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAnalytics;

#[async_trait]
impl Analytics for TracingAnalytics {
    #[instrument(skip(self, properties))]
    async fn track_event(&self, name: &str, properties: JsonValue) -> Result<(), AnalyticsError> {
        let event = TrackedEvent::new(name, properties)?;
        info!(
            event = %event.name,
            properties = %JsonValue::Object(event.properties),
            "tracked"
        );
        Ok(())
    }
}
