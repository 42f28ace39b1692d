//! Lifecycle events announced to the message bus.
//!
//! The bus itself is external; the manager only hands named payloads to an
//! [`EventSink`].

use crate::error::ErrorKind;
use crate::types::AppstoreId;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::info;

/// Event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "skill.sync.started")]
    SyncStarted,
    #[serde(rename = "skill.sync.completed")]
    SyncCompleted,
    #[serde(rename = "skill.state.changed")]
    StateChanged,
    #[serde(rename = "skill.store.enabled")]
    StoreEnabled,
    #[serde(rename = "skill.store.disabled")]
    StoreDisabled,
    #[serde(rename = "skill.store.priority.changed")]
    StorePriorityChanged,
    #[serde(rename = "skill.store.token.changed")]
    StoreTokenChanged,
    #[serde(rename = "skill.store.sync.started")]
    StoreSyncStarted,
    #[serde(rename = "skill.store.sync.finished")]
    StoreSyncFinished,
    #[serde(rename = "skill.store.sync.failed")]
    StoreSyncFailed,
    #[serde(rename = "skill.search.started")]
    SearchStarted,
    #[serde(rename = "skill.search.finished")]
    SearchFinished,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncStarted => "skill.sync.started",
            Self::SyncCompleted => "skill.sync.completed",
            Self::StateChanged => "skill.state.changed",
            Self::StoreEnabled => "skill.store.enabled",
            Self::StoreDisabled => "skill.store.disabled",
            Self::StorePriorityChanged => "skill.store.priority.changed",
            Self::StoreTokenChanged => "skill.store.token.changed",
            Self::StoreSyncStarted => "skill.store.sync.started",
            Self::StoreSyncFinished => "skill.store.sync.finished",
            Self::StoreSyncFailed => "skill.store.sync.failed",
            Self::SearchStarted => "skill.search.started",
            Self::SearchFinished => "skill.search.finished",
        }
    }
}

/// Payload for skill.sync.started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStartedPayload {
    pub pass_id: String,
    pub sources: Vec<AppstoreId>,
    pub new_only: bool,
    pub merge: bool,
}

/// Payload for skill.sync.completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncCompletedPayload {
    pub pass_id: String,
    pub sources_failed: Vec<AppstoreId>,
    pub catalog_size: usize,
}

/// Payload for skill.state.changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedPayload {
    pub name: String,
    pub hash: String,
}

/// Payload for skill.store.enabled, skill.store.disabled and
/// skill.store.token.changed. Tokens are never carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePayload {
    pub appstore: AppstoreId,
}

/// Payload for skill.store.priority.changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorePriorityPayload {
    pub appstore: AppstoreId,
    pub priority: i64,
}

/// Payload for skill.store.sync.finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSyncFinishedPayload {
    pub appstore: AppstoreId,
    pub fetched: usize,
    pub adopted: usize,
    pub rejected: usize,
}

/// Payload for skill.store.sync.failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSyncFailedPayload {
    pub appstore: AppstoreId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Payload for skill.search.started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStartedPayload {
    pub field: String,
    pub query: String,
}

/// Payload for skill.search.finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFinishedPayload {
    pub field: String,
    pub query: String,
    pub count: usize,
}

/// Union type for all event payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    SyncStarted(SyncStartedPayload),
    SyncCompleted(SyncCompletedPayload),
    StateChanged(StateChangedPayload),
    StoreEnabled(StorePayload),
    StoreDisabled(StorePayload),
    StorePriorityChanged(StorePriorityPayload),
    StoreTokenChanged(StorePayload),
    StoreSyncStarted(StorePayload),
    StoreSyncFinished(StoreSyncFinishedPayload),
    StoreSyncFailed(StoreSyncFailedPayload),
    SearchStarted(SearchStartedPayload),
    SearchFinished(SearchFinishedPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::SyncStarted(_) => EventType::SyncStarted,
            Self::SyncCompleted(_) => EventType::SyncCompleted,
            Self::StateChanged(_) => EventType::StateChanged,
            Self::StoreEnabled(_) => EventType::StoreEnabled,
            Self::StoreDisabled(_) => EventType::StoreDisabled,
            Self::StorePriorityChanged(_) => EventType::StorePriorityChanged,
            Self::StoreTokenChanged(_) => EventType::StoreTokenChanged,
            Self::StoreSyncStarted(_) => EventType::StoreSyncStarted,
            Self::StoreSyncFinished(_) => EventType::StoreSyncFinished,
            Self::StoreSyncFailed(_) => EventType::StoreSyncFailed,
            Self::SearchStarted(_) => EventType::SearchStarted,
            Self::SearchFinished(_) => EventType::SearchFinished,
        }
    }

    pub fn name(&self) -> &'static str {
        self.event_type().as_str()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Destination for lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EventPayload);
}

/// Logs every event at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EventPayload) {
        let payload = event.to_json().unwrap_or_default();
        info!(event = event.name(), %payload, "lifecycle event");
    }
}

/// Records events in memory, for tests and embedders that poll.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EventPayload>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventPayload> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(EventPayload::name).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: EventPayload) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serializes_dotted() {
        assert_eq!(
            serde_json::to_string(&EventType::StateChanged).unwrap(),
            "\"skill.state.changed\""
        );
        assert_eq!(EventType::SyncCompleted.as_str(), "skill.sync.completed");
    }

    #[test]
    fn sync_completed_payload_lists_failed_sources() {
        let payload = EventPayload::SyncCompleted(SyncCompletedPayload {
            pass_id: "p1".into(),
            sources_failed: vec![AppstoreId::Neon],
            catalog_size: 3,
        });
        let json = payload.to_json().unwrap();
        assert!(json.contains("\"sources_failed\":[\"neon\"]"));
        assert_eq!(payload.name(), "skill.sync.completed");
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.emit(EventPayload::StoreEnabled(StorePayload {
            appstore: AppstoreId::Pling,
        }));
        sink.emit(EventPayload::StateChanged(StateChangedPayload {
            name: "demo".into(),
            hash: "abc".into(),
        }));
        assert_eq!(sink.names(), vec!["skill.store.enabled", "skill.state.changed"]);
    }
}
