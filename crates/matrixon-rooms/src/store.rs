//! In-memory event store
//!
//! Backs the CLI fixtures and the tests. Production deployments plug their
//! persistent store in through the same [`EventStore`] trait.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use ruma::{EventId, OwnedEventId};
use tracing::debug;

use matrixon_core::{traits::EventStore, Event, Result};

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<OwnedEventId, Arc<Event>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        for event in events {
            store.insert(event);
        }
        store
    }

    /// Adds an event, replacing any event with the same id
    pub fn insert(&self, event: Event) -> Arc<Event> {
        let event = Arc::new(event);
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.event_id.clone(), Arc::clone(&event));
        event
    }

    pub fn remove(&self, event_id: &EventId) -> Option<Arc<Event>> {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_id)
    }

    pub fn contains(&self, event_id: &EventId) -> bool {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn get_events(&self, event_ids: &[OwnedEventId]) -> Result<Vec<Arc<Event>>> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let found: Vec<_> = event_ids
            .iter()
            .filter_map(|id| events.get(id).cloned())
            .collect();
        debug!(requested = event_ids.len(), found = found.len(), "Memory store lookup");
        Ok(found)
    }
}
