//! Resolution fixtures
//!
//! A fixture is a JSON document holding a room's events and the state maps
//! to resolve:
//!
//! ```json
//! {
//!   "room_id": "!room:example.org",
//!   "events": [ { "event_id": "$create", "type": "m.room.create", ... } ],
//!   "state_maps": [ [ { "type": "m.room.create", "state_key": "", "event_id": "$create" } ] ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use ruma::{EventId, OwnedRoomId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use matrixon_core::{Event, MatrixonError, Result, StateMap};
use matrixon_rooms::MemoryEventStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub room_id: OwnedRoomId,
    #[serde(default)]
    pub events: Vec<Event>,
    pub state_maps: Vec<StateMap>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self> {
        let fixture: Self = serde_json::from_str(json)?;
        debug!(
            room_id = %fixture.room_id,
            events = fixture.events.len(),
            state_maps = fixture.state_maps.len(),
            "Fixture parsed"
        );
        Ok(fixture)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MatrixonError::NotFound(format!("cannot read fixture {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// A store holding every fixture event
    pub fn store(&self) -> Arc<MemoryEventStore> {
        Arc::new(MemoryEventStore::from_events(self.events.iter().cloned()))
    }

    pub fn event(&self, event_id: &EventId) -> Result<&Event> {
        self.events
            .iter()
            .find(|event| event.event_id.as_str() == event_id.as_str())
            .ok_or_else(|| MatrixonError::NotFound(format!("event {} is not in the fixture", event_id)))
    }

    /// The state single events are checked against
    pub fn first_state_map(&self) -> Result<&StateMap> {
        self.state_maps
            .first()
            .ok_or_else(|| MatrixonError::InvalidEvent("fixture has no state maps".into()))
    }
}
