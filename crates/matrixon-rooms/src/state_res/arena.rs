//! Prefetched event graph
//!
//! Resolution runs over an arena loaded up front, addressed by event id. All
//! walks over `auth_events` use explicit worklists with a visited set; the
//! arena refuses graphs containing a cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ruma::{EventId, OwnedEventId, RoomId};
use tracing::{debug, instrument};

use matrixon_core::{traits::EventStore, Event, MatrixonError, Result};

#[derive(Debug, Clone, Default)]
pub struct EventArena {
    events: HashMap<OwnedEventId, Arc<Event>>,
    max_depth: usize,
}

impl EventArena {
    pub fn new(max_depth: usize) -> Self {
        Self {
            events: HashMap::new(),
            max_depth,
        }
    }

    pub fn from_events(events: impl IntoIterator<Item = Arc<Event>>, max_depth: usize) -> Self {
        let mut arena = Self::new(max_depth);
        for event in events {
            arena.insert(event);
        }
        arena
    }

    /// Loads `roots` and their whole auth closure from the store, then checks
    /// the loaded graph for cycles.
    #[instrument(skip(store, roots), fields(roots = roots.len()))]
    pub async fn load(
        store: &dyn EventStore,
        roots: &[OwnedEventId],
        batch_size: usize,
        max_depth: usize,
    ) -> Result<Self> {
        let events = store.auth_chain_closure(roots, batch_size, max_depth).await?;
        let arena = Self::from_events(events, max_depth);
        arena.verify_acyclic()?;
        debug!(events = arena.len(), "Event arena loaded");
        Ok(arena)
    }

    pub fn insert(&mut self, event: Arc<Event>) {
        self.events.insert(event.event_id.clone(), event);
    }

    /// Looks up an event that must be present
    pub fn get(&self, event_id: &EventId) -> Result<&Arc<Event>> {
        self.events
            .get(event_id)
            .ok_or_else(|| MatrixonError::fetch(event_id, "event missing from prefetched graph"))
    }

    pub fn contains(&self, event_id: &EventId) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.events.values()
    }

    /// Fails unless every event belongs to `room_id`
    pub fn ensure_single_room(&self, room_id: &RoomId) -> Result<()> {
        let mut foreign: Vec<&Arc<Event>> =
            self.events.values().filter(|e| e.room_id.as_str() != room_id.as_str()).collect();
        foreign.sort_by(|a, b| a.event_id.as_str().cmp(b.event_id.as_str()));
        match foreign.first() {
            Some(event) => Err(MatrixonError::InvalidEvent(format!(
                "event {} belongs to {}, not {}",
                event.event_id, event.room_id, room_id
            ))),
            None => Ok(()),
        }
    }

    /// Transitive `auth_events` ancestors of `event_id`, excluding itself
    pub fn auth_chain(&self, event_id: &EventId) -> Result<HashSet<OwnedEventId>> {
        let mut found = HashSet::new();
        let mut todo: Vec<&OwnedEventId> = self.get(event_id)?.auth_events.iter().collect();

        while let Some(auth_id) = todo.pop() {
            if !found.insert(auth_id.clone()) {
                continue;
            }
            let auth_event = self.get(auth_id)?;
            todo.extend(auth_event.auth_events.iter().filter(|id| !found.contains(*id)));
        }

        Ok(found)
    }

    /// The first event referenced by `event.auth_events` occupying
    /// `(kind, state_key)`
    pub fn find_auth_event(
        &self,
        event: &Event,
        kind: &str,
        state_key: &str,
    ) -> Result<Option<&Arc<Event>>> {
        for auth_id in &event.auth_events {
            let auth_event = self.get(auth_id)?;
            if auth_event.is_type_and_key(kind, state_key) {
                return Ok(Some(auth_event));
            }
        }
        Ok(None)
    }

    /// Depth-first walk over every `auth_events` edge. A back edge is a
    /// cycle; a path longer than the depth bound is treated the same way.
    pub fn verify_acyclic(&self) -> Result<()> {
        let mut roots: Vec<&Arc<Event>> = self.events.values().collect();
        roots.sort_by(|a, b| a.event_id.as_str().cmp(b.event_id.as_str()));

        let mut finished: HashSet<&EventId> = HashSet::new();
        let mut on_path: HashSet<&EventId> = HashSet::new();

        for root in roots {
            if finished.contains(&*root.event_id) {
                continue;
            }

            let mut stack: Vec<(&Arc<Event>, usize)> = vec![(root, 0)];
            on_path.insert(&root.event_id);

            while let Some(top) = stack.last_mut() {
                let event = top.0;
                let next = top.1;
                top.1 += 1;

                let Some(auth_id) = event.auth_events.get(next) else {
                    stack.pop();
                    on_path.remove(&*event.event_id);
                    finished.insert(&event.event_id);
                    continue;
                };

                if on_path.contains(&**auth_id) {
                    return Err(MatrixonError::GraphCorruption(format!(
                        "auth_events cycle through {} and {}",
                        event.event_id, auth_id
                    )));
                }
                if finished.contains(&**auth_id) {
                    continue;
                }
                if stack.len() >= self.max_depth {
                    return Err(MatrixonError::GraphCorruption(format!(
                        "auth chain of {} exceeds {} levels",
                        root.event_id, self.max_depth
                    )));
                }

                let auth_event = self.get(auth_id)?;
                on_path.insert(&auth_event.event_id);
                stack.push((auth_event, 0));
            }
        }

        Ok(())
    }
}
