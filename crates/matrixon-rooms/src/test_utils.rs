//! Test helpers: a small room graph builder and store doubles

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;
use ruma::{EventId, OwnedEventId, OwnedRoomId, RoomId, UserId};
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use matrixon_core::{
    traits::EventStore, types::event_type, Event, EventBuilder, MatrixonError, Result, StateMap,
};

use crate::state_res::EventArena;
use crate::store::MemoryEventStore;

pub(crate) const ALICE: &str = "@alice:example.org";
pub(crate) const BOB: &str = "@bob:example.org";
pub(crate) const CHARLIE: &str = "@charlie:example.org";

const BASE_EVENTS: [&str; 6] = ["$create", "$ima", "$ipower", "$ijr", "$imb", "$imc"];

pub(crate) fn eid(id: &str) -> OwnedEventId {
    EventId::parse(id).unwrap()
}

mock! {
    pub Store {}

    #[async_trait]
    impl EventStore for Store {
        async fn get_events(&self, event_ids: &[OwnedEventId]) -> Result<Vec<Arc<Event>>>;
    }
}

/// Builds the event graph of one room.
///
/// Each event gets the previously built one as its only prev event and the
/// next timestamp, unless [`set_time`](TestRoom::set_time) says otherwise.
pub(crate) struct TestRoom {
    pub room_id: OwnedRoomId,
    events: BTreeMap<String, Arc<Event>>,
    last: Option<OwnedEventId>,
    next_ts: u64,
    depth: u64,
}

impl TestRoom {
    pub fn new() -> Self {
        Self {
            room_id: RoomId::parse("!room:example.org").unwrap(),
            events: BTreeMap::new(),
            last: None,
            next_ts: 0,
            depth: 0,
        }
    }

    /// Alice creates a public v10 room at power 100, bob (50) and charlie
    /// (default 0) join.
    pub fn base() -> Self {
        let mut room = Self::new();
        room.create(ALICE);
        room.member("$ima", ALICE, ALICE, "join", &["$create"]);
        room.state(
            "$ipower",
            ALICE,
            event_type::POWER_LEVELS,
            "",
            json!({ "users": { ALICE: 100, BOB: 50 } }),
            &["$create", "$ima"],
        );
        room.state(
            "$ijr",
            ALICE,
            event_type::JOIN_RULES,
            "",
            json!({ "join_rule": "public" }),
            &["$create", "$ima", "$ipower"],
        );
        room.member("$imb", BOB, BOB, "join", &["$create", "$ijr", "$ipower"]);
        room.member("$imc", CHARLIE, CHARLIE, "join", &["$create", "$ijr", "$ipower"]);
        room
    }

    /// Timestamp of the next event
    pub fn set_time(&mut self, ts: u64) {
        self.next_ts = ts;
    }

    pub fn event_with_content(
        &mut self,
        id: &str,
        sender: &str,
        kind: &str,
        state_key: Option<&str>,
        content: Value,
        auth: &[&str],
    ) -> Arc<Event> {
        let prev_events = match (kind, &self.last) {
            (event_type::CREATE, _) | (_, None) => Vec::new(),
            (_, Some(last)) => vec![last.clone()],
        };
        let mut builder = EventBuilder::new(
            eid(id),
            self.room_id.clone(),
            UserId::parse(sender).unwrap(),
            kind,
        )
        .content(content)
        .auth_events(auth.iter().map(|a| eid(a)).collect())
        .prev_events(prev_events)
        .origin_server_ts(self.next_ts)
        .depth(self.depth);
        if let Some(state_key) = state_key {
            builder = builder.state_key(state_key);
        }

        self.next_ts += 1;
        self.depth += 1;
        self.last = Some(eid(id));

        let event = Arc::new(builder.build());
        self.events.insert(id.to_owned(), Arc::clone(&event));
        event
    }

    pub fn state(
        &mut self,
        id: &str,
        sender: &str,
        kind: &str,
        state_key: &str,
        content: Value,
        auth: &[&str],
    ) -> Arc<Event> {
        self.event_with_content(id, sender, kind, Some(state_key), content, auth)
    }

    pub fn member(
        &mut self,
        id: &str,
        sender: &str,
        target: &str,
        membership: &str,
        auth: &[&str],
    ) -> Arc<Event> {
        self.state(id, sender, event_type::MEMBER, target, json!({ "membership": membership }), auth)
    }

    pub fn create(&mut self, sender: &str) -> Arc<Event> {
        self.event_with_content(
            "$create",
            sender,
            event_type::CREATE,
            Some(""),
            json!({ "creator": sender, "room_version": "10" }),
            &[],
        )
    }

    /// An event of another room, stored alongside this one's
    pub fn foreign_event(&mut self, id: &str, room_id: &str) -> Arc<Event> {
        let event = Arc::new(
            EventBuilder::new(
                eid(id),
                RoomId::parse(room_id).unwrap(),
                UserId::parse(ALICE).unwrap(),
                "m.room.topic",
            )
            .state_key("")
            .build(),
        );
        self.events.insert(id.to_owned(), Arc::clone(&event));
        event
    }

    pub fn get(&self, id: &str) -> Arc<Event> {
        Arc::clone(&self.events[id])
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.values().map(|e| (**e).clone()).collect()
    }

    pub fn store(&self) -> Arc<MemoryEventStore> {
        Arc::new(MemoryEventStore::from_events(self.events()))
    }

    pub fn arena(&self) -> EventArena {
        EventArena::from_events(self.events.values().cloned(), 10_000)
    }

    pub fn state_map(&self, ids: &[&str]) -> StateMap {
        ids.iter()
            .map(|id| {
                let event = self.get(id);
                (event.state_map_key().unwrap(), event.event_id.clone())
            })
            .collect()
    }

    pub fn base_state(&self) -> StateMap {
        self.state_map(&BASE_EVENTS)
    }

    /// The base state with `ids` written over it
    pub fn base_state_with(&self, ids: &[&str]) -> StateMap {
        let mut state = self.base_state();
        state.extend_from(&self.state_map(ids));
        state
    }
}

/// Wraps a store so that lookups wait until the gate opens
pub(crate) struct GatedStore {
    inner: Arc<MemoryEventStore>,
    gate: Semaphore,
    arrivals: AtomicUsize,
}

impl GatedStore {
    fn with_permits(inner: Arc<MemoryEventStore>, permits: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Semaphore::new(permits),
            arrivals: AtomicUsize::new(0),
        })
    }

    pub fn open(inner: Arc<MemoryEventStore>) -> Arc<Self> {
        Self::with_permits(inner, Semaphore::MAX_PERMITS)
    }

    pub fn closed(inner: Arc<MemoryEventStore>) -> Arc<Self> {
        Self::with_permits(inner, 0)
    }

    /// Lookups that have reached the gate so far
    pub fn waiting(&self) -> usize {
        self.arrivals.load(Ordering::SeqCst)
    }

    pub fn open_gate(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS - self.gate.available_permits());
    }
}

#[async_trait]
impl EventStore for GatedStore {
    async fn get_events(&self, event_ids: &[OwnedEventId]) -> Result<Vec<Arc<Event>>> {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| MatrixonError::Internal(e.to_string()))?;
        self.inner.get_events(event_ids).await
    }
}
