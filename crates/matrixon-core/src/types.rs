//! Core types for Matrixon
//!
//! The event and state representations consumed by state resolution. Events
//! are immutable once built and shared as `Arc<Event>`; a [`StateMap`] maps a
//! `(type, state_key)` pair to exactly one event id.

use std::collections::BTreeMap;
use std::fmt;

use ruma::{EventId, OwnedEventId, OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Well-known event types that take part in authorization.
pub mod event_type {
    pub const CREATE: &str = "m.room.create";
    pub const POWER_LEVELS: &str = "m.room.power_levels";
    pub const JOIN_RULES: &str = "m.room.join_rules";
    pub const MEMBER: &str = "m.room.member";
    pub const THIRD_PARTY_INVITE: &str = "m.room.third_party_invite";
}

/// `(event type, state key)`
pub type StateKey = (String, String);

/// An immutable room event (PDU) as seen by state resolution.
///
/// Deserializes from the federation wire shape. Fields owned by the
/// verification layer (hashes, signatures, unsigned) are ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: OwnedEventId,
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    pub origin_server_ts: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub prev_events: Vec<OwnedEventId>,
    #[serde(default)]
    pub depth: u64,
    #[serde(default)]
    pub auth_events: Vec<OwnedEventId>,
}

impl Event {
    /// Whether this is a state event
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// The state map key this event occupies, if it is a state event
    pub fn state_map_key(&self) -> Option<StateKey> {
        self.state_key
            .as_ref()
            .map(|state_key| (self.kind.clone(), state_key.clone()))
    }

    /// Whether the event occupies the given `(type, state_key)` slot
    pub fn is_type_and_key(&self, kind: &str, state_key: &str) -> bool {
        self.kind == kind && self.state_key.as_deref() == Some(state_key)
    }

    /// Membership carried by an `m.room.member` event
    pub fn membership(&self) -> Option<Membership> {
        if self.kind != event_type::MEMBER {
            return None;
        }
        self.content
            .get("membership")
            .and_then(Value::as_str)
            .map(Membership::from)
    }

    /// Shorthand for reading a string field out of the content
    pub fn content_str(&self, field: &str) -> Option<&str> {
        self.content.get(field).and_then(Value::as_str)
    }
}

/// Builder for [`Event`] values.
///
/// Used by fixtures and tests; stored events normally arrive deserialized.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    pub fn new(
        event_id: OwnedEventId,
        room_id: OwnedRoomId,
        sender: OwnedUserId,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            event: Event {
                event_id,
                room_id,
                sender,
                origin_server_ts: 0,
                kind: kind.into(),
                content: Value::Object(Default::default()),
                state_key: None,
                prev_events: Vec::new(),
                depth: 0,
                auth_events: Vec::new(),
            },
        }
    }

    pub fn state_key(mut self, state_key: impl Into<String>) -> Self {
        self.event.state_key = Some(state_key.into());
        self
    }

    pub fn content(mut self, content: Value) -> Self {
        self.event.content = content;
        self
    }

    pub fn auth_events(mut self, auth_events: Vec<OwnedEventId>) -> Self {
        self.event.auth_events = auth_events;
        self
    }

    pub fn prev_events(mut self, prev_events: Vec<OwnedEventId>) -> Self {
        self.event.prev_events = prev_events;
        self
    }

    pub fn origin_server_ts(mut self, ts: u64) -> Self {
        self.event.origin_server_ts = ts;
        self
    }

    pub fn depth(mut self, depth: u64) -> Self {
        self.event.depth = depth;
        self
    }

    pub fn build(self) -> Event {
        self.event
    }
}

/// Membership states of `m.room.member`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
    Unknown(String),
}

impl Membership {
    pub fn as_str(&self) -> &str {
        match self {
            Membership::Join => "join",
            Membership::Invite => "invite",
            Membership::Leave => "leave",
            Membership::Ban => "ban",
            Membership::Knock => "knock",
            Membership::Unknown(other) => other,
        }
    }
}

impl From<&str> for Membership {
    fn from(s: &str) -> Self {
        match s {
            "join" => Membership::Join,
            "invite" => Membership::Invite,
            "leave" => Membership::Leave,
            "ban" => Membership::Ban,
            "knock" => Membership::Knock,
            other => Membership::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One serialized entry of a [`StateMap`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub state_key: String,
    pub event_id: OwnedEventId,
}

/// Room state at one point of the graph: `(type, state_key) -> event id`.
///
/// Backed by a `BTreeMap`, so iteration and serialization are always in key
/// order. A serialized list that repeats a key is refused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<StateEntry>", into = "Vec<StateEntry>")]
pub struct StateMap(BTreeMap<StateKey, OwnedEventId>);

impl StateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &str, state_key: &str) -> Option<&OwnedEventId> {
        self.0.get(&(kind.to_owned(), state_key.to_owned()))
    }

    pub fn get_by_key(&self, key: &StateKey) -> Option<&OwnedEventId> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &StateKey) -> bool {
        self.0.contains_key(key)
    }

    /// Sets the value for `key`, returning the value it replaced
    pub fn insert(&mut self, key: StateKey, event_id: OwnedEventId) -> Option<OwnedEventId> {
        self.0.insert(key, event_id)
    }

    pub fn remove(&mut self, key: &StateKey) -> Option<OwnedEventId> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &OwnedEventId)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.0.keys()
    }

    pub fn event_ids(&self) -> impl Iterator<Item = &OwnedEventId> {
        self.0.values()
    }

    /// Whether `event_id` is a value of this map
    pub fn contains_event(&self, event_id: &EventId) -> bool {
        self.0.values().any(|id| id.as_str() == event_id.as_str())
    }

    /// Overlays every entry of `other`, replacing existing values
    pub fn extend_from(&mut self, other: &StateMap) {
        for (key, id) in other.iter() {
            self.0.insert(key.clone(), id.clone());
        }
    }

    /// Content fingerprint of this map
    pub fn identity(&self) -> StateMapId {
        let mut hasher = Sha256::new();
        for ((kind, state_key), event_id) in &self.0 {
            for part in [kind.as_str(), state_key.as_str(), event_id.as_str()] {
                hasher.update((part.len() as u64).to_be_bytes());
                hasher.update(part.as_bytes());
            }
        }
        StateMapId(hasher.finalize().into())
    }
}

impl FromIterator<(StateKey, OwnedEventId)> for StateMap {
    fn from_iter<I: IntoIterator<Item = (StateKey, OwnedEventId)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for StateMap {
    type Item = (StateKey, OwnedEventId);
    type IntoIter = std::collections::btree_map::IntoIter<StateKey, OwnedEventId>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl TryFrom<Vec<StateEntry>> for StateMap {
    type Error = String;

    fn try_from(entries: Vec<StateEntry>) -> Result<Self, Self::Error> {
        let mut map = BTreeMap::new();
        for entry in entries {
            let key = (entry.kind, entry.state_key);
            if map.contains_key(&key) {
                return Err(format!(
                    "duplicate state entry for ({}, {:?})",
                    key.0, key.1
                ));
            }
            map.insert(key, entry.event_id);
        }
        Ok(Self(map))
    }
}

impl From<StateMap> for Vec<StateEntry> {
    fn from(map: StateMap) -> Self {
        map.0
            .into_iter()
            .map(|((kind, state_key), event_id)| StateEntry {
                kind,
                state_key,
                event_id,
            })
            .collect()
    }
}

/// SHA-256 fingerprint of a [`StateMap`]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateMapId(pub [u8; 32]);

impl StateMapId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for StateMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for StateMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateMapId({})", self)
    }
}
