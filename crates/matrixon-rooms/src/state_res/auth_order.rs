//! Ordering of the disputed power events
//!
//! Power events are sorted topologically over their `auth_events` edges so
//! that an event always follows everything it is authorized through. Among
//! events whose ancestors are all placed, the one whose sender held the most
//! power goes first, then the earliest `origin_server_ts`, then the smallest
//! event id.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use ruma::{EventId, OwnedEventId};
use tracing::debug;

use matrixon_core::{types::event_type, Event, Membership, MatrixonError, Result};

use super::{
    arena::EventArena, event_auth::room_creator, power_levels::PowerLevels,
    room_version::RoomVersionRules,
};

/// Events that can take power away from someone: create, power levels,
/// join rules, and kicks or bans of another user.
pub fn is_power_event(event: &Event) -> bool {
    match event.kind.as_str() {
        event_type::CREATE | event_type::POWER_LEVELS | event_type::JOIN_RULES => {
            event.state_key.as_deref() == Some("")
        }
        event_type::MEMBER => {
            matches!(event.membership(), Some(Membership::Leave | Membership::Ban))
                && event.state_key.as_deref() != Some(event.sender.as_str())
        }
        _ => false,
    }
}

/// Power level of the sender according to the event's own auth events
pub fn sender_power_level(
    arena: &EventArena,
    rules: &RoomVersionRules,
    event: &Event,
) -> Result<i64> {
    if let Some(pl) = arena.find_auth_event(event, event_type::POWER_LEVELS, "")? {
        return Ok(PowerLevels::from_content(&pl.content).user_level(event.sender.as_str()));
    }

    if let Some(create) = arena.find_auth_event(event, event_type::CREATE, "")? {
        if room_creator(create, rules) == Some(event.sender.as_str()) {
            return Ok(100);
        }
    }
    Ok(0)
}

/// Tie-break key of the power ordering. Smaller sorts first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub power_level: i64,
    pub origin_server_ts: u64,
    pub event_id: OwnedEventId,
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .power_level
            .cmp(&self.power_level)
            .then_with(|| self.origin_server_ts.cmp(&other.origin_server_ts))
            .then_with(|| self.event_id.as_str().cmp(other.event_id.as_str()))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Kahn's algorithm over a graph mapping each event to the auth events it
/// points at. Emits ancestors first; among ready events the smallest key.
pub fn lexicographical_topological_sort(
    graph: &BTreeMap<OwnedEventId, BTreeSet<OwnedEventId>>,
    key_of: impl Fn(&EventId) -> Result<SortKey>,
) -> Result<Vec<OwnedEventId>> {
    let mut outdegree: HashMap<&EventId, usize> = HashMap::with_capacity(graph.len());
    let mut dependents: HashMap<&EventId, Vec<&EventId>> = HashMap::with_capacity(graph.len());
    let mut ready = BinaryHeap::new();

    for (event_id, edges) in graph {
        outdegree.insert(event_id, edges.len());
        if edges.is_empty() {
            ready.push(Reverse(key_of(&**event_id)?));
        }
        for edge in edges {
            dependents.entry(edge).or_default().push(event_id);
        }
    }

    let mut sorted = Vec::with_capacity(graph.len());
    while let Some(Reverse(key)) = ready.pop() {
        if let Some(parents) = dependents.get(&*key.event_id) {
            for parent in parents {
                let Some(remaining) = outdegree.get_mut(parent) else {
                    continue;
                };
                *remaining -= 1;
                if *remaining == 0 {
                    ready.push(Reverse(key_of(*parent)?));
                }
            }
        }
        sorted.push(key.event_id);
    }

    if sorted.len() != graph.len() {
        return Err(MatrixonError::GraphCorruption(format!(
            "auth_events cycle among {} conflicted events",
            graph.len() - sorted.len()
        )));
    }
    Ok(sorted)
}

/// Sorts `power_events` and those of their auth ancestors that are in
/// `full_conflicted_set`.
pub fn reverse_topological_power_sort(
    arena: &EventArena,
    rules: &RoomVersionRules,
    power_events: &[OwnedEventId],
    full_conflicted_set: &BTreeSet<OwnedEventId>,
) -> Result<Vec<OwnedEventId>> {
    let mut graph: BTreeMap<OwnedEventId, BTreeSet<OwnedEventId>> = BTreeMap::new();

    for event_id in power_events {
        let mut todo = vec![event_id.clone()];
        while let Some(current) = todo.pop() {
            if graph.contains_key(&current) {
                continue;
            }
            let event = arena.get(&current)?;
            let edges: BTreeSet<OwnedEventId> = event
                .auth_events
                .iter()
                .filter(|id| full_conflicted_set.contains(*id))
                .cloned()
                .collect();
            todo.extend(edges.iter().filter(|id| !graph.contains_key(*id)).cloned());
            graph.insert(current, edges);
        }
    }

    let mut levels: HashMap<&EventId, i64> = HashMap::with_capacity(graph.len());
    for event_id in graph.keys() {
        levels.insert(event_id, sender_power_level(arena, rules, arena.get(event_id)?)?);
    }

    let sorted = lexicographical_topological_sort(&graph, |event_id| {
        let event = arena.get(event_id)?;
        Ok(SortKey {
            power_level: levels.get(event_id).copied().unwrap_or_default(),
            origin_server_ts: event.origin_server_ts,
            event_id: event.event_id.clone(),
        })
    })?;

    debug!(power_events = power_events.len(), sorted = sorted.len(), "Sorted power events");
    Ok(sorted)
}
