//! Conflict detection
//!
//! Splits the candidate state maps into the entries they all agree on and the
//! keys they dispute, and computes the auth difference that widens the
//! disputed set.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use ruma::OwnedEventId;
use tracing::debug;

use matrixon_core::{Result, StateKey, StateMap};

use super::arena::EventArena;

/// Output of [`separate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conflicts {
    /// Keys every input maps to the same event
    pub unconflicted: StateMap,
    /// Disputed keys with every event some input maps them to
    pub conflicted: BTreeMap<StateKey, BTreeSet<OwnedEventId>>,
}

impl Conflicts {
    pub fn is_conflicted(&self) -> bool {
        !self.conflicted.is_empty()
    }

    pub fn candidates(&self) -> impl Iterator<Item = &OwnedEventId> {
        self.conflicted.values().flatten()
    }
}

/// A key is unconflicted when every input holds the same value for it, where
/// absence from an input counts as a value of its own.
pub fn separate(state_maps: &[StateMap]) -> Conflicts {
    let keys: BTreeSet<&StateKey> = state_maps.iter().flat_map(|m| m.keys()).collect();
    let mut conflicts = Conflicts::default();

    for key in keys {
        let values: BTreeSet<Option<&OwnedEventId>> =
            state_maps.iter().map(|m| m.get_by_key(key)).collect();

        if values.len() == 1 {
            if let Some(Some(event_id)) = values.into_iter().next() {
                conflicts.unconflicted.insert(key.clone(), event_id.clone());
            }
        } else {
            conflicts
                .conflicted
                .insert(key.clone(), values.into_iter().flatten().cloned().collect());
        }
    }

    debug!(
        unconflicted = conflicts.unconflicted.len(),
        conflicted = conflicts.conflicted.len(),
        "Separated state maps"
    );
    conflicts
}

/// Events in some but not all of the inputs' auth chains, where a map's auth
/// chain is its own event ids plus their full `auth_events` closure.
pub fn auth_difference(arena: &EventArena, state_maps: &[StateMap]) -> Result<BTreeSet<OwnedEventId>> {
    let mut chains: Vec<HashSet<OwnedEventId>> = Vec::with_capacity(state_maps.len());
    for state_map in state_maps {
        let mut chain = HashSet::new();
        for event_id in state_map.event_ids() {
            if chain.insert(event_id.clone()) {
                chain.extend(arena.auth_chain(event_id)?);
            }
        }
        chains.push(chain);
    }

    let Some((first, rest)) = chains.split_first() else {
        return Ok(BTreeSet::new());
    };

    let union: HashSet<&OwnedEventId> = chains.iter().flatten().collect();
    let difference = union
        .into_iter()
        .filter(|id| !(first.contains(*id) && rest.iter().all(|chain| chain.contains(*id))))
        .cloned()
        .collect();
    Ok(difference)
}

/// Conflicted candidates together with the auth difference
pub fn full_conflicted_set(
    arena: &EventArena,
    conflicts: &Conflicts,
    state_maps: &[StateMap],
) -> Result<BTreeSet<OwnedEventId>> {
    let mut full = auth_difference(arena, state_maps)?;
    full.extend(conflicts.candidates().cloned());
    for event_id in &full {
        arena.get(event_id)?;
    }
    Ok(full)
}
