//! Mainline ordering of the remaining disputed events
//!
//! The mainline is the chain of power levels events obtained by following
//! `m.room.power_levels` auth events back from the resolved power levels.
//! Every other disputed event is placed by the closest mainline event in its
//! own power levels ancestry.

use std::collections::{HashMap, HashSet};

use ruma::{EventId, OwnedEventId};
use tracing::debug;

use matrixon_core::{types::event_type, Event, MatrixonError, Result};

use super::arena::EventArena;

/// Position of each mainline event; the oldest one holds 1
pub type MainlinePositions = HashMap<OwnedEventId, usize>;

fn power_levels_parent<'a>(arena: &'a EventArena, event: &Event) -> Result<Option<&'a std::sync::Arc<Event>>> {
    for auth_id in &event.auth_events {
        let auth_event = arena.get(auth_id)?;
        if auth_event.is_type_and_key(event_type::POWER_LEVELS, "") {
            return Ok(Some(auth_event));
        }
    }
    Ok(None)
}

/// Builds the mainline ending at `resolved_power_levels`
pub fn mainline_positions(
    arena: &EventArena,
    resolved_power_levels: Option<&EventId>,
    max_depth: usize,
) -> Result<MainlinePositions> {
    let mut mainline: Vec<OwnedEventId> = Vec::new();
    let mut visited: HashSet<OwnedEventId> = HashSet::new();
    let mut next = match resolved_power_levels {
        Some(event_id) => Some(arena.get(event_id)?),
        None => None,
    };

    while let Some(event) = next {
        if !visited.insert(event.event_id.clone()) || mainline.len() >= max_depth {
            return Err(MatrixonError::GraphCorruption(format!(
                "power levels lineage of {} does not terminate",
                mainline.first().map(|id| id.as_str()).unwrap_or_default()
            )));
        }
        mainline.push(event.event_id.clone());
        next = power_levels_parent(arena, event)?;
    }

    Ok(mainline
        .into_iter()
        .rev()
        .enumerate()
        .map(|(idx, event_id)| (event_id, idx + 1))
        .collect())
}

/// Position inherited from the nearest mainline event among `event` and its
/// power levels ancestors; 0 when there is none.
pub fn mainline_depth(
    arena: &EventArena,
    positions: &MainlinePositions,
    event: &Event,
    max_depth: usize,
) -> Result<usize> {
    let mut visited: HashSet<&EventId> = HashSet::new();
    let mut current = Some(event);

    while let Some(event) = current {
        if let Some(position) = positions.get(&event.event_id) {
            return Ok(*position);
        }
        if !visited.insert(&event.event_id) || visited.len() > max_depth {
            return Err(MatrixonError::GraphCorruption(format!(
                "power levels ancestry of {} does not terminate",
                event.event_id
            )));
        }
        current = power_levels_parent(arena, event)?.map(|parent| &**parent);
    }

    Ok(0)
}

/// Orders `event_ids` by `(mainline position, origin_server_ts, event id)`
pub fn mainline_sort(
    arena: &EventArena,
    event_ids: &[OwnedEventId],
    resolved_power_levels: Option<&EventId>,
    max_depth: usize,
) -> Result<Vec<OwnedEventId>> {
    let positions = mainline_positions(arena, resolved_power_levels, max_depth)?;

    let mut keyed = Vec::with_capacity(event_ids.len());
    for event_id in event_ids {
        let event = arena.get(event_id)?;
        let depth = mainline_depth(arena, &positions, event, max_depth)?;
        keyed.push((depth, event.origin_server_ts, event_id));
    }
    keyed.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.as_str().cmp(b.2.as_str()))
    });

    debug!(mainline = positions.len(), events = keyed.len(), "Mainline sorted");
    Ok(keyed.into_iter().map(|(_, _, event_id)| event_id.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eid, TestRoom, ALICE, BOB};
    use serde_json::json;
    use test_log::test;

    const MAX_DEPTH: usize = 100;

    fn lineage() -> TestRoom {
        let mut room = TestRoom::base();
        room.state("$pl2", ALICE, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50 } }), &["$create", "$ima", "$ipower"]);
        room.state("$pl3", ALICE, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50 } }), &["$create", "$ima", "$pl2"]);
        room
    }

    #[test]
    fn test_positions_count_from_oldest() {
        let room = lineage();
        let positions = mainline_positions(&room.arena(), Some(&eid("$pl3")), MAX_DEPTH).unwrap();
        assert_eq!(positions[&eid("$ipower")], 1);
        assert_eq!(positions[&eid("$pl2")], 2);
        assert_eq!(positions[&eid("$pl3")], 3);
        assert!(mainline_positions(&room.arena(), None, MAX_DEPTH).unwrap().is_empty());
    }

    #[test]
    fn test_sort_by_position_then_time_then_id() {
        let mut room = lineage();
        room.set_time(500);
        room.state("$early_pos", ALICE, "m.room.topic", "", json!({}), &["$create", "$ima", "$ipower"]);
        room.set_time(100);
        room.state("$late_pos", ALICE, "m.room.topic", "", json!({}), &["$create", "$ima", "$pl3"]);
        room.set_time(300);
        room.state("$b_same", BOB, "m.room.name", "", json!({}), &["$create", "$imb", "$pl2"]);
        room.set_time(300);
        room.state("$a_same", BOB, "m.room.name", "", json!({}), &["$create", "$imb", "$pl2"]);
        room.set_time(1);
        room.state("$no_pl", ALICE, "m.room.avatar", "", json!({}), &["$create", "$ima"]);

        let events: Vec<_> = ["$late_pos", "$b_same", "$early_pos", "$a_same", "$no_pl"].iter().map(|id| eid(id)).collect();
        let sorted = mainline_sort(&room.arena(), &events, Some(&eid("$pl3")), MAX_DEPTH).unwrap();
        let ids: Vec<_> = sorted.iter().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["$no_pl", "$early_pos", "$a_same", "$b_same", "$late_pos"]);
    }

    #[test]
    fn test_off_mainline_power_levels_inherit_ancestor_position() {
        let mut room = lineage();
        room.state("$fork", BOB, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50 } }), &["$create", "$imb", "$pl2"]);
        room.state("$topic", BOB, "m.room.topic", "", json!({}), &["$create", "$imb", "$fork"]);
        let arena = room.arena();
        let positions = mainline_positions(&arena, Some(&eid("$pl3")), MAX_DEPTH).unwrap();
        assert_eq!(mainline_depth(&arena, &positions, &room.get("$topic"), MAX_DEPTH).unwrap(), 2);
    }

    #[test]
    fn test_power_levels_cycle_is_detected() {
        let mut room = TestRoom::base();
        room.state("$pa", ALICE, event_type::POWER_LEVELS, "", json!({}), &["$create", "$pb"]);
        room.state("$pb", ALICE, event_type::POWER_LEVELS, "", json!({}), &["$create", "$pa"]);
        let err = mainline_positions(&room.arena(), Some(&eid("$pa")), MAX_DEPTH).unwrap_err();
        assert!(matches!(err, MatrixonError::GraphCorruption(_)));
    }
}
