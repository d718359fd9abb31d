//! Iterative auth checks
//!
//! Replays an ordered list of events on top of a base state. Each event is
//! authorized against its referenced auth events, with every key the event
//! type depends on replaced by the value accumulated so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;
use ruma::OwnedEventId;
use tracing::{debug, trace};

use matrixon_core::{Event, Result, StateMap};

use super::{
    arena::EventArena,
    event_auth::{self, AuthEvents},
    room_version::RoomVersionRules,
    AuthOutcome, RejectionReason,
};

/// Rejections recorded during one resolution, keyed by event id
pub type Rejections = BTreeMap<OwnedEventId, RejectionReason>;

/// Authorizes one event against `state`. Cited auth events listed in
/// `rejected` are dropped; every key the event type depends on is then taken
/// from `state`.
pub fn evaluate(
    arena: &EventArena,
    rules: &RoomVersionRules,
    event: &Event,
    state: &StateMap,
    rejected: &Rejections,
) -> Result<AuthOutcome> {
    let reject = |reason: RejectionReason| AuthOutcome::Rejected {
        event_id: event.event_id.clone(),
        reason,
    };

    let referenced = event
        .auth_events
        .iter()
        .map(|auth_id| arena.get(auth_id).map(Arc::clone))
        .collect::<Result<Vec<_>>>()?;

    if let Err(reason) = event_auth::check_auth_event_refs(event, &referenced, rules) {
        return Ok(reject(reason));
    }

    let mut auth: AuthEvents = referenced
        .into_iter()
        .filter(|auth_event| !rejected.contains_key(&auth_event.event_id))
        .collect();
    for key in event_auth::auth_types_for_event(event, rules) {
        let Some(event_id) = state.get_by_key(&key) else {
            continue;
        };
        if !rejected.contains_key(event_id) {
            auth.insert(Arc::clone(arena.get(event_id)?));
        }
    }

    Ok(match event_auth::check_event(event, &auth, rules) {
        Ok(()) => AuthOutcome::Accepted(event.event_id.clone()),
        Err(reason) => reject(reason),
    })
}

/// Applies `event_ids` in order to `base`, returning the accumulated state.
/// Rejected events are added to `rejected` and leave the state untouched.
pub fn iterative_auth_checks(
    arena: &EventArena,
    rules: &RoomVersionRules,
    event_ids: &[OwnedEventId],
    base: StateMap,
    rejected: &mut Rejections,
) -> Result<StateMap> {
    let mut state = base;

    for event_id in event_ids {
        let event = arena.get(event_id)?;
        match evaluate(arena, rules, event, &state, rejected)? {
            AuthOutcome::Accepted(_) => {
                trace!(event_id = %event_id, "Event accepted");
                if let Some(key) = event.state_map_key() {
                    state.insert(key, event_id.clone());
                }
            }
            AuthOutcome::Rejected { event_id, reason } => {
                debug!(event_id = %event_id, reason = %reason, "Event rejected during resolution");
                counter!("matrixon_stateres_rejected_events_total").increment(1);
                rejected.insert(event_id, reason);
            }
        }
    }

    Ok(state)
}
