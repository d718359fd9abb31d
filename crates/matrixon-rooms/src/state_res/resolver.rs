//! State resolution entry points

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use ruma::{OwnedEventId, RoomId};
use tracing::{debug, info, instrument};

use matrixon_core::{
    config::StateResConfig, traits::EventStore, types::event_type, utils, Event, MatrixonError,
    Result, StateMap,
};

use super::{
    arena::EventArena,
    auth_order::{is_power_event, reverse_topological_power_sort},
    cache::{CacheKey, ResolutionCache},
    conflict::{full_conflicted_set, separate},
    event_auth,
    iterative::{self, iterative_auth_checks, Rejections},
    mainline::mainline_sort,
    room_version::RoomVersionRules,
    AuthOutcome, RejectedEvent, RejectionReason, Resolution,
};

/// Resolves sets of state maps for any number of rooms.
///
/// Holds the event store and the process-wide resolution cache. Rooms share
/// nothing else, so one resolver serves concurrent resolutions of different
/// rooms.
pub struct Resolver {
    store: Arc<dyn EventStore>,
    cache: ResolutionCache,
    config: StateResConfig,
}

impl Resolver {
    pub fn new(store: Arc<dyn EventStore>, config: StateResConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            cache: ResolutionCache::new(config.cache_capacity),
            config,
        })
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn config(&self) -> &StateResConfig {
        &self.config
    }

    /// Resolves the state maps at a room's forward extremities into one.
    ///
    /// Fails with a retryable fetch error if the store cannot supply an event
    /// the algorithm needs, and with graph corruption on `auth_events` cycles.
    #[instrument(skip(self, state_maps), fields(inputs = state_maps.len()))]
    pub async fn resolve(&self, room_id: &RoomId, state_maps: &[StateMap]) -> Result<Arc<Resolution>> {
        let key = CacheKey::for_inputs(room_id, state_maps);
        if let Some(resolution) = self.cache.get(&key) {
            return Ok(resolution);
        }

        let start = utils::log_operation_start("state resolution");
        let roots: Vec<OwnedEventId> = state_maps
            .iter()
            .flat_map(|m| m.event_ids())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let arena = EventArena::load(
            self.store.as_ref(),
            &roots,
            self.config.fetch_batch_size,
            self.config.max_auth_depth,
        )
        .await?;

        let resolution = Arc::new(resolve_with_arena(room_id, state_maps, &arena, &self.config)?);
        self.cache.insert(key, Arc::clone(&resolution));

        let elapsed = utils::log_operation_end("state resolution", start);
        histogram!("matrixon_stateres_resolve_seconds").record(elapsed.as_secs_f64());
        info!(
            state = resolution.state.len(),
            rejected = resolution.rejected.len(),
            "🔀 Room state resolved"
        );
        Ok(resolution)
    }

    /// Authorizes a single new event against already-resolved state
    pub async fn check_event(&self, event: &Event, state: &StateMap) -> Result<AuthOutcome> {
        check_event_against_state(self.store.as_ref(), event, state).await
    }
}

/// Rules of the room the inputs belong to, read from their create event
fn room_rules(
    room_id: &RoomId,
    state_maps: &[StateMap],
    arena: &EventArena,
    config: &StateResConfig,
) -> Result<RoomVersionRules> {
    let creates: BTreeSet<&OwnedEventId> = state_maps
        .iter()
        .filter_map(|m| m.get(event_type::CREATE, ""))
        .collect();

    let mut creates = creates.into_iter();
    match (creates.next(), creates.next()) {
        (None, _) => RoomVersionRules::for_version(&config.default_room_version),
        (Some(create_id), None) => {
            let create = arena.get(create_id)?;
            if create.room_id.as_str() != room_id.as_str() {
                return Err(MatrixonError::InvalidEvent(format!(
                    "create event {} belongs to {}",
                    create.event_id, create.room_id
                )));
            }
            RoomVersionRules::from_create_event(create)
        }
        (Some(first), Some(second)) => Err(MatrixonError::InvalidEvent(format!(
            "conflicting create events {} and {}",
            first, second
        ))),
    }
}

/// The synchronous algorithm over a prefetched arena. Never touches the store.
pub fn resolve_with_arena(
    room_id: &RoomId,
    state_maps: &[StateMap],
    arena: &EventArena,
    config: &StateResConfig,
) -> Result<Resolution> {
    arena.ensure_single_room(room_id)?;
    let rules = room_rules(room_id, state_maps, arena, config)?;

    let conflicts = separate(state_maps);
    if !conflicts.is_conflicted() {
        debug!("No conflicts, nothing to resolve");
        return Ok(Resolution {
            state: conflicts.unconflicted,
            rejected: Vec::new(),
        });
    }

    let full = full_conflicted_set(arena, &conflicts, state_maps)?;

    let mut power_events = Vec::new();
    for event_id in &full {
        if is_power_event(arena.get(event_id)?) {
            power_events.push(event_id.clone());
        }
    }

    let sorted_power = reverse_topological_power_sort(arena, &rules, &power_events, &full)?;
    let mut rejected = Rejections::new();
    let power_state = iterative_auth_checks(
        arena,
        &rules,
        &sorted_power,
        conflicts.unconflicted.clone(),
        &mut rejected,
    )?;

    let placed: HashSet<&OwnedEventId> = sorted_power.iter().collect();
    let leftover: Vec<OwnedEventId> = full.iter().filter(|id| !placed.contains(id)).cloned().collect();
    let resolved_power_levels = power_state.get(event_type::POWER_LEVELS, "").cloned();
    let sorted_leftover = mainline_sort(
        arena,
        &leftover,
        resolved_power_levels.as_deref(),
        config.max_auth_depth,
    )?;

    let mut state = iterative_auth_checks(arena, &rules, &sorted_leftover, power_state, &mut rejected)?;
    state.extend_from(&conflicts.unconflicted);

    debug!(
        conflicted = conflicts.conflicted.len(),
        full_conflicted = full.len(),
        power_events = sorted_power.len(),
        rejected = rejected.len(),
        "Conflicts resolved"
    );

    Ok(Resolution {
        state,
        rejected: into_sorted_rejections(rejected),
    })
}

fn into_sorted_rejections(rejected: Rejections) -> Vec<RejectedEvent> {
    let mut rejected: Vec<RejectedEvent> = rejected
        .into_iter()
        .map(|(event_id, reason)| RejectedEvent { event_id, reason })
        .collect();
    rejected.sort_by(|a, b| a.event_id.as_str().cmp(b.event_id.as_str()));
    rejected
}

/// Authorizes `event` against `state`, loading the events it needs from the
/// store: the auth events it references and the current holders of the keys
/// its type depends on.
#[instrument(skip_all, fields(event_id = %event.event_id))]
pub async fn check_event_against_state(
    store: &dyn EventStore,
    event: &Event,
    state: &StateMap,
) -> Result<AuthOutcome> {
    let mut arena = EventArena::new(usize::MAX);

    if event.kind == event_type::CREATE {
        return Ok(match event_auth::check_create(event) {
            Ok(()) => AuthOutcome::Accepted(event.event_id.clone()),
            Err(reason) => AuthOutcome::Rejected {
                event_id: event.event_id.clone(),
                reason,
            },
        });
    }

    for auth_event in store.get_events(&event.auth_events).await? {
        arena.insert(auth_event);
    }

    // The version decides which keys the event depends on, so find the
    // create event before anything else.
    let create_id = match state.get(event_type::CREATE, "") {
        Some(create_id) => Some(create_id.clone()),
        None => event
            .auth_events
            .iter()
            .find(|id| {
                arena
                    .get(id)
                    .is_ok_and(|e| e.is_type_and_key(event_type::CREATE, ""))
            })
            .cloned(),
    };
    let Some(create_id) = create_id else {
        return Ok(AuthOutcome::Rejected {
            event_id: event.event_id.clone(),
            reason: RejectionReason::MissingCreateEvent,
        });
    };
    if !arena.contains(&create_id) {
        arena.insert(store.get_event(&create_id).await?);
    }
    let rules = RoomVersionRules::from_create_event(arena.get(&create_id)?)?;

    let wanted: Vec<OwnedEventId> = event_auth::auth_types_for_event(event, &rules)
        .iter()
        .filter_map(|key| state.get_by_key(key))
        .filter(|id| !arena.contains(id))
        .cloned()
        .collect();
    for state_event in store.get_events(&wanted).await? {
        arena.insert(state_event);
    }
    for event_id in event.auth_events.iter().chain(wanted.iter()) {
        if !arena.contains(event_id) {
            return Err(MatrixonError::fetch(event_id, "auth event not found in store"));
        }
    }

    let outcome = iterative::evaluate(&arena, &rules, event, state, &BTreeMap::new())?;
    debug!(accepted = outcome.is_accepted(), "Single event checked");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{eid, MockStore, TestRoom, ALICE, BOB, CHARLIE};
    use serde_json::json;
    use test_log::test;

    fn resolver(room: &TestRoom) -> Resolver {
        Resolver::new(room.store(), StateResConfig::default()).unwrap()
    }

    fn value<'a>(resolution: &'a Resolution, kind: &str, state_key: &str) -> Option<&'a str> {
        resolution.state.get(kind, state_key).map(|id| id.as_str())
    }

    /// Two name changes, by alice at t=100 and by bob at t=200, both cite
    /// the same power levels.
    fn name_race() -> (TestRoom, Vec<StateMap>) {
        let mut room = TestRoom::base();
        room.set_time(100);
        room.state("$name1", ALICE, "m.room.name", "", json!({ "name": "first" }), &["$create", "$ipower", "$ima"]);
        room.set_time(200);
        room.state("$name2", BOB, "m.room.name", "", json!({ "name": "second" }), &["$create", "$ipower", "$imb"]);
        let maps = vec![
            room.base_state_with(&["$name1"]),
            room.base_state_with(&["$name2"]),
            room.base_state(),
        ];
        (room, maps)
    }

    #[test(tokio::test)]
    async fn test_name_race_orders_by_timestamp() {
        let (room, maps) = name_race();
        let arena = room.arena();

        let order = mainline_sort(&arena, &[eid("$name2"), eid("$name1")], Some(&eid("$ipower")), 100).unwrap();
        assert_eq!(order, vec![eid("$name1"), eid("$name2")]);

        // both pass auth, so the event later in mainline order overwrites the earlier one
        let resolution = resolver(&room).resolve(&room.room_id, &maps).await.unwrap();
        assert_eq!(value(&resolution, "m.room.name", ""), Some("$name2"));
        assert!(resolution.rejected.is_empty());
        for (key, event_id) in room.base_state().iter() {
            assert_eq!(resolution.state.get_by_key(key), Some(event_id));
        }
    }

    #[test(tokio::test)]
    async fn test_ban_beats_join() {
        let mut room = TestRoom::base();
        room.set_time(100);
        room.member("$jd", "@dave:example.org", "@dave:example.org", "join", &["$create", "$ijr", "$ipower"]);
        room.set_time(200);
        room.member("$bd", ALICE, "@dave:example.org", "ban", &["$create", "$ipower", "$ima"]);

        let maps = vec![room.base_state_with(&["$jd"]), room.base_state_with(&["$bd"])];
        let resolution = resolver(&room).resolve(&room.room_id, &maps).await.unwrap();

        assert_eq!(value(&resolution, event_type::MEMBER, "@dave:example.org"), Some("$bd"));
        assert!(resolution.is_rejected(&eid("$jd")));
        assert!(!resolution.is_rejected(&eid("$bd")));
    }

    #[test(tokio::test)]
    async fn test_revoked_power_rejects_power_levels_change() {
        let mut room = TestRoom::base();
        room.set_time(100);
        room.state("$pa", ALICE, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 0 } }), &["$create", "$ima", "$ipower"]);
        room.set_time(200);
        room.state("$pb", BOB, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50, CHARLIE: 50 } }), &["$create", "$imb", "$ipower"]);

        let maps = vec![room.base_state_with(&["$pa"]), room.base_state_with(&["$pb"])];
        let resolution = resolver(&room).resolve(&room.room_id, &maps).await.unwrap();

        assert_eq!(value(&resolution, event_type::POWER_LEVELS, ""), Some("$pa"));
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].event_id, eid("$pb"));
        assert!(matches!(resolution.rejected[0].reason, RejectionReason::InsufficientPower { .. }));
    }

    #[test(tokio::test)]
    async fn test_event_citing_rejected_power_levels_is_checked_against_resolved_state() {
        let mut room = TestRoom::base();
        room.set_time(100);
        room.state(
            "$pa",
            ALICE,
            event_type::POWER_LEVELS,
            "",
            json!({ "users": { ALICE: 100, BOB: 0 }, "events": { "m.room.topic": 0 } }),
            &["$create", "$ima", "$ipower"],
        );
        room.set_time(200);
        room.state("$pb", BOB, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50, CHARLIE: 50 } }), &["$create", "$imb", "$ipower"]);
        room.state("$tc", CHARLIE, "m.room.topic", "", json!({ "topic": "charlie" }), &["$create", "$imc", "$pb"]);

        let maps = vec![room.base_state_with(&["$pa"]), room.base_state_with(&["$pb", "$tc"])];
        let resolution = resolver(&room).resolve(&room.room_id, &maps).await.unwrap();

        // $tc cites the rejected $pb but is allowed by $pa
        assert_eq!(value(&resolution, event_type::POWER_LEVELS, ""), Some("$pa"));
        assert_eq!(value(&resolution, "m.room.topic", ""), Some("$tc"));
        assert_eq!(resolution.rejected.len(), 1);
        assert_eq!(resolution.rejected[0].event_id, eid("$pb"));
    }

    #[test(tokio::test)]
    async fn test_auth_events_outside_inputs_are_fetched() {
        let mut room = TestRoom::base();
        room.state("$pl2", ALICE, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50, CHARLIE: 50 } }), &["$create", "$ima", "$ipower"]);
        room.state("$pl3", ALICE, event_type::POWER_LEVELS, "", json!({ "users": { ALICE: 100, BOB: 50, CHARLIE: 50 }, "state_default": 40 }), &["$create", "$ima", "$pl2"]);
        room.state("$t0", ALICE, "m.room.topic", "", json!({ "topic": "old" }), &["$create", "$ima", "$ipower"]);
        room.state("$tc", CHARLIE, "m.room.topic", "", json!({ "topic": "new" }), &["$create", "$imc", "$pl2"]);

        let map1 = room.base_state_with(&["$pl3", "$tc"]);
        let map2 = room.base_state_with(&["$t0"]);
        assert!(!map1.contains_event(&eid("$pl2")) && !map2.contains_event(&eid("$pl2")));

        let resolution = resolver(&room).resolve(&room.room_id, &[map1, map2]).await.unwrap();
        assert_eq!(value(&resolution, event_type::POWER_LEVELS, ""), Some("$pl3"));
        assert_eq!(value(&resolution, "m.room.topic", ""), Some("$tc"));
        assert!(resolution.rejected.is_empty());
    }

    #[test(tokio::test)]
    async fn test_unconflicted_inputs_pass_through() {
        let room = TestRoom::base();
        let state = room.base_state();
        let resolution = resolver(&room).resolve(&room.room_id, &[state.clone(), state.clone()]).await.unwrap();
        assert_eq!(resolution.state, state);
    }

    #[test(tokio::test)]
    async fn test_commutative_and_deterministic() {
        let (room, maps) = name_race();
        let expected = resolve_with_arena(&room.room_id, &maps, &room.arena(), &StateResConfig::default()).unwrap();
        let expected_bytes = serde_json::to_vec(&expected.state).unwrap();

        let permutations = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in permutations {
            let shuffled: Vec<StateMap> = order.iter().map(|i| maps[*i].clone()).collect();
            let resolution = resolve_with_arena(&room.room_id, &shuffled, &room.arena(), &StateResConfig::default()).unwrap();
            assert_eq!(serde_json::to_vec(&resolution.state).unwrap(), expected_bytes);
            assert_eq!(resolution, expected);
        }
    }

    #[test(tokio::test)]
    async fn test_cache_hit_returns_same_resolution() {
        let (room, maps) = name_race();
        let resolver = resolver(&room);
        let first = resolver.resolve(&room.room_id, &maps).await.unwrap();
        let reversed: Vec<_> = maps.iter().rev().cloned().collect();
        let second = resolver.resolve(&room.room_id, &reversed).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        let stats = resolver.cache().stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test(tokio::test)]
    async fn test_store_failure_is_retryable_error() {
        let (room, maps) = name_race();
        let mut store = MockStore::new();
        store
            .expect_get_events()
            .returning(|ids| Err(MatrixonError::fetch(&ids[0], "database unavailable")));

        let resolver = Resolver::new(Arc::new(store), StateResConfig::default()).unwrap();
        let err = resolver.resolve(&room.room_id, &maps).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(resolver.cache().is_empty());
    }

    #[test(tokio::test)]
    async fn test_missing_event_is_not_treated_as_rejection() {
        let (room, maps) = name_race();
        let store = room.store();
        store.remove(&eid("$ipower"));
        let resolver = Resolver::new(store, StateResConfig::default()).unwrap();
        let err = resolver.resolve(&room.room_id, &maps).await.unwrap_err();
        assert!(matches!(err, MatrixonError::Fetch { ref event_id, .. } if event_id == "$ipower"));
    }

    #[test(tokio::test)]
    async fn test_cycle_fails_resolution() {
        let mut room = TestRoom::base();
        room.state("$x", ALICE, "m.room.topic", "", json!({}), &["$create", "$ima", "$y"]);
        room.state("$y", ALICE, "m.room.name", "", json!({}), &["$create", "$ima", "$x"]);
        let maps = vec![room.base_state_with(&["$x"]), room.base_state()];
        let err = resolver(&room).resolve(&room.room_id, &maps).await.unwrap_err();
        assert!(matches!(err, MatrixonError::GraphCorruption(_)));
    }

    #[test(tokio::test)]
    async fn test_foreign_event_is_invalid() {
        let mut room = TestRoom::base();
        room.foreign_event("$elsewhere", "!other:example.org");
        let mut map = room.base_state();
        map.insert(("m.room.topic".to_owned(), String::new()), eid("$elsewhere"));
        let err = resolver(&room).resolve(&room.room_id, &[map, room.base_state()]).await.unwrap_err();
        assert!(matches!(err, MatrixonError::InvalidEvent(_)));
    }

    #[test(tokio::test)]
    async fn test_unsupported_room_version() {
        let mut room = TestRoom::new();
        room.event_with_content("$create", ALICE, event_type::CREATE, Some(""), json!({ "creator": ALICE, "room_version": "1" }), &[]);
        let map = room.state_map(&["$create"]);
        let err = resolver(&room).resolve(&room.room_id, &[map]).await.unwrap_err();
        assert_eq!(err, MatrixonError::UnsupportedRoomVersion("1".into()));
    }

    #[test(tokio::test)]
    async fn test_check_single_event() {
        let mut room = TestRoom::base();
        room.state("$topic", CHARLIE, "m.room.topic", "", json!({}), &["$create", "$imc", "$ipower"]);
        room.state("$topic2", BOB, "m.room.topic", "", json!({}), &["$create", "$imb", "$ipower"]);
        let resolver = resolver(&room);

        let outcome = resolver.check_event(&room.get("$topic"), &room.base_state()).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::Rejected { reason: RejectionReason::InsufficientPower { .. }, .. }));

        let outcome = resolver.check_event(&room.get("$topic2"), &room.base_state()).await.unwrap();
        assert_eq!(outcome, AuthOutcome::Accepted(eid("$topic2")));

        let create = room.get("$create");
        assert!(resolver.check_event(&create, &StateMap::new()).await.unwrap().is_accepted());
    }
}
