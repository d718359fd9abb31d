//! Authorization rules for a single event
//!
//! [`check_auth_event_refs`] validates the auth events an event references;
//! [`check_event`] applies the room's rules against an auth event set that the
//! caller assembled (during resolution, the referenced events overridden by
//! the state accumulated so far).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use matrixon_core::{types::event_type, utils::server_name_of, Event, Membership, StateKey};

use super::{
    power_levels::{self, PowerLevels, LEVEL_MAPS, NAMED_LEVELS},
    room_version::RoomVersionRules,
    RejectionReason,
};

type Verdict = Result<(), RejectionReason>;

/// The auth events of one event, keyed by `(type, state_key)`
#[derive(Debug, Clone, Default)]
pub struct AuthEvents(BTreeMap<StateKey, Arc<Event>>);

impl AuthEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a state event. Non-state events are ignored.
    pub fn insert(&mut self, event: Arc<Event>) {
        if let Some(key) = event.state_map_key() {
            self.0.insert(key, event);
        }
    }

    pub fn get(&self, kind: &str, state_key: &str) -> Option<&Arc<Event>> {
        self.0.get(&(kind.to_owned(), state_key.to_owned()))
    }

    pub fn create(&self) -> Option<&Arc<Event>> {
        self.get(event_type::CREATE, "")
    }

    pub fn power_levels(&self) -> Option<&Arc<Event>> {
        self.get(event_type::POWER_LEVELS, "")
    }

    /// Current join rule; `invite` when none is set
    pub fn join_rule(&self) -> &str {
        self.get(event_type::JOIN_RULES, "")
            .and_then(|e| e.content_str("join_rule"))
            .unwrap_or("invite")
    }

    pub fn membership_of(&self, user_id: &str) -> Option<Membership> {
        self.get(event_type::MEMBER, user_id)
            .and_then(|e| e.membership())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Arc<Event>> for AuthEvents {
    fn from_iter<I: IntoIterator<Item = Arc<Event>>>(iter: I) -> Self {
        let mut auth = Self::new();
        for event in iter {
            auth.insert(event);
        }
        auth
    }
}

fn state_key(kind: &str, state_key: &str) -> StateKey {
    (kind.to_owned(), state_key.to_owned())
}

/// The room creator named by a create event
pub fn room_creator<'a>(create: &'a Event, rules: &RoomVersionRules) -> Option<&'a str> {
    if rules.implicit_room_creator {
        Some(create.sender.as_str())
    } else {
        create.content_str("creator")
    }
}

/// Power levels in force for `auth`
pub fn effective_power_levels(auth: &AuthEvents, rules: &RoomVersionRules) -> PowerLevels {
    match auth.power_levels() {
        Some(event) => PowerLevels::from_content(&event.content),
        None => PowerLevels::without_event(auth.create().and_then(|c| room_creator(c, rules))),
    }
}

fn third_party_token(event: &Event) -> Option<&str> {
    event
        .content
        .get("third_party_invite")?
        .get("signed")?
        .get("token")?
        .as_str()
}

/// The state keys whose current values authorize `event`
pub fn auth_types_for_event(event: &Event, rules: &RoomVersionRules) -> Vec<StateKey> {
    if event.kind == event_type::CREATE {
        return Vec::new();
    }

    let mut types = vec![
        state_key(event_type::POWER_LEVELS, ""),
        state_key(event_type::MEMBER, event.sender.as_str()),
        state_key(event_type::CREATE, ""),
    ];

    if let Some(membership) = event.membership() {
        if matches!(membership, Membership::Join | Membership::Invite | Membership::Knock) {
            types.push(state_key(event_type::JOIN_RULES, ""));
        }
        if let Some(target) = &event.state_key {
            types.push(state_key(event_type::MEMBER, target));
        }
        if membership == Membership::Invite {
            if let Some(token) = third_party_token(event) {
                types.push(state_key(event_type::THIRD_PARTY_INVITE, token));
            }
        }
        if membership == Membership::Join && rules.restricted_join_rule {
            if let Some(authoriser) = event.content_str("join_authorised_via_users_server") {
                types.push(state_key(event_type::MEMBER, authoriser));
            }
        }
    }

    types.sort();
    types.dedup();
    types
}

/// Checks the auth events `event` references: same room, state events only,
/// one per key, only keys its type requires, and the create event present.
pub fn check_auth_event_refs(
    event: &Event,
    auth_events: &[Arc<Event>],
    rules: &RoomVersionRules,
) -> Verdict {
    if event.kind == event_type::CREATE {
        return Ok(());
    }

    let allowed = auth_types_for_event(event, rules);
    let mut seen = BTreeSet::new();
    for auth_event in auth_events {
        if auth_event.room_id != event.room_id {
            return Err(RejectionReason::AuthEventWrongRoom(auth_event.event_id.clone()));
        }
        let Some(key) = auth_event.state_map_key() else {
            return Err(RejectionReason::MalformedContent(format!(
                "auth event {} is not a state event",
                auth_event.event_id
            )));
        };
        if seen.contains(&key) {
            return Err(RejectionReason::DuplicateAuthEvent {
                kind: key.0,
                state_key: key.1,
            });
        }
        if !allowed.contains(&key) {
            return Err(RejectionReason::UnexpectedAuthEvent {
                kind: key.0,
                state_key: key.1,
            });
        }
        seen.insert(key);
    }

    if !seen.contains(&state_key(event_type::CREATE, "")) {
        return Err(RejectionReason::MissingCreateEvent);
    }
    Ok(())
}

/// Applies the authorization rules to `event` given its auth event set
pub fn check_event(event: &Event, auth: &AuthEvents, rules: &RoomVersionRules) -> Verdict {
    trace!(event_id = %event.event_id, kind = %event.kind, "Checking event authorization");

    if event.kind == event_type::CREATE {
        return check_create(event);
    }

    let create = auth.create().ok_or(RejectionReason::MissingCreateEvent)?;
    check_federation(event.sender.as_str(), create)?;

    if event.kind == event_type::MEMBER {
        return check_membership(event, auth, rules);
    }

    let sender = event.sender.as_str();
    if auth.membership_of(sender) != Some(Membership::Join) {
        return Err(RejectionReason::SenderNotJoined(sender.to_owned()));
    }

    let levels = effective_power_levels(auth, rules);
    let user_level = levels.user_level(sender);

    if event.kind == event_type::THIRD_PARTY_INVITE {
        return require_level(levels.invite, user_level);
    }

    require_level(levels.send_level(&event.kind, event.is_state()), user_level)?;

    if let Some(state_key) = event.state_key.as_deref() {
        if state_key.starts_with('@') && state_key != sender {
            return Err(RejectionReason::StateKeyNotSender(state_key.to_owned()));
        }
    }

    if event.kind == event_type::POWER_LEVELS {
        check_power_levels(event, auth, rules, user_level)?;
    }

    Ok(())
}

fn require_level(required: i64, actual: i64) -> Verdict {
    if actual < required {
        return Err(RejectionReason::InsufficientPower { required, actual });
    }
    Ok(())
}

/// Rules for `m.room.create`; the event carries its own room version.
pub fn check_create(event: &Event) -> Verdict {
    if !event.prev_events.is_empty() {
        return Err(RejectionReason::InvalidCreateEvent(
            "create event has prev_events".into(),
        ));
    }
    if server_name_of(event.room_id.as_str()) != server_name_of(event.sender.as_str()) {
        return Err(RejectionReason::InvalidCreateEvent(
            "room id and sender belong to different servers".into(),
        ));
    }
    let rules = RoomVersionRules::from_create_event(event)
        .map_err(|e| RejectionReason::InvalidCreateEvent(e.to_string()))?;
    if !rules.implicit_room_creator && event.content.get("creator").is_none() {
        return Err(RejectionReason::InvalidCreateEvent(
            "creator is missing".into(),
        ));
    }
    Ok(())
}

fn check_federation(user_id: &str, create: &Event) -> Verdict {
    let federates = create
        .content
        .get("m.federate")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !federates && server_name_of(user_id) != server_name_of(create.sender.as_str()) {
        return Err(RejectionReason::NotFederatable);
    }
    Ok(())
}

fn check_membership(event: &Event, auth: &AuthEvents, rules: &RoomVersionRules) -> Verdict {
    let membership = event
        .membership()
        .ok_or_else(|| RejectionReason::MalformedContent("membership is missing".into()))?;
    let target = event.state_key.as_deref().ok_or_else(|| {
        RejectionReason::MalformedContent("member event without state key".into())
    })?;
    let sender = event.sender.as_str();

    // The creator joining straight after creating the room
    if membership == Membership::Join && event.prev_events.len() == 1 {
        if let Some(create) = auth.create() {
            if event.prev_events[0] == create.event_id && room_creator(create, rules) == Some(target) {
                return Ok(());
            }
        }
    }

    if let Some(create) = auth.create() {
        check_federation(target, create)?;
    }

    let caller = auth.membership_of(sender);
    let caller_in_room = caller == Some(Membership::Join);
    let caller_invited = caller == Some(Membership::Invite);
    let caller_knocked = caller == Some(Membership::Knock);
    let target_membership = auth.membership_of(target);
    let target_in_room = target_membership == Some(Membership::Join);
    let target_banned = target_membership == Some(Membership::Ban);

    let levels = effective_power_levels(auth, rules);
    let user_level = levels.user_level(sender);
    let target_level = levels.user_level(target);
    let join_rule = auth.join_rule();

    if membership == Membership::Invite && event.content.get("third_party_invite").is_some() {
        verify_third_party_invite(event, target, auth)?;
        if target_banned {
            return Err(denied(format!("{} is banned from the room", target)));
        }
        return Ok(());
    }

    if !matches!(membership, Membership::Join | Membership::Knock) {
        if (caller_invited || caller_knocked) && membership == Membership::Leave && target == sender {
            return Ok(());
        }
        if !caller_in_room {
            return Err(RejectionReason::SenderNotJoined(sender.to_owned()));
        }
    }

    match membership {
        Membership::Invite => {
            if target_banned {
                return Err(denied(format!("{} is banned from the room", target)));
            }
            if target_in_room {
                return Err(denied(format!("{} is already in the room", target)));
            }
            require_level(levels.invite, user_level)
        }
        Membership::Join => {
            if sender != target {
                return Err(denied("cannot force another user to join".into()));
            }
            if target_banned {
                return Err(denied(format!("{} is banned from the room", target)));
            }
            match join_rule {
                "public" => Ok(()),
                "restricted" if rules.restricted_join_rule => {
                    check_restricted_join(event, auth, &levels, caller_in_room || caller_invited)
                }
                "knock_restricted" if rules.knock_restricted_join_rule => {
                    check_restricted_join(event, auth, &levels, caller_in_room || caller_invited)
                }
                "knock" if rules.knock_join_rule => invited_or_joined(caller_in_room, caller_invited),
                "invite" => invited_or_joined(caller_in_room, caller_invited),
                other => Err(denied(format!("join rule {} does not allow joining", other))),
            }
        }
        Membership::Leave => {
            if target_banned && user_level < levels.ban {
                return Err(denied(format!("cannot unban {}", target)));
            }
            if target != sender && (user_level < levels.kick || user_level <= target_level) {
                return Err(denied(format!("cannot kick {}", target)));
            }
            Ok(())
        }
        Membership::Ban => {
            require_level(levels.ban, user_level)?;
            if user_level <= target_level {
                return Err(denied(format!("cannot ban {}", target)));
            }
            Ok(())
        }
        Membership::Knock if rules.knock_join_rule => {
            let knockable = join_rule == "knock"
                || (rules.knock_restricted_join_rule && join_rule == "knock_restricted");
            if !knockable {
                return Err(denied(format!("join rule {} does not allow knocking", join_rule)));
            }
            if target != sender {
                return Err(denied("cannot knock for another user".into()));
            }
            if target_in_room {
                return Err(denied(format!("{} is already in the room", target)));
            }
            if caller_invited {
                return Err(denied(format!("{} is already invited", target)));
            }
            if target_banned {
                return Err(denied(format!("{} is banned from the room", target)));
            }
            Ok(())
        }
        other => Err(denied(format!("unknown membership {}", other))),
    }
}

fn denied(msg: String) -> RejectionReason {
    RejectionReason::Membership(msg)
}

fn invited_or_joined(caller_in_room: bool, caller_invited: bool) -> Verdict {
    if caller_in_room || caller_invited {
        Ok(())
    } else {
        Err(denied("not invited to this room".into()))
    }
}

fn check_restricted_join(
    event: &Event,
    auth: &AuthEvents,
    levels: &PowerLevels,
    already_allowed: bool,
) -> Verdict {
    if already_allowed {
        return Ok(());
    }
    let authoriser = event
        .content_str("join_authorised_via_users_server")
        .ok_or_else(|| denied("restricted join without an authorising user".into()))?;
    if auth.membership_of(authoriser) != Some(Membership::Join) {
        return Err(RejectionReason::SenderNotJoined(authoriser.to_owned()));
    }
    require_level(levels.invite, levels.user_level(authoriser))
}

/// Structural check of an invite made through a third-party identifier.
///
/// Signature verification belongs to the event verification layer.
fn verify_third_party_invite(event: &Event, target: &str, auth: &AuthEvents) -> Verdict {
    let invalid = |why: &str| Err(denied(format!("invalid third-party invite: {}", why)));

    let Some(signed) = event
        .content
        .get("third_party_invite")
        .and_then(|tpi| tpi.get("signed"))
        .and_then(Value::as_object)
    else {
        return invalid("signed block is missing");
    };
    let (Some(mxid), Some(token)) = (
        signed.get("mxid").and_then(Value::as_str),
        signed.get("token").and_then(Value::as_str),
    ) else {
        return invalid("mxid or token is missing");
    };
    if mxid != target {
        return invalid("mxid does not match the invited user");
    }

    let Some(invite) = auth.get(event_type::THIRD_PARTY_INVITE, token) else {
        return invalid("no matching m.room.third_party_invite");
    };
    if invite.sender != event.sender {
        return invalid("invite was sent by another user");
    }

    let has_signatures = signed
        .get("signatures")
        .and_then(Value::as_object)
        .is_some_and(|s| !s.is_empty());
    if !has_signatures {
        return invalid("signatures are missing");
    }

    let has_public_key = invite.content.get("public_key").is_some()
        || invite
            .content
            .get("public_keys")
            .and_then(Value::as_array)
            .is_some_and(|keys| !keys.is_empty());
    if !has_public_key {
        return invalid("m.room.third_party_invite has no public key");
    }

    Ok(())
}

fn level_at(content: &Value, map: Option<&str>, name: &str) -> Option<i64> {
    let location = match map {
        Some(map) => content.get(map)?,
        None => content,
    };
    location.get(name).and_then(|v| power_levels::parse_level(v, false))
}

fn map_keys<'a>(content: &'a Value, map: &str) -> impl Iterator<Item = &'a String> {
    content
        .get(map)
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|entries| entries.keys())
}

fn check_power_levels(
    event: &Event,
    auth: &AuthEvents,
    rules: &RoomVersionRules,
    user_level: i64,
) -> Verdict {
    power_levels::validate_content(&event.content, rules)?;

    let Some(current) = auth.power_levels() else {
        return Ok(());
    };
    let old = &current.content;
    let new = &event.content;

    let mut checks: Vec<(Option<&str>, &str)> =
        NAMED_LEVELS.iter().map(|name| (None, *name)).collect();
    for map in LEVEL_MAPS {
        let keys: BTreeSet<&String> = map_keys(old, map).chain(map_keys(new, map)).collect();
        checks.extend(keys.into_iter().map(|key| (Some(map), key.as_str())));
    }

    for (map, name) in checks {
        let old_level = level_at(old, map, name);
        let new_level = level_at(new, map, name);
        if old_level.is_some() && old_level == new_level {
            continue;
        }

        if map == Some("users") && name != event.sender.as_str() && old_level == Some(user_level) {
            return Err(RejectionReason::InvalidPowerLevels(format!(
                "cannot change the level of {} which equals the sender's",
                name
            )));
        }

        if let Some(level) = [old_level, new_level].into_iter().flatten().find(|l| *l > user_level) {
            return Err(RejectionReason::InsufficientPower {
                required: level,
                actual: user_level,
            });
        }
    }

    Ok(())
}
