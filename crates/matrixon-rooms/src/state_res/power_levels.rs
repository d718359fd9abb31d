//! Parsed view of `m.room.power_levels` content

use std::collections::BTreeMap;

use ruma::UserId;
use serde_json::{Map, Value};

use super::{room_version::RoomVersionRules, RejectionReason};

/// Top-level levels every power levels event may set
pub const NAMED_LEVELS: [&str; 7] = [
    "users_default",
    "events_default",
    "state_default",
    "ban",
    "redact",
    "kick",
    "invite",
];

/// Level maps keyed by user id, event type or notification kind
pub const LEVEL_MAPS: [&str; 3] = ["users", "events", "notifications"];

/// Effective power levels of a room.
///
/// Entries that fail to parse fall back to their default. Strict validation of
/// a new power levels event is done by [`validate_content`] before it is
/// accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerLevels {
    pub ban: i64,
    pub invite: i64,
    pub kick: i64,
    pub redact: i64,
    pub events_default: i64,
    pub state_default: i64,
    pub users_default: i64,
    pub events: BTreeMap<String, i64>,
    pub notifications: BTreeMap<String, i64>,
    pub users: BTreeMap<String, i64>,
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            ban: 50,
            invite: 0,
            kick: 50,
            redact: 50,
            events_default: 0,
            state_default: 50,
            users_default: 0,
            events: BTreeMap::new(),
            notifications: BTreeMap::new(),
            users: BTreeMap::new(),
        }
    }
}

impl PowerLevels {
    pub fn from_content(content: &Value) -> Self {
        let defaults = Self::default();
        let named = |name: &str, default: i64| {
            content
                .get(name)
                .and_then(|v| parse_level(v, false))
                .unwrap_or(default)
        };
        let map = |name: &str| -> BTreeMap<String, i64> {
            content
                .get(name)
                .and_then(Value::as_object)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|(k, v)| parse_level(v, false).map(|level| (k.clone(), level)))
                        .collect()
                })
                .unwrap_or_default()
        };

        Self {
            ban: named("ban", defaults.ban),
            invite: named("invite", defaults.invite),
            kick: named("kick", defaults.kick),
            redact: named("redact", defaults.redact),
            events_default: named("events_default", defaults.events_default),
            state_default: named("state_default", defaults.state_default),
            users_default: named("users_default", defaults.users_default),
            events: map("events"),
            notifications: map("notifications"),
            users: map("users"),
        }
    }

    /// Levels of a room that has no power levels event yet: the creator holds
    /// 100, everyone else 0, and any joined member may send anything.
    pub fn without_event(creator: Option<&str>) -> Self {
        let mut levels = Self {
            state_default: 0,
            events_default: 0,
            ..Self::default()
        };
        if let Some(creator) = creator {
            levels.users.insert(creator.to_owned(), 100);
        }
        levels
    }

    pub fn user_level(&self, user_id: &str) -> i64 {
        self.users.get(user_id).copied().unwrap_or(self.users_default)
    }

    /// Level required to send an event of `kind`
    pub fn send_level(&self, kind: &str, is_state: bool) -> i64 {
        match self.events.get(kind) {
            Some(level) => *level,
            None if is_state => self.state_default,
            None => self.events_default,
        }
    }
}

/// Reads one power level value.
///
/// Integers are always accepted; strings holding an integer only when
/// `integer_only` is off (room versions before 10).
pub fn parse_level(value: &Value, integer_only: bool) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if !integer_only => s.trim().parse().ok(),
        _ => None,
    }
}

/// Structural validation of a new power levels event
pub fn validate_content(content: &Value, rules: &RoomVersionRules) -> Result<(), RejectionReason> {
    let invalid = |msg: String| Err(RejectionReason::InvalidPowerLevels(msg));
    let strict = rules.integer_power_levels;

    for name in NAMED_LEVELS {
        if let Some(value) = content.get(name) {
            if parse_level(value, strict).is_none() {
                return invalid(format!("{} is not a valid power level: {}", name, value));
            }
        }
    }

    for name in LEVEL_MAPS {
        let Some(value) = content.get(name) else {
            continue;
        };
        let Some(entries) = value.as_object() else {
            return invalid(format!("{} must be an object", name));
        };
        check_level_map(name, entries, strict)?;
    }

    Ok(())
}

fn check_level_map(
    name: &str,
    entries: &Map<String, Value>,
    strict: bool,
) -> Result<(), RejectionReason> {
    for (key, value) in entries {
        if name == "users" && UserId::parse(key.as_str()).is_err() {
            return Err(RejectionReason::InvalidPowerLevels(format!(
                "not a valid user id: {}",
                key
            )));
        }
        if parse_level(value, strict).is_none() {
            return Err(RejectionReason::InvalidPowerLevels(format!(
                "{}.{} is not a valid power level: {}",
                name, key, value
            )));
        }
    }
    Ok(())
}
