//! Per room version authorization rule flags

use serde_json::Value;

use matrixon_core::{Event, MatrixonError, Result};

/// Rule differences between the supported room versions (6 through 11)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomVersionRules {
    pub version: &'static str,
    /// `knock` membership and join rule (v7+)
    pub knock_join_rule: bool,
    /// `restricted` join rule (v8+)
    pub restricted_join_rule: bool,
    /// `knock_restricted` join rule (v10+)
    pub knock_restricted_join_rule: bool,
    /// Power levels must be JSON integers, not numeric strings (v10+)
    pub integer_power_levels: bool,
    /// The creator is the create event's sender; `content.creator` is ignored (v11)
    pub implicit_room_creator: bool,
}

impl RoomVersionRules {
    pub const V6: Self = Self {
        version: "6",
        knock_join_rule: false,
        restricted_join_rule: false,
        knock_restricted_join_rule: false,
        integer_power_levels: false,
        implicit_room_creator: false,
    };

    pub const V7: Self = Self {
        version: "7",
        knock_join_rule: true,
        ..Self::V6
    };

    pub const V8: Self = Self {
        version: "8",
        restricted_join_rule: true,
        ..Self::V7
    };

    pub const V9: Self = Self {
        version: "9",
        ..Self::V8
    };

    pub const V10: Self = Self {
        version: "10",
        knock_restricted_join_rule: true,
        integer_power_levels: true,
        ..Self::V9
    };

    pub const V11: Self = Self {
        version: "11",
        implicit_room_creator: true,
        ..Self::V10
    };

    pub fn for_version(version: &str) -> Result<Self> {
        match version {
            "6" => Ok(Self::V6),
            "7" => Ok(Self::V7),
            "8" => Ok(Self::V8),
            "9" => Ok(Self::V9),
            "10" => Ok(Self::V10),
            "11" => Ok(Self::V11),
            other => Err(MatrixonError::UnsupportedRoomVersion(other.to_owned())),
        }
    }

    pub fn is_supported(version: &str) -> bool {
        Self::for_version(version).is_ok()
    }

    /// Rules of the room a create event starts. A missing `room_version`
    /// means version 1.
    pub fn from_create_event(create: &Event) -> Result<Self> {
        let version = create
            .content
            .get("room_version")
            .and_then(Value::as_str)
            .unwrap_or("1");
        Self::for_version(version)
    }
}
