//! Matrix state resolution (v2)
//!
//! Given the state maps at every forward extremity of a room, compute the one
//! state every server holding the same events agrees on:
//!
//! 1. [`conflict`] splits the inputs into unconflicted entries and the full
//!    conflicted set (conflicting values plus the auth difference).
//! 2. [`auth_order`] sorts the conflicted power events topologically over
//!    `auth_events`, breaking ties by sender power, timestamp and event id.
//! 3. [`iterative`] replays them on top of the unconflicted state, applying
//!    the [`event_auth`] rules against the state accumulated so far.
//! 4. [`mainline`] orders the remaining events along the resolved power
//!    levels lineage and replays them the same way.
//! 5. [`resolver`] overlays the unconflicted entries and memoizes the result
//!    in the [`cache`].
//!
//! The algorithm runs over an [`arena`] prefetched before it starts, so it
//! never waits on the store once underway.

pub mod arena;
pub mod auth_order;
pub mod cache;
pub mod conflict;
pub mod event_auth;
pub mod iterative;
pub mod mainline;
pub mod power_levels;
pub mod resolver;
pub mod room_version;

use ruma::OwnedEventId;
use thiserror::Error;

use matrixon_core::StateMap;

pub use arena::EventArena;
pub use cache::{CacheKey, CacheStats, ResolutionCache};
pub use resolver::Resolver;
pub use room_version::RoomVersionRules;

/// Why an event failed authorization.
///
/// A rejection is an expected outcome of resolution, not a fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("no m.room.create event among the auth events")]
    MissingCreateEvent,

    #[error("invalid m.room.create event: {0}")]
    InvalidCreateEvent(String),

    #[error("duplicate auth event for ({kind}, {state_key:?})")]
    DuplicateAuthEvent { kind: String, state_key: String },

    #[error("auth event ({kind}, {state_key:?}) is not allowed for this event")]
    UnexpectedAuthEvent { kind: String, state_key: String },

    #[error("auth event {0} belongs to another room")]
    AuthEventWrongRoom(OwnedEventId),

    #[error("room does not federate with the sender's server")]
    NotFederatable,

    #[error("sender {0} is not joined to the room")]
    SenderNotJoined(String),

    #[error("sender power level {actual} is below the required {required}")]
    InsufficientPower { required: i64, actual: i64 },

    #[error("state key {0} can only be set by that user")]
    StateKeyNotSender(String),

    #[error("membership change not allowed: {0}")]
    Membership(String),

    #[error("invalid power levels: {0}")]
    InvalidPowerLevels(String),

    #[error("malformed event content: {0}")]
    MalformedContent(String),
}

/// Per-event authorization outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted(OwnedEventId),
    Rejected {
        event_id: OwnedEventId,
        reason: RejectionReason,
    },
}

impl AuthOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthOutcome::Accepted(_))
    }

    pub fn event_id(&self) -> &OwnedEventId {
        match self {
            AuthOutcome::Accepted(event_id) => event_id,
            AuthOutcome::Rejected { event_id, .. } => event_id,
        }
    }
}

/// An event excluded from the resolved state, kept for auditing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEvent {
    pub event_id: OwnedEventId,
    pub reason: RejectionReason,
}

/// Result of resolving a set of state maps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub state: StateMap,
    /// Sorted by event id
    pub rejected: Vec<RejectedEvent>,
}

impl Resolution {
    pub fn is_rejected(&self, event_id: &ruma::EventId) -> bool {
        self.rejected
            .iter()
            .any(|r| r.event_id.as_str() == event_id.as_str())
    }
}
