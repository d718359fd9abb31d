//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::path::PathBuf;

use ruma::{EventId, OwnedEventId};

use matrixon_stateres::Fixture;

pub fn demo_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

/// Alice and bob fight over the room name while dave joins and is banned
pub fn conflicting_room() -> Fixture {
    Fixture::from_file(demo_path("conflicting_room.json")).unwrap()
}

pub fn eid(id: &str) -> OwnedEventId {
    EventId::parse(id).unwrap()
}
