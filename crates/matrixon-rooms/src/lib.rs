// =============================================================================
// Matrixon Rooms Service Library
// =============================================================================
//
// Project: Matrixon - Ultra High Performance Matrix NextServer (Synapse Alternative)
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha
// License: Apache 2.0 / MIT
//
// Description:
//   Room state resolution (Matrix state resolution v2) and the per-room
//   current-state service built on top of it. Resolution is a pure function
//   of the candidate state maps and the prefetched event graph; the service
//   serializes updates per room and coalesces concurrent readers.
//
// =============================================================================

pub mod room_state;
pub mod state_res;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use matrixon_common::error::{MatrixonError, Result};
pub use room_state::RoomStateService;
pub use state_res::{
    AuthOutcome, RejectedEvent, RejectionReason, Resolution, ResolutionCache, Resolver,
    RoomVersionRules,
};
pub use store::MemoryEventStore;
