//! Current room state
//!
//! Tracks, per room, the state maps at the forward extremities and the state
//! resolved from them. At most one resolution runs per room at a time;
//! callers asking while one runs wait for that same computation. When the
//! extremities change mid-flight, the running result is thrown away once it
//! lands and the next resolution starts only then, from the latest
//! candidates.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use ruma::{OwnedRoomId, RoomId};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use matrixon_core::{MatrixonError, Result, StateMap};

use crate::state_res::{Resolution, Resolver};

type SharedResolution = Shared<BoxFuture<'static, Result<Arc<Resolution>>>>;

struct InFlight {
    generation: u64,
    future: SharedResolution,
}

#[derive(Default)]
struct RoomSlot {
    candidates: Vec<StateMap>,
    /// Bumped by every extremity update; 0 until the first one
    generation: u64,
    current: Option<(u64, Arc<Resolution>)>,
    in_flight: Option<InFlight>,
}

pub struct RoomStateService {
    resolver: Arc<Resolver>,
    rooms: RwLock<HashMap<OwnedRoomId, Arc<Mutex<RoomSlot>>>>,
}

impl RoomStateService {
    pub fn new(resolver: Arc<Resolver>) -> Self {
        Self {
            resolver,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    async fn slot(&self, room_id: &RoomId) -> Option<Arc<Mutex<RoomSlot>>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    async fn slot_or_insert(&self, room_id: &RoomId) -> Arc<Mutex<RoomSlot>> {
        if let Some(slot) = self.slot(room_id).await {
            return slot;
        }
        Arc::clone(
            self.rooms
                .write()
                .await
                .entry(room_id.to_owned())
                .or_default(),
        )
    }

    /// Replaces the candidate state maps of a room and returns the new
    /// generation. A resolution still running for older candidates is left to
    /// finish but its result will not be used.
    #[instrument(skip(self, state_maps), fields(inputs = state_maps.len()))]
    pub async fn update_extremities(&self, room_id: &RoomId, state_maps: Vec<StateMap>) -> u64 {
        let slot = self.slot_or_insert(room_id).await;
        let mut slot = slot.lock().await;
        slot.candidates = state_maps;
        slot.generation += 1;

        if slot.in_flight.is_some() {
            debug!(generation = slot.generation, "Extremities changed during resolution");
        }
        slot.generation
    }

    /// Generation of the room's candidates; 0 for unknown rooms
    pub async fn generation(&self, room_id: &RoomId) -> u64 {
        match self.slot(room_id).await {
            Some(slot) => slot.lock().await.generation,
            None => 0,
        }
    }

    /// The room's state for its latest candidates, resolving if needed.
    /// A running resolution is always awaited before another one starts.
    #[instrument(skip(self))]
    pub async fn current_state(&self, room_id: &RoomId) -> Result<Arc<Resolution>> {
        let slot = self
            .slot(room_id)
            .await
            .ok_or_else(|| MatrixonError::NotFound(format!("no state known for room {}", room_id)))?;

        loop {
            let (generation, future) = {
                let mut guard = slot.lock().await;
                if let Some((generation, resolution)) = &guard.current {
                    if *generation == guard.generation {
                        return Ok(Arc::clone(resolution));
                    }
                }

                let joined = guard
                    .in_flight
                    .as_ref()
                    .map(|in_flight| (in_flight.generation, in_flight.future.clone()));
                match joined {
                    Some(joined) => joined,
                    None => {
                        let generation = guard.generation;
                        (generation, self.start_resolution(room_id, &mut guard))
                    }
                }
            };

            let result = future.await;

            let mut guard = slot.lock().await;
            if guard
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.generation == generation)
            {
                guard.in_flight = None;
            }

            if guard.generation != generation {
                counter!("matrixon_stateres_stale_results_total").increment(1);
                info!(generation, latest = guard.generation, "♻️ Discarding stale resolution");
                continue;
            }
            match result {
                Ok(resolution) => {
                    guard.current = Some((generation, Arc::clone(&resolution)));
                    return Ok(resolution);
                }
                Err(e) => {
                    warn!(error = %e, retryable = e.is_retryable(), "Room state resolution failed");
                    return Err(e);
                }
            }
        }
    }

    fn start_resolution(&self, room_id: &RoomId, slot: &mut RoomSlot) -> SharedResolution {
        let resolver = Arc::clone(&self.resolver);
        let room_id = room_id.to_owned();
        let state_maps = slot.candidates.clone();
        let generation = slot.generation;
        debug!(generation, "Starting resolution");

        let handle = tokio::spawn(async move { resolver.resolve(&room_id, &state_maps).await });
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(MatrixonError::Internal(format!("resolution task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        slot.in_flight = Some(InFlight {
            generation,
            future: future.clone(),
        });
        future
    }
}
