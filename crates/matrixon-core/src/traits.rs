//! Core traits for Matrixon
//!
//! The event store is the one external collaborator of state resolution:
//! it hands out already-verified, already-persisted events by id.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ruma::{EventId, OwnedEventId};
use tracing::debug;

use crate::{types::Event, MatrixonError, Result};

/// Read-only access to persisted events.
///
/// Implementations report store faults as [`MatrixonError::Fetch`], which
/// callers treat as retryable. An event that is simply unknown is omitted from
/// [`get_events`](EventStore::get_events); the callers that need it turn the
/// gap into a fetch error.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Batched point lookup. Unknown ids are skipped.
    async fn get_events(&self, event_ids: &[OwnedEventId]) -> Result<Vec<Arc<Event>>>;

    /// Point lookup of a single event that must exist
    async fn get_event(&self, event_id: &EventId) -> Result<Arc<Event>> {
        self.get_events(&[event_id.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MatrixonError::fetch(event_id, "event not found in store"))
    }

    /// Loads `event_ids` and their full transitive `auth_events` closure.
    ///
    /// Walks breadth first, one batched lookup per `batch_size` ids. Fails with
    /// a fetch error if any referenced event is missing and with
    /// [`MatrixonError::GraphCorruption`] if the chain is deeper than
    /// `max_depth` levels.
    async fn auth_chain_closure(
        &self,
        event_ids: &[OwnedEventId],
        batch_size: usize,
        max_depth: usize,
    ) -> Result<Vec<Arc<Event>>> {
        let batch_size = batch_size.max(1);
        let mut seen: HashSet<OwnedEventId> = event_ids.iter().cloned().collect();
        let mut frontier: Vec<OwnedEventId> = seen.iter().cloned().collect();
        frontier.sort();
        let mut loaded = Vec::new();
        let mut depth = 0usize;

        while !frontier.is_empty() {
            if depth > max_depth {
                return Err(MatrixonError::GraphCorruption(format!(
                    "auth chain exceeds {} levels",
                    max_depth
                )));
            }

            let mut next = Vec::new();
            for batch in frontier.chunks(batch_size) {
                let events = self.get_events(batch).await?;
                if events.len() < batch.len() {
                    let found: HashSet<&EventId> =
                        events.iter().map(|e| &*e.event_id).collect();
                    let missing = batch
                        .iter()
                        .find(|id| !found.contains(&***id))
                        .map(|id| id.to_string())
                        .unwrap_or_default();
                    return Err(MatrixonError::fetch(
                        missing,
                        "referenced event not found in store",
                    ));
                }

                for event in events {
                    for auth_id in &event.auth_events {
                        if seen.insert(auth_id.clone()) {
                            next.push(auth_id.clone());
                        }
                    }
                    loaded.push(event);
                }
            }

            debug!(depth, loaded = loaded.len(), next = next.len(), "Auth chain level fetched");
            next.sort();
            frontier = next;
            depth += 1;
        }

        Ok(loaded)
    }
}
