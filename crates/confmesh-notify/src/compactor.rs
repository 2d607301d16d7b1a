//! Batch compaction for the event log.
//!
//! Events are triggers to re-read state, so within one batch only the most
//! recent event per `(topic, module)` key matters. A ready and a disconnect
//! of the same module trigger the same re-read and share a key. Earlier
//! duplicates are dropped; survivors keep their relative order.

use std::collections::HashSet;

use confmesh_store::Event;

/// Keeps the last event per key, preserving the order of survivors.
pub fn compact(events: Vec<Event>) -> Vec<Event> {
    let mut seen = HashSet::with_capacity(events.len());
    let mut kept: Vec<Event> = events
        .into_iter()
        .rev()
        .filter(|e| seen.insert(e.key()))
        .collect();
    kept.reverse();
    kept
}
