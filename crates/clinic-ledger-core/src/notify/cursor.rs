//! Idempotent application of change events.

use std::collections::HashMap;

use crate::db::{ChangeEvent, EntityType};

/// Tracks the newest event applied per entity.
///
/// A consumer fed by both `changes_since` polling and a [`ChangeFeed`](super::ChangeFeed)
/// subscription calls [`ChangeCursor::accept`] before acting on an event and
/// skips it when that returns `false`.
#[derive(Debug, Clone, Default)]
pub struct ChangeCursor {
    seen: HashMap<(EntityType, String), i64>,
    /// Events at or below this were applied before the cursor existed
    floor: i64,
    position: i64,
}

impl ChangeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor for a consumer that already holds state up to `seq`.
    pub fn resume_at(seq: i64) -> Self {
        Self {
            seen: HashMap::new(),
            floor: seq,
            position: seq,
        }
    }

    /// Highest sequence accepted; pass to `changes_since` on reconnect.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Record `event` and report whether it is new for its entity.
    pub fn accept(&mut self, event: &ChangeEvent) -> bool {
        if event.seq <= self.floor {
            return false;
        }
        let last = self.seen.entry(Self::key(event)).or_insert(0);
        if event.seq <= *last {
            return false;
        }
        *last = event.seq;
        self.position = self.position.max(event.seq);
        true
    }

    /// Events from `events` not yet applied, in the order given.
    pub fn fresh<'e>(&mut self, events: impl IntoIterator<Item = &'e ChangeEvent>) -> Vec<&'e ChangeEvent> {
        events.into_iter().filter(|e| self.accept(e)).collect()
    }

    fn key(event: &ChangeEvent) -> (EntityType, String) {
        (event.entity_type, event.entity_id.clone())
    }
}
