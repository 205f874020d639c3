//! In-process change feed over `std::sync::mpsc`.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

use crate::db::events::events_since;
use crate::db::{ChangeEvent, Database, DbResult, EntityType};

const PUBLISH_BATCH: usize = 256;

/// Which events a subscriber wants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
}

impl ChangeFilter {
    /// Every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Every event for one kind of entity.
    pub fn entity_type(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: None,
        }
    }

    /// Events for a single entity.
    pub fn entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
        }
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        self.entity_type.map_or(true, |t| t == event.entity_type)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| id == event.entity_id)
    }
}

struct Subscriber {
    filter: ChangeFilter,
    sender: Sender<ChangeEvent>,
}

/// Delivers committed change events to subscribers.
///
/// The feed remembers the last sequence it published and re-reads the
/// outbox from there, so an event committed by any connection is delivered
/// at least once. Subscribers that replay a backlog may see an event twice.
pub struct ChangeFeed {
    subscribers: Mutex<Vec<Subscriber>>,
    last_published: Mutex<i64>,
}

impl ChangeFeed {
    /// Feed that starts publishing after `after_seq`.
    pub fn starting_after(after_seq: i64) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            last_published: Mutex::new(after_seq),
        }
    }

    /// Feed that only publishes events committed from now on.
    pub fn from_head(db: &Database) -> DbResult<Self> {
        Ok(Self::starting_after(db.latest_change_seq()?))
    }

    pub fn last_published(&self) -> i64 {
        *self.last_published.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber for events published from now on.
    pub fn subscribe(&self, filter: ChangeFilter) -> Receiver<ChangeEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { filter, sender });
        receiver
    }

    /// Register a subscriber and first replay matching events after
    /// `after_seq`. Events between the replay and the next publish can
    /// arrive twice.
    pub fn subscribe_from(
        &self,
        db: &Database,
        filter: ChangeFilter,
        after_seq: i64,
    ) -> DbResult<Receiver<ChangeEvent>> {
        let (sender, receiver) = mpsc::channel();
        let mut cursor = after_seq;
        loop {
            let batch = events_since(db.conn(), cursor, PUBLISH_BATCH)?;
            let Some(last) = batch.last() else { break };
            cursor = last.seq;
            for event in batch.into_iter().filter(|e| filter.matches(e)) {
                // Receiver is still in hand, so the send cannot fail
                let _ = sender.send(event);
            }
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { filter, sender });
        Ok(receiver)
    }

    /// Deliver every event committed since the last publish. Returns the
    /// number of events read from the outbox.
    ///
    /// Subscribers whose receiver was dropped are removed.
    pub fn publish(&self, db: &Database) -> DbResult<usize> {
        let mut last = self.last_published.lock().unwrap_or_else(PoisonError::into_inner);
        let mut published = 0;

        loop {
            let batch = events_since(db.conn(), *last, PUBLISH_BATCH)?;
            if batch.is_empty() {
                break;
            }
            let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
            for event in &batch {
                subscribers.retain(|s| !s.filter.matches(event) || s.sender.send(event.clone()).is_ok());
                *last = event.seq;
            }
            published += batch.len();
        }

        if published > 0 {
            tracing::debug!(published, last_seq = *last, "change events published");
        }
        Ok(published)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
