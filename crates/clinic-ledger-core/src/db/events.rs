//! Change-event outbox.
//!
//! Mutations append a row here inside their own transaction, so an event
//! exists if and only if the change it describes was committed.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{conversion_error, Database, DbResult};

/// Kind of entity a change event refers to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Patient,
    Visit,
    Lot,
    Medicine,
    Transaction,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Patient => "patient",
            EntityType::Visit => "visit",
            EntityType::Lot => "lot",
            EntityType::Medicine => "medicine",
            EntityType::Transaction => "transaction",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(EntityType::Patient),
            "visit" => Some(EntityType::Visit),
            "lot" => Some(EntityType::Lot),
            "medicine" => Some(EntityType::Medicine),
            "transaction" => Some(EntityType::Transaction),
            _ => None,
        }
    }
}

/// A committed change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Monotonic sequence number
    pub seq: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Short verb, e.g. "queued", "completed", "decremented"
    pub change: String,
    pub created_at: String,
}

#[derive(Debug)]
struct UnknownEntityType(String);

impl std::fmt::Display for UnknownEntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown entity type '{}'", self.0)
    }
}

impl std::error::Error for UnknownEntityType {}

/// Append a change event. Returns its sequence number.
pub fn record_change(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    change: &str,
    now: &str,
) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO change_events (entity_type, entity_id, change, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![entity_type.as_str(), entity_id, change, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Events after `after_seq`, oldest first.
pub fn events_since(conn: &Connection, after_seq: i64, limit: usize) -> DbResult<Vec<ChangeEvent>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT seq, entity_type, entity_id, change, created_at
        FROM change_events
        WHERE seq > ?1
        ORDER BY seq ASC
        LIMIT ?2
        "#,
    )?;
    let rows = stmt.query_map(params![after_seq, limit as i64], |row| {
        let entity_type: String = row.get(1)?;
        Ok(ChangeEvent {
            seq: row.get(0)?,
            entity_type: EntityType::parse(&entity_type)
                .ok_or_else(|| conversion_error(1, UnknownEntityType(entity_type)))?,
            entity_id: row.get(2)?,
            change: row.get(3)?,
            created_at: row.get(4)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

impl Database {
    /// Events after `after_seq`, oldest first.
    pub fn changes_since(&self, after_seq: i64, limit: usize) -> DbResult<Vec<ChangeEvent>> {
        events_since(&self.conn, after_seq, limit)
    }

    /// Highest committed event sequence (0 when empty).
    pub fn latest_change_seq(&self) -> DbResult<i64> {
        let seq = self.conn.query_row(
            "SELECT COALESCE(MAX(seq), 0) FROM change_events",
            [],
            |row| row.get(0),
        )?;
        Ok(seq)
    }
}
