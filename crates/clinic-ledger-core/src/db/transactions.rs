//! Dispense transaction database operations (append-only).

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{conversion_error, Database, DbResult};
use crate::audit::chain_hash;
use crate::models::{lookup_key, Direction, DispenseTransaction, NewTransaction};

const TX_SELECT: &str = r#"
    SELECT t.seq, t.id, t.direction, t.medicine_id, t.classification, t.medicine_name,
           t.dosage_form, t.quantity, t.visit_record_id, t.patient_id, t.staff_id,
           t.note, t.created_at, t.prev_hash, t.entry_hash
    FROM dispense_transactions t
    JOIN medicines m ON m.id = t.medicine_id
"#;

#[derive(Debug)]
struct UnknownDirection(String);

impl std::fmt::Display for UnknownDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown direction '{}'", self.0)
    }
}

impl std::error::Error for UnknownDirection {}

fn map_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<DispenseTransaction> {
    let direction: String = row.get(2)?;
    Ok(DispenseTransaction {
        seq: row.get(0)?,
        id: row.get(1)?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| conversion_error(2, UnknownDirection(direction)))?,
        medicine_id: row.get(3)?,
        classification: row.get(4)?,
        medicine_name: row.get(5)?,
        dosage_form: row.get(6)?,
        quantity: row.get(7)?,
        visit_record_id: row.get(8)?,
        patient_id: row.get(9)?,
        staff_id: row.get(10)?,
        note: row.get(11)?,
        created_at: row.get(12)?,
        prev_hash: row.get(13)?,
        entry_hash: row.get(14)?,
    })
}

/// Filter for ledger queries. Timestamps are stored RFC 3339 strings, which
/// sort chronologically.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter<'a> {
    pub direction: Option<Direction>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<&'a str>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<&'a str>,
    pub medicine_id: Option<&'a str>,
    pub classification: Option<&'a str>,
    pub medicine_name: Option<&'a str>,
    pub dosage_form: Option<&'a str>,
    pub visit_record_id: Option<&'a str>,
}

/// Sequence number and hash of the newest entry.
pub fn chain_head(conn: &Connection) -> DbResult<Option<(i64, String)>> {
    conn.query_row(
        "SELECT seq, entry_hash FROM dispense_transactions ORDER BY seq DESC LIMIT 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(Into::into)
}

/// Append an entry, linking it to the current head of the chain.
///
/// Callers hold a write transaction so the head cannot move underneath them.
pub fn append_transaction(
    conn: &Connection,
    new: &NewTransaction,
    now: &str,
) -> DbResult<DispenseTransaction> {
    let (seq, prev_hash) = match chain_head(conn)? {
        Some((seq, hash)) => (seq + 1, hash),
        None => (1, String::new()),
    };

    let mut entry = DispenseTransaction {
        seq,
        id: uuid::Uuid::new_v4().to_string(),
        direction: new.direction,
        medicine_id: new.medicine_id.clone(),
        classification: new.classification.clone(),
        medicine_name: new.medicine_name.clone(),
        dosage_form: new.dosage_form.clone(),
        quantity: new.quantity,
        visit_record_id: new.links.visit_record_id.clone(),
        patient_id: new.links.patient_id.clone(),
        staff_id: new.links.staff_id.clone(),
        note: new.links.note.clone(),
        created_at: now.to_string(),
        prev_hash,
        entry_hash: String::new(),
    };
    entry.entry_hash = chain_hash(&entry.prev_hash, &entry.to_canonical_json()?);

    conn.execute(
        r#"
        INSERT INTO dispense_transactions (
            seq, id, direction, medicine_id, classification, medicine_name, dosage_form,
            quantity, visit_record_id, patient_id, staff_id, note, created_at,
            prev_hash, entry_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            entry.seq,
            entry.id,
            entry.direction.as_str(),
            entry.medicine_id,
            entry.classification,
            entry.medicine_name,
            entry.dosage_form,
            entry.quantity,
            entry.visit_record_id,
            entry.patient_id,
            entry.staff_id,
            entry.note,
            entry.created_at,
            entry.prev_hash,
            entry.entry_hash,
        ],
    )?;
    Ok(entry)
}

/// Entries matching a filter, in append order.
pub fn list_transactions(
    conn: &Connection,
    filter: &TransactionFilter<'_>,
) -> DbResult<Vec<DispenseTransaction>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();

    if let Some(direction) = filter.direction {
        clauses.push("t.direction = ?");
        values.push(direction.as_str().to_string());
    }
    if let Some(from) = filter.from {
        clauses.push("t.created_at >= ?");
        values.push(from.to_string());
    }
    if let Some(to) = filter.to {
        clauses.push("t.created_at < ?");
        values.push(to.to_string());
    }
    if let Some(medicine_id) = filter.medicine_id {
        clauses.push("t.medicine_id = ?");
        values.push(medicine_id.to_string());
    }
    if let Some(classification) = filter.classification {
        clauses.push("m.classification_key = ?");
        values.push(lookup_key(classification));
    }
    if let Some(name) = filter.medicine_name {
        clauses.push("m.name_key = ?");
        values.push(lookup_key(name));
    }
    if let Some(form) = filter.dosage_form {
        clauses.push("m.dosage_form_key = ?");
        values.push(lookup_key(form));
    }
    if let Some(visit_id) = filter.visit_record_id {
        clauses.push("t.visit_record_id = ?");
        values.push(visit_id.to_string());
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("{} {} ORDER BY t.seq ASC", TX_SELECT, where_clause);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map_transaction)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

impl Database {
    /// Entries matching a filter, in append order.
    pub fn list_transactions(
        &self,
        filter: &TransactionFilter<'_>,
    ) -> DbResult<Vec<DispenseTransaction>> {
        list_transactions(&self.conn, filter)
    }

    /// Number of ledger entries.
    pub fn transaction_count(&self) -> DbResult<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM dispense_transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}
