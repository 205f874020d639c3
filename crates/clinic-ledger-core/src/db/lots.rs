//! Inventory lot database operations.
//!
//! Quantity changes go through [`compare_and_set_quantity`], which bumps the
//! lot's version and refuses to write over a version it did not read.

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{date_column, Database, DbError, DbResult};
use crate::clock::format_date;
use crate::models::{lookup_key, InventoryLot};

const LOT_SELECT: &str = r#"
    SELECT l.id, l.medicine_id, m.classification, m.name, m.dosage_form,
           l.quantity, l.expiration_date, l.version, l.received_at
    FROM inventory_lots l
    JOIN medicines m ON m.id = l.medicine_id
"#;

/// FEFO order; ties broken by intake time then ID so the walk is deterministic.
const FEFO_ORDER: &str = "ORDER BY l.expiration_date ASC, l.received_at ASC, l.id ASC";

fn map_lot(row: &rusqlite::Row<'_>) -> rusqlite::Result<InventoryLot> {
    Ok(InventoryLot {
        id: row.get(0)?,
        medicine_id: row.get(1)?,
        classification: row.get(2)?,
        medicine_name: row.get(3)?,
        dosage_form: row.get(4)?,
        quantity: row.get(5)?,
        expiration_date: date_column(row, 6)?,
        version: row.get(7)?,
        received_at: row.get(8)?,
    })
}

/// Filter for lot queries. Text filters match case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct LotFilter<'a> {
    pub classification: Option<&'a str>,
    pub medicine_name: Option<&'a str>,
    pub dosage_form: Option<&'a str>,
    /// Hide lots that expired before this date
    pub not_expired_on: Option<NaiveDate>,
    /// Hide lots with no units left
    pub in_stock_only: bool,
}

/// Insert a lot.
pub fn insert_lot(conn: &Connection, lot: &InventoryLot) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO inventory_lots (id, medicine_id, quantity, expiration_date, version, received_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            lot.id,
            lot.medicine_id,
            lot.quantity,
            format_date(lot.expiration_date),
            lot.version,
            lot.received_at,
        ],
    )?;
    Ok(())
}

/// Get a lot by ID.
pub fn get_lot(conn: &Connection, id: &str) -> DbResult<Option<InventoryLot>> {
    conn.query_row(&format!("{} WHERE l.id = ?", LOT_SELECT), [id], map_lot)
        .optional()
        .map_err(Into::into)
}

/// Lots matching a filter, soonest-expiring first.
pub fn list_lots(conn: &Connection, filter: &LotFilter<'_>) -> DbResult<Vec<InventoryLot>> {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();

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
    if let Some(today) = filter.not_expired_on {
        clauses.push("l.expiration_date >= ?");
        values.push(format_date(today));
    }
    if filter.in_stock_only {
        clauses.push("l.quantity > 0");
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    let sql = format!("{} {} {}", LOT_SELECT, where_clause, FEFO_ORDER);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map_lot)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Write a new quantity if the lot is still at `expected_version`.
///
/// Returns the new version. A concurrent writer that got there first yields
/// [`DbError::StaleVersion`].
pub fn compare_and_set_quantity(
    conn: &Connection,
    lot_id: &str,
    expected_version: i64,
    quantity: i64,
) -> DbResult<i64> {
    if quantity < 0 {
        return Err(DbError::Constraint(format!(
            "lot {} quantity would become {}",
            lot_id, quantity
        )));
    }

    let rows = conn.execute(
        r#"
        UPDATE inventory_lots SET quantity = ?3, version = version + 1
        WHERE id = ?1 AND version = ?2
        "#,
        params![lot_id, expected_version, quantity],
    )?;
    if rows == 1 {
        return Ok(expected_version + 1);
    }

    let actual: Option<i64> = conn
        .query_row(
            "SELECT version FROM inventory_lots WHERE id = ?",
            [lot_id],
            |row| row.get(0),
        )
        .optional()?;
    match actual {
        Some(actual) => Err(DbError::StaleVersion {
            entity: "lot",
            id: lot_id.to_string(),
            expected: expected_version,
            actual,
        }),
        None => Err(DbError::NotFound(format!("lot {}", lot_id))),
    }
}

/// Delete a lot row. Returns `false` if it did not exist.
pub fn delete_lot(conn: &Connection, id: &str) -> DbResult<bool> {
    let rows = conn.execute("DELETE FROM inventory_lots WHERE id = ?", [id])?;
    Ok(rows > 0)
}

impl Database {
    /// Get a lot by ID.
    pub fn get_lot(&self, id: &str) -> DbResult<Option<InventoryLot>> {
        get_lot(&self.conn, id)
    }

    /// Lots matching a filter, soonest-expiring first.
    pub fn list_lots(&self, filter: &LotFilter<'_>) -> DbResult<Vec<InventoryLot>> {
        list_lots(&self.conn, filter)
    }
}
