//! Append-only dispense transaction log.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use super::{LedgerError, LedgerResult};
use crate::clock::{format_timestamp, Clock};
use crate::config::LedgerConfig;
use crate::db::catalog::ensure_medicine;
use crate::db::events::record_change;
use crate::db::patients::get_patient;
use crate::db::transactions::{append_transaction, list_transactions, TransactionFilter};
use crate::db::visits::get_visit;
use crate::db::{Database, EntityType};
use crate::models::{
    require_positive_quantity, require_text, Direction, DispenseTransaction, NewTransaction,
    TransactionLinks, ValidationError,
};

/// Check that linked visit and patient rows exist, and agree with each other.
fn require_links(conn: &Connection, links: &TransactionLinks) -> LedgerResult<()> {
    let visit = match links.visit_record_id.as_deref() {
        Some(id) => Some(
            get_visit(conn, id)?
                .ok_or_else(|| ValidationError::new("visit_record_id", format!("no visit {}", id)))?,
        ),
        None => None,
    };
    if let Some(id) = links.patient_id.as_deref() {
        if get_patient(conn, id)?.is_none() {
            return Err(ValidationError::new("patient_id", format!("no patient {}", id)).into());
        }
        if let Some(visit) = visit.filter(|v| v.patient_id != id) {
            return Err(ValidationError::new(
                "patient_id",
                format!("visit {} belongs to another patient", visit.id),
            )
            .into());
        }
    }
    Ok(())
}

/// Validate and append one entry on an open transaction.
pub(crate) fn record_in(
    conn: &Connection,
    new: &NewTransaction,
    now: &str,
) -> LedgerResult<DispenseTransaction> {
    require_positive_quantity("quantity", new.quantity)?;
    require_links(conn, &new.links)?;
    let entry = append_transaction(conn, new, now)?;
    record_change(conn, EntityType::Transaction, &entry.id, entry.direction.as_str(), now)?;
    tracing::debug!(
        seq = entry.seq,
        direction = entry.direction.as_str(),
        medicine = %entry.medicine_name,
        quantity = entry.quantity,
        "ledger entry appended"
    );
    Ok(entry)
}

/// The ledger of every stock movement. Entries are never updated or deleted;
/// demand analytics re-aggregate from here every time.
pub struct DispenseTransactionLog<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    max_retries: u32,
}

impl<'a> DispenseTransactionLog<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &LedgerConfig) -> Self {
        Self {
            db,
            clock,
            max_retries: config.dispensing.max_conflict_retries,
        }
    }

    /// Append a movement for (classification, name, dosage form).
    ///
    /// Registers the catalog entry if it does not exist yet.
    pub fn record(
        &self,
        direction: Direction,
        classification: &str,
        medicine_name: &str,
        dosage_form: &str,
        quantity: i64,
        links: TransactionLinks,
    ) -> LedgerResult<DispenseTransaction> {
        require_text("classification", classification)?;
        require_text("medicine_name", medicine_name)?;
        require_text("dosage_form", dosage_form)?;
        require_positive_quantity("quantity", quantity)?;

        let now = format_timestamp(self.clock.now());
        self.db.write_transaction(self.max_retries, |tx| {
            let (medicine, created) = ensure_medicine(tx, classification, medicine_name, dosage_form)?;
            if created {
                record_change(tx, EntityType::Medicine, &medicine.id, "created", &now)?;
            }
            let new = NewTransaction {
                direction,
                medicine_id: medicine.id,
                classification: medicine.classification,
                medicine_name: medicine.name,
                dosage_form: medicine.dosage_form,
                quantity,
                links: links.clone(),
            };
            record_in(tx, &new, &now)
        })
    }

    /// Entries with `from <= created_at < to`, optionally one direction only.
    pub fn in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        direction: Option<Direction>,
    ) -> LedgerResult<Vec<DispenseTransaction>> {
        if to < from {
            return Err(LedgerError::Validation(crate::models::ValidationError::new(
                "to",
                "window end precedes its start",
            )));
        }
        let from = format_timestamp(from);
        let to = format_timestamp(to);
        Ok(list_transactions(
            self.db.conn(),
            &TransactionFilter {
                direction,
                from: Some(&from),
                to: Some(&to),
                ..Default::default()
            },
        )?)
    }

    /// Entries written by one visit's completion.
    pub fn for_visit(&self, visit_id: &str) -> LedgerResult<Vec<DispenseTransaction>> {
        Ok(list_transactions(
            self.db.conn(),
            &TransactionFilter {
                visit_record_id: Some(visit_id),
                ..Default::default()
            },
        )?)
    }

    /// Entries for a medicine, optionally narrowed to one dosage form.
    pub fn for_medicine(
        &self,
        classification: Option<&str>,
        medicine_name: &str,
        dosage_form: Option<&str>,
    ) -> LedgerResult<Vec<DispenseTransaction>> {
        Ok(list_transactions(
            self.db.conn(),
            &TransactionFilter {
                classification,
                medicine_name: Some(medicine_name),
                dosage_form,
                ..Default::default()
            },
        )?)
    }

    /// Every entry in append order.
    pub fn all(&self) -> LedgerResult<Vec<DispenseTransaction>> {
        Ok(list_transactions(self.db.conn(), &TransactionFilter::default())?)
    }
}
