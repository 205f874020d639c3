//! Inventory lots, FEFO dispensing and the transaction log.

pub mod fefo;
mod log;

pub use log::DispenseTransactionLog;
pub(crate) use log::record_in;

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::{format_timestamp, CivilCalendar, Clock};
use crate::config::{LedgerConfig, ShortfallPolicy};
use crate::db::catalog::{ensure_medicine, find_medicine, suggest_similar};
use crate::db::events::record_change;
use crate::db::lots::{compare_and_set_quantity, delete_lot, get_lot, insert_lot, list_lots, LotFilter};
use crate::db::{Database, DbError, EntityType, RetryableError};
use crate::models::{
    normalize_label, require_positive_quantity, require_text, total_quantity, Allocation, Direction,
    DispenseItem, DispenseTransaction, InsufficientStock, InventoryLot, LotIntake, NewTransaction,
    SimilarMedicine, StockLine, TransactionLinks, ValidationError,
};

/// Inventory and ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InsufficientStock(#[from] InsufficientStock),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict after {attempts} attempts: {cause}")]
    Conflict { attempts: u32, cause: String },
}

impl RetryableError for LedgerError {
    fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Database(e) if e.is_conflict())
    }

    fn conflict(attempts: u32, cause: String) -> Self {
        LedgerError::Conflict { attempts, cause }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result of a stock intake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotReceipt {
    pub lot: InventoryLot,
    /// The `in` entry recorded for the intake
    pub transaction: DispenseTransaction,
    /// The intake registered a new catalog entry
    pub medicine_created: bool,
    /// Existing medicines with a similar name, reported when a new one was created
    pub similar: Vec<SimilarMedicine>,
}

/// Result of a dispense: the lot-level allocation plus its ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dispensed {
    pub allocation: Allocation,
    /// One `out` entry per dosage form consumed
    pub transactions: Vec<DispenseTransaction>,
}

/// Result of an operator removing a lot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotRemoval {
    pub lot: InventoryLot,
    /// `out` entry for the remaining units; absent if the lot was already empty
    pub transaction: Option<DispenseTransaction>,
}

/// Run a FEFO decrement for `item` on an open transaction.
///
/// Under [`ShortfallPolicy::Reject`] an uncovered request fails before any lot
/// is touched. Under [`ShortfallPolicy::PartialFill`] the available units are
/// taken and the allocation carries the shortfall.
pub(crate) fn allocate(
    conn: &Connection,
    item: &DispenseItem,
    today: NaiveDate,
    policy: ShortfallPolicy,
    now: &str,
) -> LedgerResult<Allocation> {
    item.validate()?;

    let lots = list_lots(
        conn,
        &LotFilter {
            classification: Some(&item.classification),
            medicine_name: Some(&item.medicine_name),
            dosage_form: item.dosage_form.as_deref(),
            not_expired_on: Some(today),
            in_stock_only: true,
        },
    )?;
    let plan = fefo::plan(&lots, item.quantity, today);

    let medicine = lots
        .first()
        .map(|lot| lot.medicine_name.clone())
        .unwrap_or_else(|| normalize_label(&item.medicine_name));
    let shortfall = (plan.shortfall() > 0).then(|| InsufficientStock {
        medicine: medicine.clone(),
        requested: item.quantity,
        available: plan.available,
    });

    if let (Some(short), ShortfallPolicy::Reject) = (&shortfall, policy) {
        tracing::warn!(
            medicine = %short.medicine,
            requested = short.requested,
            available = short.available,
            "insufficient stock, dispense rejected"
        );
        return Err(short.clone().into());
    }

    tracing::debug!(
        medicine = %medicine,
        requested = item.quantity,
        lots = plan.takes.len(),
        "FEFO plan"
    );

    let mut consumptions = Vec::with_capacity(plan.takes.len());
    for take in &plan.takes {
        compare_and_set_quantity(conn, &take.lot.id, take.lot.version, take.remaining())?;
        record_change(conn, EntityType::Lot, &take.lot.id, "decremented", now)?;
        consumptions.push(take.to_consumption());
    }

    if let Some(short) = &shortfall {
        tracing::warn!(
            medicine = %short.medicine,
            requested = short.requested,
            available = short.available,
            "insufficient stock, partial dispense"
        );
    }

    Ok(Allocation {
        classification: lots
            .first()
            .map(|lot| lot.classification.clone())
            .unwrap_or_else(|| normalize_label(&item.classification)),
        medicine_name: medicine,
        requested: item.quantity,
        consumed: plan.consumed(),
        consumptions,
        shortfall,
    })
}

/// Decrement and record the matching `out` entries on an open transaction.
pub(crate) fn dispense_in(
    conn: &Connection,
    item: &DispenseItem,
    links: &TransactionLinks,
    today: NaiveDate,
    policy: ShortfallPolicy,
    now: &str,
) -> LedgerResult<Dispensed> {
    let allocation = allocate(conn, item, today, policy, now)?;

    let mut transactions = Vec::new();
    for (medicine_id, dosage_form, quantity) in allocation.totals_by_form() {
        let entry = record_in(
            conn,
            &NewTransaction {
                direction: Direction::Out,
                medicine_id,
                classification: allocation.classification.clone(),
                medicine_name: allocation.medicine_name.clone(),
                dosage_form,
                quantity,
                links: links.clone(),
            },
            now,
        )?;
        transactions.push(entry);
    }

    Ok(Dispensed {
        allocation,
        transactions,
    })
}

/// Stock lots and FEFO allocation.
pub struct InventoryLedger<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    calendar: CivilCalendar,
    shortfall_policy: ShortfallPolicy,
    max_retries: u32,
}

impl<'a> InventoryLedger<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &LedgerConfig) -> Self {
        Self {
            db,
            clock,
            calendar: config.calendar(),
            shortfall_policy: config.dispensing.shortfall_policy,
            max_retries: config.dispensing.max_conflict_retries,
        }
    }

    fn today(&self) -> NaiveDate {
        self.calendar.today(self.clock)
    }

    /// Non-expired lots, soonest-expiring first. Empty lots stay listed until removed.
    pub fn list_available(
        &self,
        classification: Option<&str>,
        medicine_name: Option<&str>,
    ) -> LedgerResult<Vec<InventoryLot>> {
        Ok(list_lots(
            self.db.conn(),
            &LotFilter {
                classification,
                medicine_name,
                not_expired_on: Some(self.today()),
                ..Default::default()
            },
        )?)
    }

    /// Receive a lot: insert it, make sure the catalog knows the medicine and
    /// record the `in` entry.
    pub fn add_lot(&self, intake: &LotIntake) -> LedgerResult<LotReceipt> {
        let classification = require_text("classification", &intake.classification)?;
        let medicine_name = require_text("medicine_name", &intake.medicine_name)?;
        let dosage_form = require_text("dosage_form", &intake.dosage_form)?;
        require_positive_quantity("quantity", intake.quantity)?;

        let conn = self.db.conn();
        let similar = if find_medicine(conn, &classification, &medicine_name, &dosage_form)?.is_none() {
            suggest_similar(conn, &medicine_name, 3)?
        } else {
            Vec::new()
        };
        if let Some(closest) = similar.first() {
            tracing::warn!(
                name = %medicine_name,
                similar_to = %closest.medicine.name,
                similarity = closest.similarity,
                "new medicine name resembles an existing one"
            );
        }

        let at = self.clock.now();
        let now = format_timestamp(at);
        if intake.expiration_date < self.calendar.civil_date(at) {
            tracing::warn!(name = %medicine_name, expiry = %intake.expiration_date, "receiving an expired lot");
        }

        let (lot, transaction, medicine_created) = self.db.write_transaction(self.max_retries, |tx| {
            let (medicine, created) = ensure_medicine(tx, &classification, &medicine_name, &dosage_form)?;
            if created {
                record_change(tx, EntityType::Medicine, &medicine.id, "created", &now)?;
            }

            let lot = InventoryLot {
                id: uuid::Uuid::new_v4().to_string(),
                medicine_id: medicine.id.clone(),
                classification: medicine.classification.clone(),
                medicine_name: medicine.name.clone(),
                dosage_form: medicine.dosage_form.clone(),
                quantity: intake.quantity,
                expiration_date: intake.expiration_date,
                version: 0,
                received_at: now.clone(),
            };
            insert_lot(tx, &lot)?;
            record_change(tx, EntityType::Lot, &lot.id, "received", &now)?;

            let links = TransactionLinks {
                staff_id: intake.staff_id.clone(),
                note: intake.note.clone(),
                ..Default::default()
            };
            let transaction = record_in(
                tx,
                &NewTransaction {
                    direction: Direction::In,
                    medicine_id: medicine.id,
                    classification: medicine.classification,
                    medicine_name: medicine.name,
                    dosage_form: medicine.dosage_form,
                    quantity: intake.quantity,
                    links,
                },
                &now,
            )?;
            Ok::<_, LedgerError>((lot, transaction, created))
        })?;

        tracing::info!(
            lot = %lot.id,
            medicine = %lot.medicine_name,
            quantity = lot.quantity,
            expiry = %lot.expiration_date,
            "lot received"
        );

        Ok(LotReceipt {
            lot,
            transaction,
            medicine_created,
            similar: if medicine_created { similar } else { Vec::new() },
        })
    }

    /// FEFO decrement without a ledger entry.
    ///
    /// `policy` overrides the configured shortfall policy for this call.
    pub fn decrement(
        &self,
        item: &DispenseItem,
        policy: Option<ShortfallPolicy>,
    ) -> LedgerResult<Allocation> {
        let policy = policy.unwrap_or(self.shortfall_policy);
        let at = self.clock.now();
        let today = self.calendar.civil_date(at);
        let now = format_timestamp(at);
        self.db
            .write_transaction(self.max_retries, |tx| allocate(tx, item, today, policy, &now))
    }

    /// Decrement and record `out` entries in one transaction (walk-in dispensing).
    pub fn dispense(
        &self,
        item: &DispenseItem,
        links: &TransactionLinks,
        policy: Option<ShortfallPolicy>,
    ) -> LedgerResult<Dispensed> {
        let policy = policy.unwrap_or(self.shortfall_policy);
        let at = self.clock.now();
        let today = self.calendar.civil_date(at);
        let now = format_timestamp(at);
        let dispensed = self.db.write_transaction(self.max_retries, |tx| {
            dispense_in(tx, item, links, today, policy, &now)
        })?;
        tracing::info!(
            medicine = %dispensed.allocation.medicine_name,
            consumed = dispensed.allocation.consumed,
            "dispensed"
        );
        Ok(dispensed)
    }

    /// Remove a lot entirely, recording its remaining units as an `out` entry.
    pub fn remove_lot(
        &self,
        lot_id: &str,
        staff_id: Option<&str>,
        note: Option<&str>,
    ) -> LedgerResult<LotRemoval> {
        let now = format_timestamp(self.clock.now());
        let removal = self.db.write_transaction(self.max_retries, |tx| {
            let lot = get_lot(tx, lot_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("lot {}", lot_id)))?;
            delete_lot(tx, &lot.id)?;
            record_change(tx, EntityType::Lot, &lot.id, "removed", &now)?;

            let transaction = if lot.quantity > 0 {
                let links = TransactionLinks {
                    staff_id: staff_id.map(str::to_string),
                    note: Some(
                        note.map(str::to_string)
                            .unwrap_or_else(|| format!("lot {} removed", lot.display_code())),
                    ),
                    ..Default::default()
                };
                Some(record_in(
                    tx,
                    &NewTransaction {
                        direction: Direction::Out,
                        medicine_id: lot.medicine_id.clone(),
                        classification: lot.classification.clone(),
                        medicine_name: lot.medicine_name.clone(),
                        dosage_form: lot.dosage_form.clone(),
                        quantity: lot.quantity,
                        links,
                    },
                    &now,
                )?)
            } else {
                None
            };
            Ok::<_, LedgerError>(LotRemoval { lot, transaction })
        })?;

        tracing::info!(
            lot = %removal.lot.id,
            code = %removal.lot.display_code(),
            quantity = removal.lot.quantity,
            "lot removed"
        );
        Ok(removal)
    }

    /// Remove a lot identified by its shelf-label code.
    pub fn remove_lot_by_code(
        &self,
        code: &str,
        staff_id: Option<&str>,
        note: Option<&str>,
    ) -> LedgerResult<LotRemoval> {
        let wanted = code.trim().to_uppercase();
        let matches: Vec<InventoryLot> = list_lots(self.db.conn(), &LotFilter::default())?
            .into_iter()
            .filter(|lot| lot.display_code().to_uppercase() == wanted)
            .collect();

        match matches.as_slice() {
            [] => Err(LedgerError::NotFound(format!("lot code {}", code.trim()))),
            [lot] => self.remove_lot(&lot.id, staff_id, note),
            _ => Err(ValidationError::new(
                "code",
                format!("'{}' matches {} lots; remove by ID", code.trim(), matches.len()),
            )
            .into()),
        }
    }

    /// Non-expired stock per (classification, name, dosage form).
    pub fn stock_lines(&self) -> LedgerResult<Vec<StockLine>> {
        let lots = self.list_available(None, None)?;
        let mut lines: Vec<StockLine> = Vec::new();
        for lot in lots {
            let index = match lines.iter().position(|l| l.medicine_id == lot.medicine_id) {
                Some(index) => index,
                None => {
                    lines.push(StockLine {
                        medicine_id: lot.medicine_id.clone(),
                        classification: lot.classification.clone(),
                        medicine_name: lot.medicine_name.clone(),
                        dosage_form: lot.dosage_form.clone(),
                        total_quantity: 0,
                        lot_count: 0,
                        nearest_expiry: None,
                    });
                    lines.len() - 1
                }
            };
            let line = &mut lines[index];
            line.total_quantity = line.total_quantity.saturating_add(lot.quantity);
            line.lot_count += 1;
            if lot.quantity > 0 {
                line.nearest_expiry = Some(match line.nearest_expiry {
                    Some(current) => current.min(lot.expiration_date),
                    None => lot.expiration_date,
                });
            }
        }
        lines.sort_by(|a, b| {
            (a.classification.to_lowercase(), a.medicine_name.to_lowercase(), a.dosage_form.to_lowercase())
                .cmp(&(b.classification.to_lowercase(), b.medicine_name.to_lowercase(), b.dosage_form.to_lowercase()))
        });
        Ok(lines)
    }

    /// Units on non-expired lots of a medicine, across dosage forms.
    pub fn on_hand(&self, classification: Option<&str>, medicine_name: &str) -> LedgerResult<i64> {
        Ok(total_quantity(
            self.list_available(classification, Some(medicine_name))?
                .iter()
                .map(|lot| lot.quantity),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    struct Fixture {
        db: Database,
        clock: FixedClock,
        config: LedgerConfig,
    }

    impl Fixture {
        fn new(today: NaiveDate) -> Self {
            let config = LedgerConfig::default();
            let clock = FixedClock::at_civil(&config.calendar(), today, 9, 0);
            Self {
                db: Database::open_in_memory().unwrap(),
                clock,
                config,
            }
        }

        fn ledger(&self) -> InventoryLedger<'_> {
            InventoryLedger::new(&self.db, &self.clock, &self.config)
        }
    }

    fn intake(class: &str, name: &str, form: &str, qty: i64, expiry: NaiveDate) -> LotIntake {
        LotIntake {
            classification: class.into(),
            medicine_name: name.into(),
            dosage_form: form.into(),
            quantity: qty,
            expiration_date: expiry,
            staff_id: Some("admin-1".into()),
            note: None,
        }
    }

    #[test]
    fn test_fefo_decrement_across_lots() {
        let fx = Fixture::new(date(2024, 12, 1));
        let ledger = fx.ledger();
        let a = ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 10, date(2025, 1, 1))).unwrap();
        let b = ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 20, date(2025, 3, 1))).unwrap();

        let allocation = ledger
            .decrement(&DispenseItem::new("Antibiotics", "Amoxicillin", 15), None)
            .unwrap();
        assert_eq!(allocation.consumed, 15);
        assert!(allocation.is_complete());

        assert_eq!(fx.db.get_lot(&a.lot.id).unwrap().unwrap().quantity, 0);
        assert_eq!(fx.db.get_lot(&b.lot.id).unwrap().unwrap().quantity, 15);
        // Empty lot stays a row
        assert_eq!(ledger.list_available(None, Some("Amoxicillin")).unwrap().len(), 2);
    }

    #[test]
    fn test_oversized_quantities_rejected() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        let huge = i64::MAX / 2 + 1;

        let err = ledger
            .add_lot(&intake("Supplement", "Zinc", "tablet", huge, date(2026, 1, 1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ref v) if v.field == "quantity"));
        assert_eq!(fx.db.transaction_count().unwrap(), 0);

        let err = ledger
            .decrement(&DispenseItem::new("Supplement", "Zinc", huge), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ref v) if v.field == "quantity"));
    }

    #[test]
    fn test_stock_totals_saturate() {
        let fx = Fixture::new(date(2025, 1, 1));
        let conn = fx.db.conn();
        let (medicine, _) = ensure_medicine(conn, "Supplement", "Zinc", "tablet").unwrap();
        // Rows written before quantities were capped
        for i in 0..2 {
            insert_lot(
                conn,
                &InventoryLot {
                    id: format!("legacy-{}", i),
                    medicine_id: medicine.id.clone(),
                    classification: medicine.classification.clone(),
                    medicine_name: medicine.name.clone(),
                    dosage_form: medicine.dosage_form.clone(),
                    quantity: i64::MAX / 2 + 1,
                    expiration_date: date(2026, 1, 1),
                    version: 0,
                    received_at: "2024-06-01T00:00:00.000000Z".into(),
                },
            )
            .unwrap();
        }

        let ledger = fx.ledger();
        assert_eq!(ledger.on_hand(None, "Zinc").unwrap(), i64::MAX);
        assert_eq!(ledger.stock_lines().unwrap()[0].total_quantity, i64::MAX);

        let allocation = ledger
            .decrement(&DispenseItem::new("Supplement", "Zinc", 10), None)
            .unwrap();
        assert_eq!(allocation.consumed, 10);
    }

    #[test]
    fn test_reject_leaves_stock_untouched() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        let c = ledger.add_lot(&intake("Analgesic", "Paracetamol", "tablet", 5, date(2025, 6, 1))).unwrap();

        let err = ledger
            .dispense(
                &DispenseItem::new("Analgesic", "Paracetamol", 10),
                &TransactionLinks::staff("dr-1"),
                None,
            )
            .unwrap_err();
        match err {
            LedgerError::InsufficientStock(short) => {
                assert_eq!((short.requested, short.available), (10, 5));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(fx.db.get_lot(&c.lot.id).unwrap().unwrap().quantity, 5);
        // Only the intake entry exists
        assert_eq!(fx.db.transaction_count().unwrap(), 1);
    }

    #[test]
    fn test_partial_fill_records_shortfall() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        let c = ledger.add_lot(&intake("Analgesic", "Paracetamol", "tablet", 5, date(2025, 6, 1))).unwrap();

        let dispensed = ledger
            .dispense(
                &DispenseItem::new("Analgesic", "Paracetamol", 10),
                &TransactionLinks::staff("dr-1"),
                Some(ShortfallPolicy::PartialFill),
            )
            .unwrap();
        assert_eq!(dispensed.allocation.consumed, 5);
        assert_eq!(
            dispensed.allocation.shortfall,
            Some(InsufficientStock {
                medicine: "Paracetamol".into(),
                requested: 10,
                available: 5
            })
        );
        assert_eq!(dispensed.transactions.len(), 1);
        assert_eq!(dispensed.transactions[0].quantity, 5);
        assert_eq!(fx.db.get_lot(&c.lot.id).unwrap().unwrap().quantity, 0);
    }

    #[test]
    fn test_dispense_splits_entries_per_dosage_form() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        ledger.add_lot(&intake("Analgesic", "Paracetamol", "syrup", 4, date(2025, 2, 1))).unwrap();
        ledger.add_lot(&intake("Analgesic", "Paracetamol", "tablet", 10, date(2025, 3, 1))).unwrap();

        let dispensed = ledger
            .dispense(
                &DispenseItem::new("Analgesic", "Paracetamol", 6),
                &TransactionLinks::staff("dr-1"),
                None,
            )
            .unwrap();
        let forms: Vec<_> = dispensed
            .transactions
            .iter()
            .map(|t| (t.dosage_form.as_str(), t.quantity))
            .collect();
        assert_eq!(forms, vec![("syrup", 4), ("tablet", 2)]);

        // Restricting the form only draws from that form
        let tablets = ledger
            .decrement(
                &DispenseItem::new("Analgesic", "Paracetamol", 3).with_dosage_form("Tablet"),
                None,
            )
            .unwrap();
        assert_eq!(tablets.consumptions.len(), 1);
        assert_eq!(tablets.consumptions[0].remaining, 5);
    }

    #[test]
    fn test_expired_lots_invisible() {
        let fx = Fixture::new(date(2025, 1, 10));
        let ledger = fx.ledger();
        ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 50, date(2025, 1, 9))).unwrap();
        ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 7, date(2025, 1, 10))).unwrap();

        assert_eq!(ledger.on_hand(None, "Amoxicillin").unwrap(), 7);
        let err = ledger
            .decrement(&DispenseItem::new("Antibiotics", "Amoxicillin", 8), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock(ref s) if s.available == 7));
    }

    #[test]
    fn test_add_then_decrement_round_trip() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 12, date(2025, 5, 1))).unwrap();
        let before = ledger.on_hand(Some("Antibiotics"), "Amoxicillin").unwrap();

        ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 9, date(2025, 4, 1))).unwrap();
        ledger.decrement(&DispenseItem::new("Antibiotics", "Amoxicillin", 9), None).unwrap();

        assert_eq!(ledger.on_hand(Some("Antibiotics"), "Amoxicillin").unwrap(), before);
    }

    #[test]
    fn test_add_lot_reports_similar_names() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        let first = ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 10, date(2025, 5, 1))).unwrap();
        assert!(first.medicine_created);
        assert!(first.similar.is_empty());

        let typo = ledger.add_lot(&intake("Antibiotics", "Amoxicilin", "tablet", 10, date(2025, 5, 1))).unwrap();
        assert!(typo.medicine_created);
        assert_eq!(typo.similar[0].medicine.name, "Amoxicillin");

        let again = ledger.add_lot(&intake("antibiotics", "AMOXICILLIN", "tablet", 1, date(2025, 5, 1))).unwrap();
        assert!(!again.medicine_created);
        assert_eq!(again.lot.medicine_id, first.lot.medicine_id);
    }

    #[test]
    fn test_remove_lot_by_code_logs_remaining() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        let receipt = ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 10, date(2025, 5, 1))).unwrap();
        ledger.decrement(&DispenseItem::new("Antibiotics", "Amoxicillin", 3), None).unwrap();

        let code = receipt.lot.display_code().to_lowercase();
        let removal = ledger.remove_lot_by_code(&code, Some("admin-1"), None).unwrap();
        let tx = removal.transaction.unwrap();
        assert_eq!(tx.direction, Direction::Out);
        assert_eq!(tx.quantity, 7);
        assert!(fx.db.get_lot(&receipt.lot.id).unwrap().is_none());

        assert!(matches!(
            ledger.remove_lot(&receipt.lot.id, None, None),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_stock_lines() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 10, date(2025, 5, 1))).unwrap();
        ledger.add_lot(&intake("Antibiotics", "Amoxicillin", "tablet", 5, date(2025, 3, 1))).unwrap();
        ledger.add_lot(&intake("Analgesic", "Paracetamol", "syrup", 2, date(2025, 2, 1))).unwrap();

        let lines = ledger.stock_lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].medicine_name, "Paracetamol");
        assert_eq!(lines[1].total_quantity, 15);
        assert_eq!(lines[1].lot_count, 2);
        assert_eq!(lines[1].nearest_expiry, Some(date(2025, 3, 1)));
    }

    #[test]
    fn test_validation_before_mutation() {
        let fx = Fixture::new(date(2025, 1, 1));
        let ledger = fx.ledger();
        let err = ledger
            .add_lot(&intake("Antibiotics", "  ", "tablet", 10, date(2025, 5, 1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ref v) if v.field == "medicine_name"));
        let err = ledger
            .decrement(&DispenseItem::new("Antibiotics", "Amoxicillin", -2), None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(fx.db.latest_change_seq().unwrap(), 0);
    }
}
