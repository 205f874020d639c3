//! Clinic Ledger Core Library
//!
//! Visit queue, FEFO medicine dispensing and demand analytics for a
//! community clinic, on a local SQLite database.
//!
//! # Architecture
//!
//! ```text
//! Patient registration ──► Visit queued ──► Clinician completes visit
//!                                                   │
//!                              ┌────────────────────▼────────────────────┐
//!                              │        one SQLite write transaction     │
//!                              │  status: queued → completed             │
//!                              │  FEFO decrement (version-checked lots)  │
//!                              │  out entries appended to hash chain     │
//!                              │  change events written to the outbox    │
//!                              └────────────────────┬────────────────────┘
//!                                                   │
//!                   ┌───────────────────────────────┼───────────────────────────────┐
//!                   ▼                               ▼                               ▼
//!             Stock alerts                 Demand forecast                 Change feed
//!           (OUT / LOW panel)        (averages, status, restock)      (push to dashboards)
//! ```
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence, one submodule per table family
//! - [`models`]: Domain types (Patient, VisitRecord, InventoryLot, ...)
//! - [`queue`]: Patient registry and visit state machine
//! - [`ledger`]: Inventory lots, FEFO allocation and the transaction log
//! - [`analytics`]: Stock alerts and demand forecasting
//! - [`audit`]: Ledger hash chain verification
//! - [`notify`]: Change feed and idempotent cursors
//! - [`export`]: Ledger JSON / CSV export

pub mod analytics;
pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod export;
pub mod ledger;
pub mod logging;
pub mod models;
pub mod notify;
pub mod queue;

// Re-export commonly used types
pub use analytics::{AlertEvaluator, AlertReport, ForecastEngine, ForecastRow, StockStatus};
pub use audit::{ChainReport, ChainVerifier};
pub use clock::{CivilCalendar, Clock, FixedClock, SystemClock};
pub use config::{LedgerConfig, ShortfallPolicy};
pub use db::Database;
pub use ledger::{DispenseTransactionLog, InventoryLedger};
pub use models::{
    DispenseItem, DispenseTransaction, InsufficientStock, InventoryLot, Patient, VisitCompletion,
    VisitRecord, VisitStatus,
};
pub use notify::{ChangeCursor, ChangeFeed, ChangeFilter};
pub use queue::{PatientRegistry, VisitQueueManager};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};

use crate::analytics::{AnalyticsError, DemandFilter};
use crate::audit::AuditError;
use crate::clock::{format_date, parse_date, parse_timestamp};
use crate::config::ConfigError;
use crate::db::{DbError, EntityType};
use crate::export::LedgerExporter;
use crate::ledger::{Dispensed, LedgerError, LotReceipt, LotRemoval};
use crate::models::{
    Direction, LotConsumption, LotIntake, Medicine, PatientRegistration, StockLine,
    TransactionLinks, ValidationError, VitalsForm,
};
use crate::queue::{CompletionOutcome, QueueError};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicError {
    /// Storage failed; details are logged, callers should retry.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Insufficient stock for {medicine}: requested {requested}, available {available}")]
    InsufficientStock {
        medicine: String,
        requested: i64,
        available: i64,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Visit {visit_id} cannot move from {from} to {to}")]
    IllegalTransition {
        visit_id: String,
        from: String,
        to: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

const STORAGE_FAILURE: &str = "the operation could not be saved, please try again";

impl From<DbError> for ClinicError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => ClinicError::NotFound(what),
            e if e.is_conflict() => ClinicError::Conflict(e.to_string()),
            e => {
                tracing::error!(error = %e, "storage failure");
                ClinicError::Storage(STORAGE_FAILURE.into())
            }
        }
    }
}

impl From<ValidationError> for ClinicError {
    fn from(e: ValidationError) -> Self {
        ClinicError::Validation {
            field: e.field,
            message: e.message,
        }
    }
}

impl From<InsufficientStock> for ClinicError {
    fn from(e: InsufficientStock) -> Self {
        ClinicError::InsufficientStock {
            medicine: e.medicine,
            requested: e.requested,
            available: e.available,
        }
    }
}

impl From<LedgerError> for ClinicError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::Database(e) => e.into(),
            LedgerError::Validation(e) => e.into(),
            LedgerError::InsufficientStock(e) => e.into(),
            LedgerError::NotFound(what) => ClinicError::NotFound(what),
            e @ LedgerError::Conflict { .. } => ClinicError::Conflict(e.to_string()),
        }
    }
}

impl From<QueueError> for ClinicError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Database(e) => e.into(),
            QueueError::Validation(e) => e.into(),
            QueueError::Ledger(e) => e.into(),
            QueueError::Json(e) => e.into(),
            QueueError::NotFound(what) => ClinicError::NotFound(what),
            QueueError::IllegalTransition { visit_id, from, to } => ClinicError::IllegalTransition {
                visit_id,
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            },
            e @ QueueError::Conflict { .. } => ClinicError::Conflict(e.to_string()),
        }
    }
}

impl From<AnalyticsError> for ClinicError {
    fn from(e: AnalyticsError) -> Self {
        match e {
            AnalyticsError::Database(e) => e.into(),
            AnalyticsError::Validation(e) => e.into(),
        }
    }
}

impl From<AuditError> for ClinicError {
    fn from(e: AuditError) -> Self {
        match e {
            AuditError::Database(e) => e.into(),
            AuditError::Json(e) => e.into(),
        }
    }
}

impl From<ConfigError> for ClinicError {
    fn from(e: ConfigError) -> Self {
        ClinicError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for ClinicError {
    fn from(e: serde_json::Error) -> Self {
        ClinicError::Serialization(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        tracing::error!(error = %e, "database lock poisoned");
        ClinicError::Storage(STORAGE_FAILURE.into())
    }
}

fn date_arg(field: &str, value: &str) -> Result<NaiveDate, ClinicError> {
    parse_date(value.trim())
        .ok_or_else(|| ValidationError::new(field, "expected a date as YYYY-MM-DD").into())
}

fn timestamp_arg(field: &str, value: &str) -> Result<DateTime<Utc>, ClinicError> {
    parse_timestamp(value.trim())
        .ok_or_else(|| ValidationError::new(field, "expected an RFC 3339 timestamp").into())
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
///
/// `config_json` overrides the default configuration; missing fields keep
/// their defaults.
#[uniffi::export]
pub fn open_database(
    path: String,
    config_json: Option<String>,
) -> Result<Arc<ClinicCore>, ClinicError> {
    let config = match config_json {
        Some(json) => LedgerConfig::from_json(&json)?,
        None => LedgerConfig::default(),
    };
    let db = Database::open_with(&path, &config.storage)?;
    tracing::info!(path = %path, "database opened");
    Ok(Arc::new(ClinicCore::new(db, config, Arc::new(SystemClock))?))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<ClinicCore>, ClinicError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(ClinicCore::new(
        db,
        LedgerConfig::default(),
        Arc::new(SystemClock),
    )?))
}

/// Install the default log subscriber (`RUST_LOG` aware).
#[uniffi::export]
pub fn init_logging() {
    logging::init();
}

/// Receives change events pushed by [`ClinicCore::subscribe_changes`].
#[uniffi::export(callback_interface)]
pub trait ChangeListener: Send + Sync {
    fn on_change(&self, event: FfiChangeEvent);
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicCore {
    db: Arc<Mutex<Database>>,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
    feed: ChangeFeed,
}

impl ClinicCore {
    /// Wrap an open database. Rust hosts use this to inject a clock.
    pub fn new(db: Database, config: LedgerConfig, clock: Arc<dyn Clock>) -> Result<Self, ClinicError> {
        config.validate()?;
        let feed = ChangeFeed::from_head(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            config,
            clock,
            feed,
        })
    }

    /// Push committed events to subscribers. The mutation has already
    /// committed, so a failure here is logged and left for the next publish.
    fn publish(&self, db: &Database) {
        if let Err(e) = self.feed.publish(db) {
            tracing::warn!(error = %e, "change publish failed");
        }
    }
}

#[uniffi::export]
impl ClinicCore {
    // =========================================================================
    // Configuration
    // =========================================================================

    /// Effective configuration as JSON.
    pub fn config_json(&self) -> Result<String, ClinicError> {
        Ok(self.config.to_json()?)
    }

    /// Civil today as YYYY-MM-DD.
    pub fn today(&self) -> String {
        format_date(self.config.calendar().today(self.clock.as_ref()))
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Register a new patient.
    pub fn register_patient(
        &self,
        registration: FfiPatientRegistration,
    ) -> Result<FfiPatient, ClinicError> {
        let db = self.db.lock()?;
        let registry = PatientRegistry::new(&db, self.clock.as_ref(), &self.config);
        let patient = registry.register(&registration.into())?;
        self.publish(&db);
        Ok(patient.into())
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, patient_id: String) -> Result<Option<FfiPatient>, ClinicError> {
        let db = self.db.lock()?;
        let patient = db.get_patient(&patient_id)?;
        Ok(patient.map(|p| p.into()))
    }

    /// Search patients by first- or last-name prefix.
    pub fn search_patients(&self, query: String, limit: u32) -> Result<Vec<FfiPatient>, ClinicError> {
        let db = self.db.lock()?;
        let registry = PatientRegistry::new(&db, self.clock.as_ref(), &self.config);
        let patients = registry.search(&query, limit as usize)?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    /// Patients sharing a family ID.
    pub fn list_family_members(&self, family_id: String) -> Result<Vec<FfiPatient>, ClinicError> {
        let db = self.db.lock()?;
        let registry = PatientRegistry::new(&db, self.clock.as_ref(), &self.config);
        let patients = registry.family_members(&family_id)?;
        Ok(patients.into_iter().map(|p| p.into()).collect())
    }

    /// Replace a patient's emergency contact.
    pub fn update_emergency_contact(
        &self,
        patient_id: String,
        name: Option<String>,
        number: Option<String>,
    ) -> Result<FfiPatient, ClinicError> {
        let db = self.db.lock()?;
        let registry = PatientRegistry::new(&db, self.clock.as_ref(), &self.config);
        let patient =
            registry.update_emergency_contact(&patient_id, name.as_deref(), number.as_deref())?;
        self.publish(&db);
        Ok(patient.into())
    }

    // =========================================================================
    // Visit Queue Operations
    // =========================================================================

    /// Queue a visit for an existing patient.
    pub fn create_visit(
        &self,
        patient_id: String,
        vitals: FfiVitalsForm,
        chief_complaint: Option<String>,
        staff_id: Option<String>,
    ) -> Result<FfiVisit, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        let visit = queue.create(
            &patient_id,
            &vitals.into(),
            chief_complaint.as_deref(),
            staff_id.as_deref(),
        )?;
        self.publish(&db);
        Ok(visit.into())
    }

    /// Register a walk-in patient and queue their visit in one step.
    pub fn register_and_queue(
        &self,
        registration: FfiPatientRegistration,
        vitals: FfiVitalsForm,
        chief_complaint: Option<String>,
        staff_id: Option<String>,
    ) -> Result<FfiQueuedVisit, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        let (patient, visit) = queue.register_and_queue(
            &registration.into(),
            &vitals.into(),
            chief_complaint.as_deref(),
            staff_id.as_deref(),
        )?;
        self.publish(&db);
        Ok(FfiQueuedVisit {
            patient: patient.into(),
            visit: visit.into(),
        })
    }

    /// Queued visits, oldest first.
    pub fn list_queue(&self) -> Result<Vec<FfiVisit>, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        Ok(queue.list_queued()?.into_iter().map(|v| v.into()).collect())
    }

    pub fn get_visit(&self, visit_id: String) -> Result<FfiVisit, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        Ok(queue.get_visit(&visit_id)?.into())
    }

    /// A patient's visit history, newest first.
    pub fn list_visits_for_patient(&self, patient_id: String) -> Result<Vec<FfiVisit>, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        Ok(queue
            .list_visits_for_patient(&patient_id)?
            .into_iter()
            .map(|v| v.into())
            .collect())
    }

    /// Cancel a queued visit.
    pub fn cancel_visit(
        &self,
        visit_id: String,
        staff_id: String,
        reason: Option<String>,
    ) -> Result<FfiVisit, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        let visit = queue.cancel(&visit_id, &staff_id, reason.as_deref())?;
        self.publish(&db);
        Ok(visit.into())
    }

    /// Complete a visit, dispensing its prescriptions atomically.
    pub fn complete_visit(
        &self,
        visit_id: String,
        completion: FfiVisitCompletion,
        policy: Option<FfiShortfallPolicy>,
    ) -> Result<FfiCompletionOutcome, ClinicError> {
        let db = self.db.lock()?;
        let queue = VisitQueueManager::new(&db, self.clock.as_ref(), &self.config);
        let outcome = queue.complete(&visit_id, &completion.into(), policy.map(Into::into))?;
        self.publish(&db);
        Ok(outcome.into())
    }

    // =========================================================================
    // Inventory Operations
    // =========================================================================

    /// Receive a lot of stock.
    pub fn add_lot(&self, intake: FfiLotIntake) -> Result<FfiLotReceipt, ClinicError> {
        let intake = LotIntake {
            classification: intake.classification,
            medicine_name: intake.medicine_name,
            dosage_form: intake.dosage_form,
            quantity: intake.quantity,
            expiration_date: date_arg("expiration_date", &intake.expiration_date)?,
            staff_id: intake.staff_id,
            note: intake.note,
        };
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        let receipt = ledger.add_lot(&intake)?;
        self.publish(&db);
        Ok(receipt.into())
    }

    /// Non-expired lots in FEFO order, empty ones included.
    pub fn list_available(
        &self,
        classification: Option<String>,
        medicine_name: Option<String>,
    ) -> Result<Vec<FfiLot>, ClinicError> {
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        let lots = ledger.list_available(classification.as_deref(), medicine_name.as_deref())?;
        Ok(lots.into_iter().map(|l| l.into()).collect())
    }

    /// Dispense outside a visit (walk-in or correction).
    pub fn dispense(
        &self,
        item: FfiDispenseItem,
        links: FfiTransactionLinks,
        policy: Option<FfiShortfallPolicy>,
    ) -> Result<FfiDispensed, ClinicError> {
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        let dispensed = ledger.dispense(&item.into(), &links.into(), policy.map(Into::into))?;
        self.publish(&db);
        Ok(dispensed.into())
    }

    /// Remove a lot, logging its remaining units as an `out` entry.
    pub fn remove_lot(
        &self,
        lot_id: String,
        staff_id: Option<String>,
        note: Option<String>,
    ) -> Result<FfiLotRemoval, ClinicError> {
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        let removal = ledger.remove_lot(&lot_id, staff_id.as_deref(), note.as_deref())?;
        self.publish(&db);
        Ok(removal.into())
    }

    /// Remove a lot identified by its display code.
    pub fn remove_lot_by_code(
        &self,
        code: String,
        staff_id: Option<String>,
        note: Option<String>,
    ) -> Result<FfiLotRemoval, ClinicError> {
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        let removal = ledger.remove_lot_by_code(&code, staff_id.as_deref(), note.as_deref())?;
        self.publish(&db);
        Ok(removal.into())
    }

    /// Stock per (classification, name, dosage form).
    pub fn stock_lines(&self) -> Result<Vec<FfiStockLine>, ClinicError> {
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        Ok(ledger.stock_lines()?.into_iter().map(|s| s.into()).collect())
    }

    /// Non-expired units on hand for a medicine.
    pub fn on_hand(
        &self,
        classification: Option<String>,
        medicine_name: String,
    ) -> Result<i64, ClinicError> {
        let db = self.db.lock()?;
        let ledger = InventoryLedger::new(&db, self.clock.as_ref(), &self.config);
        Ok(ledger.on_hand(classification.as_deref(), &medicine_name)?)
    }

    // =========================================================================
    // Catalog Operations
    // =========================================================================

    pub fn list_medicines(&self) -> Result<Vec<FfiMedicine>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.list_medicines()?.into_iter().map(|m| m.into()).collect())
    }

    pub fn list_classifications(&self) -> Result<Vec<String>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.list_classifications()?)
    }

    /// Dosage forms registered for a medicine.
    pub fn list_dosage_forms(
        &self,
        classification: String,
        medicine_name: String,
    ) -> Result<Vec<String>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.list_dosage_forms(&classification, &medicine_name)?)
    }

    /// Catalog names close to `name`, best match first.
    pub fn suggest_similar_medicines(
        &self,
        name: String,
        limit: u32,
    ) -> Result<Vec<FfiSimilarMedicine>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db
            .suggest_similar_medicines(&name, limit as usize)?
            .into_iter()
            .map(|s| FfiSimilarMedicine {
                medicine: s.medicine.into(),
                similarity: s.similarity,
            })
            .collect())
    }

    // =========================================================================
    // Transaction Log Operations
    // =========================================================================

    /// Append a manual ledger entry (`direction` is "in" or "out").
    pub fn record_transaction(
        &self,
        direction: String,
        classification: String,
        medicine_name: String,
        dosage_form: String,
        quantity: i64,
        links: FfiTransactionLinks,
    ) -> Result<FfiTransaction, ClinicError> {
        let direction = Direction::parse(direction.trim())
            .ok_or_else(|| ValidationError::new("direction", "expected \"in\" or \"out\""))?;
        let db = self.db.lock()?;
        let log = DispenseTransactionLog::new(&db, self.clock.as_ref(), &self.config);
        let entry = log.record(
            direction,
            &classification,
            &medicine_name,
            &dosage_form,
            quantity,
            links.into(),
        )?;
        self.publish(&db);
        Ok(entry.into())
    }

    /// Entries with `from <= created_at < to` (RFC 3339 timestamps).
    pub fn transactions_in_window(
        &self,
        from: String,
        to: String,
        direction: Option<String>,
    ) -> Result<Vec<FfiTransaction>, ClinicError> {
        let from = timestamp_arg("from", &from)?;
        let to = timestamp_arg("to", &to)?;
        let direction = match direction {
            Some(d) => Some(
                Direction::parse(d.trim())
                    .ok_or_else(|| ValidationError::new("direction", "expected \"in\" or \"out\""))?,
            ),
            None => None,
        };
        let db = self.db.lock()?;
        let log = DispenseTransactionLog::new(&db, self.clock.as_ref(), &self.config);
        Ok(log
            .in_window(from, to, direction)?
            .into_iter()
            .map(|t| t.into())
            .collect())
    }

    pub fn transactions_for_visit(&self, visit_id: String) -> Result<Vec<FfiTransaction>, ClinicError> {
        let db = self.db.lock()?;
        let log = DispenseTransactionLog::new(&db, self.clock.as_ref(), &self.config);
        Ok(log.for_visit(&visit_id)?.into_iter().map(|t| t.into()).collect())
    }

    pub fn transactions_for_medicine(
        &self,
        classification: Option<String>,
        medicine_name: String,
        dosage_form: Option<String>,
    ) -> Result<Vec<FfiTransaction>, ClinicError> {
        let db = self.db.lock()?;
        let log = DispenseTransactionLog::new(&db, self.clock.as_ref(), &self.config);
        Ok(log
            .for_medicine(classification.as_deref(), &medicine_name, dosage_form.as_deref())?
            .into_iter()
            .map(|t| t.into())
            .collect())
    }

    /// Walk the ledger hash chain.
    pub fn verify_chain(&self) -> Result<FfiChainReport, ClinicError> {
        let db = self.db.lock()?;
        let report = ChainVerifier::new(&db).verify()?;
        Ok(report.into())
    }

    /// Export the ledger (or a window of it) as JSON with chain metadata.
    pub fn export_ledger_json(
        &self,
        from: Option<String>,
        to: Option<String>,
    ) -> Result<String, ClinicError> {
        let export = self.ledger_export(from, to)?;
        Ok(export.to_json()?)
    }

    /// Export the ledger (or a window of it) as CSV.
    pub fn export_ledger_csv(
        &self,
        from: Option<String>,
        to: Option<String>,
    ) -> Result<String, ClinicError> {
        Ok(self.ledger_export(from, to)?.to_csv())
    }

    // =========================================================================
    // Analytics Operations
    // =========================================================================

    /// OUT / LOW alert panel.
    pub fn stock_alerts(&self) -> Result<FfiAlertReport, ClinicError> {
        let db = self.db.lock()?;
        let report = AlertEvaluator::new(&db, self.clock.as_ref(), &self.config).evaluate()?;
        Ok(report.into())
    }

    /// Stocked lots expiring within the configured window.
    pub fn expiring_soon(&self) -> Result<Vec<FfiLot>, ClinicError> {
        let db = self.db.lock()?;
        let lots = AlertEvaluator::new(&db, self.clock.as_ref(), &self.config).expiring_soon()?;
        Ok(lots.into_iter().map(|l| l.into()).collect())
    }

    /// Dispensed totals over civil days `[from, to)` (YYYY-MM-DD).
    pub fn observed_demand(
        &self,
        from: String,
        to: String,
        classification: Option<String>,
        dosage_form: Option<String>,
        by_dosage_form: bool,
    ) -> Result<Vec<FfiDemandRow>, ClinicError> {
        let from = date_arg("from", &from)?;
        let to = date_arg("to", &to)?;
        let db = self.db.lock()?;
        let engine = ForecastEngine::new(&db, self.clock.as_ref(), &self.config);
        let rows = engine.observed_demand(
            from,
            to,
            &DemandFilter {
                classification: classification.as_deref(),
                dosage_form: dosage_form.as_deref(),
                by_dosage_form,
            },
        )?;
        Ok(rows
            .into_iter()
            .map(|r| FfiDemandRow {
                classification: r.classification,
                medicine_name: r.medicine_name,
                dosage_form: r.dosage_form,
                quantity: r.quantity,
            })
            .collect())
    }

    /// Forecast rows; `as_of` defaults to today, the period to next month's length.
    pub fn forecast_report(
        &self,
        as_of: Option<String>,
        next_period_days: Option<u32>,
    ) -> Result<Vec<FfiForecastRow>, ClinicError> {
        let as_of = match as_of {
            Some(d) => date_arg("as_of", &d)?,
            None => self.config.calendar().today(self.clock.as_ref()),
        };
        let db = self.db.lock()?;
        let engine = ForecastEngine::new(&db, self.clock.as_ref(), &self.config);
        Ok(engine
            .report(as_of, next_period_days)?
            .into_iter()
            .map(|r| r.into())
            .collect())
    }

    /// Dispensed units per civil day per medicine over `[from, to)`.
    pub fn daily_series(&self, from: String, to: String) -> Result<Vec<FfiDailyDemand>, ClinicError> {
        let from = date_arg("from", &from)?;
        let to = date_arg("to", &to)?;
        let db = self.db.lock()?;
        let engine = ForecastEngine::new(&db, self.clock.as_ref(), &self.config);
        Ok(engine
            .daily_series(from, to)?
            .into_iter()
            .map(|d| FfiDailyDemand {
                date: format_date(d.date),
                classification: d.classification,
                medicine_name: d.medicine_name,
                quantity: d.quantity,
            })
            .collect())
    }

    // =========================================================================
    // Change Feed Operations
    // =========================================================================

    /// Committed changes after `after_seq`, oldest first.
    pub fn changes_since(&self, after_seq: i64, limit: u32) -> Result<Vec<FfiChangeEvent>, ClinicError> {
        let db = self.db.lock()?;
        Ok(db
            .changes_since(after_seq, limit as usize)?
            .into_iter()
            .map(|e| e.into())
            .collect())
    }

    pub fn latest_change_seq(&self) -> Result<i64, ClinicError> {
        let db = self.db.lock()?;
        Ok(db.latest_change_seq()?)
    }

    /// Push matching changes to `listener` from a background thread.
    ///
    /// `entity_type` is one of "patient", "visit", "lot", "medicine",
    /// "transaction"; `None` subscribes to all. Delivery is at least once.
    pub fn subscribe_changes(
        &self,
        entity_type: Option<String>,
        entity_id: Option<String>,
        listener: Box<dyn ChangeListener>,
    ) -> Result<(), ClinicError> {
        let entity_type = match entity_type {
            Some(t) => Some(
                EntityType::parse(t.trim())
                    .ok_or_else(|| ValidationError::new("entity_type", "unknown entity type"))?,
            ),
            None => None,
        };
        let receiver = self.feed.subscribe(ChangeFilter {
            entity_type,
            entity_id,
        });
        std::thread::spawn(move || {
            for event in receiver {
                listener.on_change(event.into());
            }
        });
        Ok(())
    }

    /// Deliver changes committed by other connections to this process.
    pub fn publish_changes(&self) -> Result<u32, ClinicError> {
        let db = self.db.lock()?;
        Ok(self.feed.publish(&db)? as u32)
    }
}

impl ClinicCore {
    fn ledger_export(
        &self,
        from: Option<String>,
        to: Option<String>,
    ) -> Result<export::LedgerExport, ClinicError> {
        let db = self.db.lock()?;
        let exporter = LedgerExporter::new(&db, self.clock.as_ref());
        let from = from.map(|f| timestamp_arg("from", &f)).transpose()?;
        let to = to.map(|t| timestamp_arg("to", &t)).transpose()?;
        let export = exporter.export_window(from, to)?;
        Ok(export)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    pub sex: String,
    pub birthdate: Option<String>,
    pub family_id: Option<String>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_number: Option<String>,
    pub is_queued: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Patient> for FfiPatient {
    fn from(patient: Patient) -> Self {
        Self {
            id: patient.id,
            first_name: patient.first_name,
            middle_name: patient.middle_name,
            last_name: patient.last_name,
            suffix: patient.suffix,
            sex: patient.sex.as_str().to_string(),
            birthdate: patient.birthdate.map(format_date),
            family_id: patient.family_id,
            contact_number: patient.contact_number,
            address: patient.address,
            emergency_contact_name: patient.emergency_contact_name,
            emergency_contact_number: patient.emergency_contact_number,
            is_queued: patient.is_queued,
            created_at: patient.created_at,
            updated_at: patient.updated_at,
        }
    }
}

/// FFI-safe registration form (raw field text).
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientRegistration {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    pub sex: String,
    pub birthdate: Option<String>,
    pub family_id: Option<String>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_number: Option<String>,
}

impl From<FfiPatientRegistration> for PatientRegistration {
    fn from(form: FfiPatientRegistration) -> Self {
        PatientRegistration {
            first_name: form.first_name,
            middle_name: form.middle_name,
            last_name: form.last_name,
            suffix: form.suffix,
            sex: form.sex,
            birthdate: form.birthdate,
            family_id: form.family_id,
            contact_number: form.contact_number,
            address: form.address,
            emergency_contact_name: form.emergency_contact_name,
            emergency_contact_number: form.emergency_contact_number,
        }
    }
}

/// FFI-safe vitals form (raw field text).
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiVitalsForm {
    pub height_cm: Option<String>,
    pub weight_kg: Option<String>,
    pub blood_pressure: Option<String>,
    pub temperature_c: Option<String>,
}

impl From<FfiVitalsForm> for VitalsForm {
    fn from(form: FfiVitalsForm) -> Self {
        VitalsForm {
            height_cm: form.height_cm,
            weight_kg: form.weight_kg,
            blood_pressure: form.blood_pressure,
            temperature_c: form.temperature_c,
        }
    }
}

/// FFI-safe visit.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiVisit {
    pub id: String,
    pub patient_id: String,
    pub status: String,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub blood_pressure: Option<String>,
    pub temperature_c: Option<f64>,
    pub chief_complaint: Option<String>,
    pub doctor_assessment: Option<String>,
    pub doctor_management: Option<String>,
    pub created_by: Option<String>,
    pub completed_by: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: String,
    pub queued_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancelled_at: Option<String>,
}

impl From<VisitRecord> for FfiVisit {
    fn from(visit: VisitRecord) -> Self {
        Self {
            id: visit.id,
            patient_id: visit.patient_id,
            status: visit.status.as_str().to_string(),
            height_cm: visit.vitals.height_cm,
            weight_kg: visit.vitals.weight_kg,
            blood_pressure: visit.vitals.blood_pressure,
            temperature_c: visit.vitals.temperature_c,
            chief_complaint: visit.chief_complaint,
            doctor_assessment: visit.doctor_assessment,
            doctor_management: visit.doctor_management,
            created_by: visit.created_by,
            completed_by: visit.completed_by,
            cancelled_by: visit.cancelled_by,
            cancel_reason: visit.cancel_reason,
            created_at: visit.created_at,
            queued_at: visit.queued_at,
            completed_at: visit.completed_at,
            cancelled_at: visit.cancelled_at,
        }
    }
}

/// A newly registered patient and their queued visit.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiQueuedVisit {
    pub patient: FfiPatient,
    pub visit: FfiVisit,
}

/// Shortfall handling for one call.
#[derive(Debug, Clone, Copy, uniffi::Enum)]
pub enum FfiShortfallPolicy {
    Reject,
    PartialFill,
}

impl From<FfiShortfallPolicy> for ShortfallPolicy {
    fn from(policy: FfiShortfallPolicy) -> Self {
        match policy {
            FfiShortfallPolicy::Reject => ShortfallPolicy::Reject,
            FfiShortfallPolicy::PartialFill => ShortfallPolicy::PartialFill,
        }
    }
}

/// FFI-safe prescription line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispenseItem {
    pub classification: String,
    pub medicine_name: String,
    /// Restrict to one dosage form; any form when absent
    pub dosage_form: Option<String>,
    pub quantity: i64,
}

impl From<FfiDispenseItem> for DispenseItem {
    fn from(item: FfiDispenseItem) -> Self {
        let base = DispenseItem::new(&item.classification, &item.medicine_name, item.quantity);
        match item.dosage_form {
            Some(form) => base.with_dosage_form(&form),
            None => base,
        }
    }
}

/// FFI-safe visit completion.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiVisitCompletion {
    pub assessment: String,
    pub management: String,
    pub items: Vec<FfiDispenseItem>,
    pub staff_id: String,
    pub idempotency_key: String,
}

impl From<FfiVisitCompletion> for VisitCompletion {
    fn from(completion: FfiVisitCompletion) -> Self {
        VisitCompletion {
            assessment: completion.assessment,
            management: completion.management,
            items: completion.items.into_iter().map(Into::into).collect(),
            staff_id: completion.staff_id,
            idempotency_key: completion.idempotency_key,
        }
    }
}

/// Optional context for a ledger entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTransactionLinks {
    pub visit_record_id: Option<String>,
    pub patient_id: Option<String>,
    pub staff_id: Option<String>,
    pub note: Option<String>,
}

impl From<FfiTransactionLinks> for TransactionLinks {
    fn from(links: FfiTransactionLinks) -> Self {
        TransactionLinks {
            visit_record_id: links.visit_record_id,
            patient_id: links.patient_id,
            staff_id: links.staff_id,
            note: links.note,
        }
    }
}

/// FFI-safe ledger entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTransaction {
    pub seq: i64,
    pub id: String,
    pub direction: String,
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub quantity: i64,
    pub visit_record_id: Option<String>,
    pub patient_id: Option<String>,
    pub staff_id: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
    pub entry_hash: String,
}

impl From<DispenseTransaction> for FfiTransaction {
    fn from(tx: DispenseTransaction) -> Self {
        Self {
            seq: tx.seq,
            id: tx.id,
            direction: tx.direction.as_str().to_string(),
            medicine_id: tx.medicine_id,
            classification: tx.classification,
            medicine_name: tx.medicine_name,
            dosage_form: tx.dosage_form,
            quantity: tx.quantity,
            visit_record_id: tx.visit_record_id,
            patient_id: tx.patient_id,
            staff_id: tx.staff_id,
            note: tx.note,
            created_at: tx.created_at,
            entry_hash: tx.entry_hash,
        }
    }
}

/// Units taken from one lot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLotConsumption {
    pub lot_id: String,
    pub dosage_form: String,
    pub expiration_date: String,
    pub taken: i64,
    pub remaining: i64,
}

impl From<LotConsumption> for FfiLotConsumption {
    fn from(c: LotConsumption) -> Self {
        Self {
            lot_id: c.lot_id,
            dosage_form: c.dosage_form,
            expiration_date: format_date(c.expiration_date),
            taken: c.taken,
            remaining: c.remaining,
        }
    }
}

/// FFI-safe dispense result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDispensed {
    pub classification: String,
    pub medicine_name: String,
    pub requested: i64,
    pub consumed: i64,
    /// Units still owed under partial fill
    pub shortfall: Option<i64>,
    pub consumptions: Vec<FfiLotConsumption>,
    pub transactions: Vec<FfiTransaction>,
}

impl From<Dispensed> for FfiDispensed {
    fn from(d: Dispensed) -> Self {
        let allocation = d.allocation;
        Self {
            classification: allocation.classification,
            medicine_name: allocation.medicine_name,
            requested: allocation.requested,
            consumed: allocation.consumed,
            shortfall: allocation.shortfall.map(|s| s.requested - s.available),
            consumptions: allocation.consumptions.into_iter().map(Into::into).collect(),
            transactions: d.transactions.into_iter().map(Into::into).collect(),
        }
    }
}

/// FFI-safe completion result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCompletionOutcome {
    pub visit: FfiVisit,
    pub dispensed: Vec<FfiDispensed>,
    pub fully_dispensed: bool,
    pub replayed: bool,
}

impl From<CompletionOutcome> for FfiCompletionOutcome {
    fn from(outcome: CompletionOutcome) -> Self {
        let fully_dispensed = outcome.fully_dispensed();
        Self {
            visit: outcome.visit.into(),
            dispensed: outcome.dispensed.into_iter().map(Into::into).collect(),
            fully_dispensed,
            replayed: outcome.replayed,
        }
    }
}

/// FFI-safe lot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLot {
    pub id: String,
    /// Short code shown on shelf labels
    pub code: String,
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub quantity: i64,
    pub expiration_date: String,
    pub received_at: String,
}

impl From<InventoryLot> for FfiLot {
    fn from(lot: InventoryLot) -> Self {
        Self {
            code: lot.display_code(),
            id: lot.id,
            medicine_id: lot.medicine_id,
            classification: lot.classification,
            medicine_name: lot.medicine_name,
            dosage_form: lot.dosage_form,
            quantity: lot.quantity,
            expiration_date: format_date(lot.expiration_date),
            received_at: lot.received_at,
        }
    }
}

/// FFI-safe lot intake form.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLotIntake {
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub quantity: i64,
    /// YYYY-MM-DD
    pub expiration_date: String,
    pub staff_id: Option<String>,
    pub note: Option<String>,
}

/// FFI-safe catalog medicine.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedicine {
    pub id: String,
    pub classification: String,
    pub name: String,
    pub dosage_form: String,
}

impl From<Medicine> for FfiMedicine {
    fn from(m: Medicine) -> Self {
        Self {
            id: m.id,
            classification: m.classification,
            name: m.name,
            dosage_form: m.dosage_form,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSimilarMedicine {
    pub medicine: FfiMedicine,
    pub similarity: f64,
}

/// FFI-safe intake result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLotReceipt {
    pub lot: FfiLot,
    pub transaction: FfiTransaction,
    pub medicine_created: bool,
    /// Existing names that may be the same medicine spelled differently
    pub similar: Vec<FfiSimilarMedicine>,
}

impl From<LotReceipt> for FfiLotReceipt {
    fn from(receipt: LotReceipt) -> Self {
        Self {
            lot: receipt.lot.into(),
            transaction: receipt.transaction.into(),
            medicine_created: receipt.medicine_created,
            similar: receipt
                .similar
                .into_iter()
                .map(|s| FfiSimilarMedicine {
                    medicine: s.medicine.into(),
                    similarity: s.similarity,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLotRemoval {
    pub lot: FfiLot,
    pub transaction: Option<FfiTransaction>,
}

impl From<LotRemoval> for FfiLotRemoval {
    fn from(removal: LotRemoval) -> Self {
        Self {
            lot: removal.lot.into(),
            transaction: removal.transaction.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockLine {
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub total_quantity: i64,
    pub lot_count: u32,
    pub nearest_expiry: Option<String>,
}

impl From<StockLine> for FfiStockLine {
    fn from(line: StockLine) -> Self {
        Self {
            medicine_id: line.medicine_id,
            classification: line.classification,
            medicine_name: line.medicine_name,
            dosage_form: line.dosage_form,
            total_quantity: line.total_quantity,
            lot_count: line.lot_count as u32,
            nearest_expiry: line.nearest_expiry.map(format_date),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockAlert {
    pub medicine_name: String,
    pub quantity: i64,
    /// "OUT" or "LOW"
    pub level: String,
}

/// FFI-safe alert panel.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAlertReport {
    pub alerts: Vec<FfiStockAlert>,
    pub preview: Vec<FfiStockAlert>,
    pub hidden_count: u32,
}

impl From<AlertReport> for FfiAlertReport {
    fn from(report: AlertReport) -> Self {
        let hidden_count = report.hidden_count() as u32;
        let convert = |alerts: Vec<analytics::StockAlert>| {
            alerts
                .into_iter()
                .map(|a| FfiStockAlert {
                    medicine_name: a.medicine_name,
                    quantity: a.quantity,
                    level: a.level.as_str().to_string(),
                })
                .collect()
        };
        Self {
            alerts: convert(report.alerts),
            preview: convert(report.preview),
            hidden_count,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDemandRow {
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: Option<String>,
    pub quantity: i64,
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDailyDemand {
    pub date: String,
    pub classification: String,
    pub medicine_name: String,
    pub quantity: i64,
}

/// FFI-safe forecast row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiForecastRow {
    pub classification: String,
    pub medicine_name: String,
    pub current_stock: i64,
    pub daily_average: f64,
    pub forecast: i64,
    /// "stable", "low_stock", "reorder_soon" or "monitor"
    pub status: String,
    pub restock_before: Option<String>,
}

impl From<ForecastRow> for FfiForecastRow {
    fn from(row: ForecastRow) -> Self {
        Self {
            classification: row.classification,
            medicine_name: row.medicine_name,
            current_stock: row.current_stock,
            daily_average: row.daily_average,
            forecast: row.forecast,
            status: row.status.as_str().to_string(),
            restock_before: row.restock_before,
        }
    }
}

/// FFI-safe chain report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChainReport {
    pub entry_count: i64,
    pub head_hash: Option<String>,
    pub first_broken_seq: Option<i64>,
    pub intact: bool,
}

impl From<ChainReport> for FfiChainReport {
    fn from(report: ChainReport) -> Self {
        let intact = report.is_intact();
        Self {
            entry_count: report.entry_count,
            head_hash: report.head_hash,
            first_broken_seq: report.first_broken_seq,
            intact,
        }
    }
}

/// FFI-safe change event.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiChangeEvent {
    pub seq: i64,
    pub entity_type: String,
    pub entity_id: String,
    pub change: String,
    pub created_at: String,
}

impl From<db::ChangeEvent> for FfiChangeEvent {
    fn from(event: db::ChangeEvent) -> Self {
        Self {
            seq: event.seq,
            entity_type: event.entity_type.as_str().to_string(),
            entity_id: event.entity_id,
            change: event.change,
            created_at: event.created_at,
        }
    }
}
