//! Visit lifecycle: queued -> completed | cancelled.
//!
//! Completion is one transaction: every FEFO decrement, every `out` entry, the
//! status flip and the stored outcome commit together or not at all.

use chrono::NaiveDate;
use rusqlite::Connection;

use super::{CompletionOutcome, QueueError, QueueResult};
use crate::clock::{format_timestamp, CivilCalendar, Clock};
use crate::config::{LedgerConfig, ShortfallPolicy};
use crate::db::events::record_change;
use crate::db::patients::{get_patient, insert_patient, set_patient_queued};
use crate::db::visits::{
    get_completion, get_visit, has_queued_visit, insert_completion, insert_visit, list_queued,
    mark_cancelled, mark_completed, CompletionRecord,
};
use crate::db::{Database, EntityType};
use crate::ledger::dispense_in;
use crate::models::{
    Patient, PatientRegistration, TransactionLinks, VisitCompletion, VisitRecord, VisitStatus,
    VitalsForm,
};

/// The visit state machine.
pub struct VisitQueueManager<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    calendar: CivilCalendar,
    shortfall_policy: ShortfallPolicy,
    max_retries: u32,
}

fn illegal(visit: &VisitRecord, to: VisitStatus) -> QueueError {
    QueueError::IllegalTransition {
        visit_id: visit.id.clone(),
        from: visit.status,
        to,
    }
}

fn require_visit(conn: &Connection, visit_id: &str) -> QueueResult<VisitRecord> {
    get_visit(conn, visit_id)?.ok_or_else(|| QueueError::NotFound(format!("visit {}", visit_id)))
}

/// Clear the patient's queued flag unless another visit is still waiting.
fn release_patient(conn: &Connection, patient_id: &str, now: &str) -> QueueResult<()> {
    if !has_queued_visit(conn, patient_id)? {
        set_patient_queued(conn, patient_id, false, now)?;
        record_change(conn, EntityType::Patient, patient_id, "dequeued", now)?;
    }
    Ok(())
}

fn enqueue(conn: &Connection, visit: &VisitRecord, now: &str) -> QueueResult<()> {
    insert_visit(conn, visit)?;
    set_patient_queued(conn, &visit.patient_id, true, now)?;
    record_change(conn, EntityType::Visit, &visit.id, "queued", now)?;
    record_change(conn, EntityType::Patient, &visit.patient_id, "queued", now)?;
    Ok(())
}

impl<'a> VisitQueueManager<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &LedgerConfig) -> Self {
        Self {
            db,
            clock,
            calendar: config.calendar(),
            shortfall_policy: config.dispensing.shortfall_policy,
            max_retries: config.dispensing.max_conflict_retries,
        }
    }

    /// Queue a new visit for an existing patient.
    pub fn create(
        &self,
        patient_id: &str,
        vitals: &VitalsForm,
        chief_complaint: Option<&str>,
        staff_id: Option<&str>,
    ) -> QueueResult<VisitRecord> {
        let vitals = vitals.parse()?;
        let now = format_timestamp(self.clock.now());
        let mut visit = VisitRecord::new(
            patient_id.to_string(),
            vitals,
            clean(chief_complaint),
            &now,
        );
        visit.created_by = staff_id.map(str::to_string);

        self.db.write_transaction(self.max_retries, |tx| {
            if get_patient(tx, patient_id)?.is_none() {
                return Err(QueueError::NotFound(format!("patient {}", patient_id)));
            }
            enqueue(tx, &visit, &now)
        })?;

        tracing::info!(visit = %visit.id, patient = %patient_id, "visit queued");
        Ok(visit)
    }

    /// Register a patient and queue their first visit in one step.
    pub fn register_and_queue(
        &self,
        registration: &PatientRegistration,
        vitals: &VitalsForm,
        chief_complaint: Option<&str>,
        staff_id: Option<&str>,
    ) -> QueueResult<(Patient, VisitRecord)> {
        let mut patient = Patient::from_registration(registration)?;
        let vitals = vitals.parse()?;
        let now = format_timestamp(self.clock.now());
        patient.created_at = now.clone();
        patient.updated_at = now.clone();

        let mut visit = VisitRecord::new(patient.id.clone(), vitals, clean(chief_complaint), &now);
        visit.created_by = staff_id.map(str::to_string);

        self.db.write_transaction(self.max_retries, |tx| {
            insert_patient(tx, &patient)?;
            record_change(tx, EntityType::Patient, &patient.id, "registered", &now)?;
            enqueue(tx, &visit, &now)
        })?;
        patient.is_queued = true;

        tracing::info!(visit = %visit.id, patient = %patient.id, "patient registered and queued");
        Ok((patient, visit))
    }

    /// Waiting visits, first come first served.
    pub fn list_queued(&self) -> QueueResult<Vec<VisitRecord>> {
        Ok(list_queued(self.db.conn())?)
    }

    pub fn get_visit(&self, visit_id: &str) -> QueueResult<VisitRecord> {
        require_visit(self.db.conn(), visit_id)
    }

    /// Visit history for one patient, newest first.
    pub fn list_visits_for_patient(&self, patient_id: &str) -> QueueResult<Vec<VisitRecord>> {
        Ok(self.db.list_visits_for_patient(patient_id)?)
    }

    /// Withdraw a queued visit.
    pub fn cancel(
        &self,
        visit_id: &str,
        staff_id: &str,
        reason: Option<&str>,
    ) -> QueueResult<VisitRecord> {
        let staff_id = crate::models::require_text("staff_id", staff_id)?;
        let reason = clean(reason);
        let now = format_timestamp(self.clock.now());

        let visit = self.db.write_transaction(self.max_retries, |tx| {
            let visit = require_visit(tx, visit_id)?;
            if !visit.status.can_transition_to(VisitStatus::Cancelled) {
                return Err(illegal(&visit, VisitStatus::Cancelled));
            }
            if !mark_cancelled(tx, visit_id, &staff_id, reason.as_deref(), &now)? {
                return Err(illegal(&require_visit(tx, visit_id)?, VisitStatus::Cancelled));
            }
            release_patient(tx, &visit.patient_id, &now)?;
            record_change(tx, EntityType::Visit, visit_id, "cancelled", &now)?;
            require_visit(tx, visit_id)
        })?;

        tracing::info!(visit = %visit_id, staff = %staff_id, "visit cancelled");
        Ok(visit)
    }

    /// Chart and dispense a queued visit.
    ///
    /// Retrying with the same idempotency key returns the stored outcome with
    /// `replayed` set. `policy` overrides the configured shortfall policy.
    pub fn complete(
        &self,
        visit_id: &str,
        completion: &VisitCompletion,
        policy: Option<ShortfallPolicy>,
    ) -> QueueResult<CompletionOutcome> {
        completion.validate()?;
        let policy = policy.unwrap_or(self.shortfall_policy);
        let at = self.clock.now();
        let today = self.calendar.civil_date(at);
        let now = format_timestamp(at);

        let outcome = self.db.write_transaction(self.max_retries, |tx| {
            self.complete_in(tx, visit_id, completion, policy, today, &now)
        })?;

        if outcome.replayed {
            tracing::info!(visit = %visit_id, "completion replayed");
        } else {
            tracing::info!(
                visit = %visit_id,
                staff = %completion.staff_id,
                items = outcome.dispensed.len(),
                fully_dispensed = outcome.fully_dispensed(),
                "visit completed"
            );
        }
        Ok(outcome)
    }

    fn complete_in(
        &self,
        conn: &Connection,
        visit_id: &str,
        completion: &VisitCompletion,
        policy: ShortfallPolicy,
        today: NaiveDate,
        now: &str,
    ) -> QueueResult<CompletionOutcome> {
        let visit = require_visit(conn, visit_id)?;

        if let Some(previous) = get_completion(conn, visit_id)? {
            if previous.idempotency_key == completion.idempotency_key.trim() {
                let mut outcome: CompletionOutcome = serde_json::from_str(&previous.outcome_json)?;
                outcome.replayed = true;
                return Ok(outcome);
            }
            return Err(illegal(&visit, VisitStatus::Completed));
        }
        if !visit.status.can_transition_to(VisitStatus::Completed) {
            return Err(illegal(&visit, VisitStatus::Completed));
        }

        let links = TransactionLinks {
            visit_record_id: Some(visit.id.clone()),
            patient_id: Some(visit.patient_id.clone()),
            staff_id: Some(completion.staff_id.trim().to_string()),
            note: None,
        };
        let mut dispensed = Vec::with_capacity(completion.items.len());
        for item in &completion.items {
            dispensed.push(dispense_in(conn, item, &links, today, policy, now)?);
        }

        if !mark_completed(
            conn,
            visit_id,
            completion.assessment.trim(),
            completion.management.trim(),
            completion.staff_id.trim(),
            now,
        )? {
            return Err(illegal(&require_visit(conn, visit_id)?, VisitStatus::Completed));
        }
        release_patient(conn, &visit.patient_id, now)?;
        record_change(conn, EntityType::Visit, visit_id, "completed", now)?;

        let outcome = CompletionOutcome {
            visit: require_visit(conn, visit_id)?,
            dispensed,
            replayed: false,
        };
        insert_completion(
            conn,
            &CompletionRecord {
                visit_id: visit_id.to_string(),
                idempotency_key: completion.idempotency_key.trim().to_string(),
                outcome_json: serde_json::to_string(&outcome)?,
                created_at: now.to_string(),
            },
        )?;
        Ok(outcome)
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
