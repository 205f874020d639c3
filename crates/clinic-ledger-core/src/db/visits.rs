//! Visit record database operations.
//!
//! Status changes are conditional updates: they only touch rows that are still
//! queued, so a caller that lost a race sees zero affected rows instead of
//! overwriting a terminal state.

use rusqlite::{params, Connection, OptionalExtension};

use super::{conversion_error, Database, DbError, DbResult};
use crate::models::{VisitRecord, VisitStatus, Vitals};

const VISIT_COLUMNS: &str = r#"
    id, patient_id, status, is_queued, height_cm, weight_kg, blood_pressure,
    temperature_c, chief_complaint, doctor_assessment, doctor_management,
    created_by, completed_by, cancelled_by, cancel_reason,
    created_at, queued_at, completed_at, cancelled_at
"#;

/// Rows the queue considers waiting. Legacy rows carry only the boolean flag.
const QUEUED_PREDICATE: &str = "(status = 'queued' OR (status IS NULL AND is_queued = 1))";

#[derive(Debug)]
struct UnknownStatus(String);

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown visit status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

fn map_visit(row: &rusqlite::Row<'_>) -> rusqlite::Result<VisitRecord> {
    let status: Option<String> = row.get(2)?;
    let is_queued: bool = row.get(3)?;
    let status = match status {
        Some(s) => VisitStatus::parse(&s).ok_or_else(|| conversion_error(2, UnknownStatus(s)))?,
        // Legacy rows without a status: the flag is the only signal
        None if is_queued => VisitStatus::Queued,
        None => VisitStatus::Completed,
    };

    Ok(VisitRecord {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        status,
        vitals: Vitals {
            height_cm: row.get(4)?,
            weight_kg: row.get(5)?,
            blood_pressure: row.get(6)?,
            temperature_c: row.get(7)?,
        },
        chief_complaint: row.get(8)?,
        doctor_assessment: row.get(9)?,
        doctor_management: row.get(10)?,
        created_by: row.get(11)?,
        completed_by: row.get(12)?,
        cancelled_by: row.get(13)?,
        cancel_reason: row.get(14)?,
        created_at: row.get(15)?,
        queued_at: row.get(16)?,
        completed_at: row.get(17)?,
        cancelled_at: row.get(18)?,
    })
}

/// Insert a visit record.
pub fn insert_visit(conn: &Connection, visit: &VisitRecord) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO visit_records (
            id, patient_id, status, is_queued, height_cm, weight_kg, blood_pressure,
            temperature_c, chief_complaint, doctor_assessment, doctor_management,
            created_by, completed_by, cancelled_by, cancel_reason,
            created_at, queued_at, completed_at, cancelled_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
        "#,
        params![
            visit.id,
            visit.patient_id,
            visit.status.as_str(),
            visit.status == VisitStatus::Queued,
            visit.vitals.height_cm,
            visit.vitals.weight_kg,
            visit.vitals.blood_pressure,
            visit.vitals.temperature_c,
            visit.chief_complaint,
            visit.doctor_assessment,
            visit.doctor_management,
            visit.created_by,
            visit.completed_by,
            visit.cancelled_by,
            visit.cancel_reason,
            visit.created_at,
            visit.queued_at,
            visit.completed_at,
            visit.cancelled_at,
        ],
    )?;
    Ok(())
}

/// Get a visit by ID.
pub fn get_visit(conn: &Connection, id: &str) -> DbResult<Option<VisitRecord>> {
    conn.query_row(
        &format!("SELECT {} FROM visit_records WHERE id = ?", VISIT_COLUMNS),
        [id],
        map_visit,
    )
    .optional()
    .map_err(Into::into)
}

/// Waiting visits, oldest queue entry first.
pub fn list_queued(conn: &Connection) -> DbResult<Vec<VisitRecord>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM visit_records
        WHERE {}
        ORDER BY COALESCE(queued_at, created_at) ASC, created_at ASC, id ASC
        "#,
        VISIT_COLUMNS, QUEUED_PREDICATE
    ))?;
    let rows = stmt.query_map([], map_visit)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Whether the patient already has a waiting visit.
pub fn has_queued_visit(conn: &Connection, patient_id: &str) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM visit_records WHERE patient_id = ? AND {}",
            QUEUED_PREDICATE
        ),
        [patient_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Visit history for one patient, newest first.
pub fn list_for_patient(conn: &Connection, patient_id: &str) -> DbResult<Vec<VisitRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM visit_records WHERE patient_id = ? ORDER BY created_at DESC, id DESC",
        VISIT_COLUMNS
    ))?;
    let rows = stmt.query_map([patient_id], map_visit)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Move a queued visit to `completed`. Returns `false` if it was not queued.
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    assessment: &str,
    management: &str,
    staff_id: &str,
    now: &str,
) -> DbResult<bool> {
    let rows = conn.execute(
        &format!(
            r#"
            UPDATE visit_records SET
                status = 'completed',
                is_queued = 0,
                doctor_assessment = ?2,
                doctor_management = ?3,
                completed_by = ?4,
                completed_at = ?5
            WHERE id = ?1 AND {}
            "#,
            QUEUED_PREDICATE
        ),
        params![id, assessment, management, staff_id, now],
    )?;
    Ok(rows > 0)
}

/// Move a queued visit to `cancelled`. Returns `false` if it was not queued.
pub fn mark_cancelled(
    conn: &Connection,
    id: &str,
    staff_id: &str,
    reason: Option<&str>,
    now: &str,
) -> DbResult<bool> {
    let rows = conn.execute(
        &format!(
            r#"
            UPDATE visit_records SET
                status = 'cancelled',
                is_queued = 0,
                cancelled_by = ?2,
                cancel_reason = ?3,
                cancelled_at = ?4
            WHERE id = ?1 AND {}
            "#,
            QUEUED_PREDICATE
        ),
        params![id, staff_id, reason, now],
    )?;
    Ok(rows > 0)
}

/// Stored result of a completed visit, keyed by the caller's idempotency key.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub visit_id: String,
    pub idempotency_key: String,
    /// Serialized outcome returned to the first caller
    pub outcome_json: String,
    pub created_at: String,
}

/// Record the outcome of a completion.
pub fn insert_completion(conn: &Connection, record: &CompletionRecord) -> DbResult<()> {
    conn.execute(
        "INSERT INTO visit_completions (visit_id, idempotency_key, outcome, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.visit_id,
            record.idempotency_key,
            record.outcome_json,
            record.created_at
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!("visit {} already has a completion", record.visit_id))
        }
        other => other.into(),
    })?;
    Ok(())
}

/// Get the stored completion for a visit.
pub fn get_completion(conn: &Connection, visit_id: &str) -> DbResult<Option<CompletionRecord>> {
    conn.query_row(
        "SELECT visit_id, idempotency_key, outcome, created_at FROM visit_completions WHERE visit_id = ?",
        [visit_id],
        |row| {
            Ok(CompletionRecord {
                visit_id: row.get(0)?,
                idempotency_key: row.get(1)?,
                outcome_json: row.get(2)?,
                created_at: row.get(3)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

impl Database {
    /// Get a visit by ID.
    pub fn get_visit(&self, id: &str) -> DbResult<Option<VisitRecord>> {
        get_visit(&self.conn, id)
    }

    /// Visit history for one patient, newest first.
    pub fn list_visits_for_patient(&self, patient_id: &str) -> DbResult<Vec<VisitRecord>> {
        list_for_patient(&self.conn, patient_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::patients::insert_patient;
    use crate::models::{Patient, Sex};

    fn setup() -> (Database, Patient) {
        let db = Database::open_in_memory().unwrap();
        let patient = Patient::new("Ana".into(), "Cruz".into(), Sex::Female);
        insert_patient(db.conn(), &patient).unwrap();
        (db, patient)
    }

    fn visit(patient: &Patient, at: &str) -> VisitRecord {
        VisitRecord::new(patient.id.clone(), Vitals::default(), Some("cough".into()), at)
    }

    #[test]
    fn test_queue_order_and_terminal_guard() {
        let (db, patient) = setup();
        let later = visit(&patient, "2025-01-01T02:00:00.000000Z");
        let earlier = visit(&patient, "2025-01-01T01:00:00.000000Z");
        insert_visit(db.conn(), &later).unwrap();
        insert_visit(db.conn(), &earlier).unwrap();

        let queued = list_queued(db.conn()).unwrap();
        assert_eq!(queued.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(), vec![earlier.id.as_str(), later.id.as_str()]);

        assert!(mark_cancelled(db.conn(), &earlier.id, "nurse-1", Some("left"), "t").unwrap());
        // Terminal rows are never rewritten
        assert!(!mark_completed(db.conn(), &earlier.id, "a", "m", "dr", "t").unwrap());
        let stored = db.get_visit(&earlier.id).unwrap().unwrap();
        assert_eq!(stored.status, VisitStatus::Cancelled);
        assert_eq!(list_queued(db.conn()).unwrap().len(), 1);
    }

    #[test]
    fn test_legacy_rows_honor_queue_flag() {
        let (db, patient) = setup();
        db.conn()
            .execute(
                "INSERT INTO visit_records (id, patient_id, status, is_queued, created_at) VALUES ('legacy-q', ?1, NULL, 1, '2024-12-31T23:00:00.000000Z')",
                [&patient.id],
            )
            .unwrap();
        db.conn()
            .execute(
                "INSERT INTO visit_records (id, patient_id, status, is_queued, created_at) VALUES ('legacy-done', ?1, NULL, 0, '2024-12-30T23:00:00.000000Z')",
                [&patient.id],
            )
            .unwrap();

        let queued = list_queued(db.conn()).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, "legacy-q");
        assert_eq!(queued[0].status, VisitStatus::Queued);
        assert!(has_queued_visit(db.conn(), &patient.id).unwrap());

        assert!(mark_completed(db.conn(), "legacy-q", "a", "m", "dr", "t").unwrap());
        assert!(list_queued(db.conn()).unwrap().is_empty());
        assert_eq!(
            db.get_visit("legacy-done").unwrap().unwrap().status,
            VisitStatus::Completed
        );
    }

    #[test]
    fn test_completion_record_unique_per_visit() {
        let (db, patient) = setup();
        let v = visit(&patient, "2025-01-01T01:00:00.000000Z");
        insert_visit(db.conn(), &v).unwrap();

        let record = CompletionRecord {
            visit_id: v.id.clone(),
            idempotency_key: "k1".into(),
            outcome_json: "{}".into(),
            created_at: "t".into(),
        };
        insert_completion(db.conn(), &record).unwrap();
        assert_eq!(get_completion(db.conn(), &v.id).unwrap(), Some(record.clone()));

        let again = insert_completion(db.conn(), &record);
        assert!(matches!(again, Err(DbError::Constraint(_))));
    }
}
