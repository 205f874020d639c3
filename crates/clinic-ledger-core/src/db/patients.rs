//! Patient database operations.

use rusqlite::{params, Connection, OptionalExtension};

use super::{conversion_error, optional_date_column, Database, DbResult};
use crate::clock::format_date;
use crate::models::{Patient, Sex};

const PATIENT_COLUMNS: &str = r#"
    id, first_name, middle_name, last_name, suffix, sex, birthdate, family_id,
    contact_number, address, emergency_contact_name, emergency_contact_number,
    is_queued, created_at, updated_at
"#;

fn map_patient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Patient> {
    let sex: String = row.get(5)?;
    Ok(Patient {
        id: row.get(0)?,
        first_name: row.get(1)?,
        middle_name: row.get(2)?,
        last_name: row.get(3)?,
        suffix: row.get(4)?,
        sex: Sex::parse(&sex).map_err(|e| conversion_error(5, e))?,
        birthdate: optional_date_column(row, 6)?,
        family_id: row.get(7)?,
        contact_number: row.get(8)?,
        address: row.get(9)?,
        emergency_contact_name: row.get(10)?,
        emergency_contact_number: row.get(11)?,
        is_queued: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Insert a new patient.
pub fn insert_patient(conn: &Connection, patient: &Patient) -> DbResult<()> {
    conn.execute(
        r#"
        INSERT INTO patients (
            id, first_name, middle_name, last_name, suffix, sex, birthdate, family_id,
            contact_number, address, emergency_contact_name, emergency_contact_number,
            is_queued, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        params![
            patient.id,
            patient.first_name,
            patient.middle_name,
            patient.last_name,
            patient.suffix,
            patient.sex.as_str(),
            patient.birthdate.map(format_date),
            patient.family_id,
            patient.contact_number,
            patient.address,
            patient.emergency_contact_name,
            patient.emergency_contact_number,
            patient.is_queued,
            patient.created_at,
            patient.updated_at,
        ],
    )?;
    Ok(())
}

/// Get a patient by ID.
pub fn get_patient(conn: &Connection, id: &str) -> DbResult<Option<Patient>> {
    conn.query_row(
        &format!("SELECT {} FROM patients WHERE id = ?", PATIENT_COLUMNS),
        [id],
        map_patient,
    )
    .optional()
    .map_err(Into::into)
}

/// Set the denormalized queue flag. Returns `false` if the patient does not exist.
pub fn set_patient_queued(conn: &Connection, id: &str, queued: bool, now: &str) -> DbResult<bool> {
    let rows = conn.execute(
        "UPDATE patients SET is_queued = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, queued, now],
    )?;
    Ok(rows > 0)
}

/// Update emergency contact details. Returns `false` if the patient does not exist.
pub fn update_emergency_contact(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    number: Option<&str>,
    now: &str,
) -> DbResult<bool> {
    let rows = conn.execute(
        r#"
        UPDATE patients SET
            emergency_contact_name = ?2,
            emergency_contact_number = ?3,
            updated_at = ?4
        WHERE id = ?1
        "#,
        params![id, name, number, now],
    )?;
    Ok(rows > 0)
}

impl Database {
    /// Insert a new patient.
    pub fn insert_patient(&self, patient: &Patient) -> DbResult<()> {
        insert_patient(&self.conn, patient)
    }

    /// Get a patient by ID.
    pub fn get_patient(&self, id: &str) -> DbResult<Option<Patient>> {
        get_patient(&self.conn, id)
    }

    /// Search patients by last- or first-name prefix.
    pub fn search_patients(&self, query: &str, limit: usize) -> DbResult<Vec<Patient>> {
        let pattern = format!("{}%", escape_like(query.trim()));
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM patients
            WHERE last_name LIKE ?1 ESCAPE '\' OR first_name LIKE ?1 ESCAPE '\'
            ORDER BY last_name COLLATE NOCASE, first_name COLLATE NOCASE
            LIMIT ?2
            "#,
            PATIENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![pattern, limit as i64], map_patient)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// All patients sharing a family ID.
    pub fn list_family_members(&self, family_id: &str) -> DbResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients WHERE family_id = ? ORDER BY birthdate, last_name, first_name",
            PATIENT_COLUMNS
        ))?;
        let rows = stmt.query_map([family_id], map_patient)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Update emergency contact details.
    pub fn update_emergency_contact(
        &self,
        id: &str,
        name: Option<&str>,
        number: Option<&str>,
        now: &str,
    ) -> DbResult<bool> {
        update_emergency_contact(&self.conn, id, name, number, now)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_patient_roundtrip() {
        let db = setup_db();
        let mut patient = Patient::new("Juan".into(), "Dela Cruz".into(), Sex::Male);
        patient.birthdate = NaiveDate::from_ymd_opt(1985, 7, 4);
        patient.family_id = Some("fam-1".into());

        db.insert_patient(&patient).unwrap();

        let fetched = db.get_patient(&patient.id).unwrap().unwrap();
        assert_eq!(fetched, patient);
        assert!(db.get_patient("missing").unwrap().is_none());
    }

    #[test]
    fn test_search_by_prefix() {
        let db = setup_db();
        db.insert_patient(&Patient::new("Maria".into(), "Santos".into(), Sex::Female)).unwrap();
        db.insert_patient(&Patient::new("Pedro".into(), "Santiago".into(), Sex::Male)).unwrap();
        db.insert_patient(&Patient::new("Santa".into(), "Reyes".into(), Sex::Female)).unwrap();
        db.insert_patient(&Patient::new("Ana".into(), "Cruz".into(), Sex::Female)).unwrap();

        let found = db.search_patients("san", 10).unwrap();
        let names: Vec<_> = found.iter().map(|p| p.last_name.as_str()).collect();
        assert_eq!(names, vec!["Reyes", "Santiago", "Santos"]);

        // LIKE wildcards in input are literal
        assert!(db.search_patients("%", 10).unwrap().is_empty());
    }

    #[test]
    fn test_family_and_emergency_contact() {
        let db = setup_db();
        let mut a = Patient::new("Ana".into(), "Reyes".into(), Sex::Female);
        a.family_id = Some("fam-7".into());
        let mut b = Patient::new("Ben".into(), "Reyes".into(), Sex::Male);
        b.family_id = Some("fam-7".into());
        db.insert_patient(&a).unwrap();
        db.insert_patient(&b).unwrap();

        assert_eq!(db.list_family_members("fam-7").unwrap().len(), 2);

        assert!(db
            .update_emergency_contact(&a.id, Some("Ben Reyes"), Some("0917"), "2025-01-01T00:00:00.000000Z")
            .unwrap());
        let updated = db.get_patient(&a.id).unwrap().unwrap();
        assert_eq!(updated.emergency_contact_name.as_deref(), Some("Ben Reyes"));
        assert!(!db.update_emergency_contact("missing", None, None, "x").unwrap());
    }

    #[test]
    fn test_set_queued_flag() {
        let db = setup_db();
        let patient = Patient::new("Ana".into(), "Cruz".into(), Sex::Female);
        db.insert_patient(&patient).unwrap();

        assert!(set_patient_queued(db.conn(), &patient.id, true, "t1").unwrap());
        assert!(db.get_patient(&patient.id).unwrap().unwrap().is_queued);
        assert!(!set_patient_queued(db.conn(), "missing", true, "t1").unwrap());
    }
}
