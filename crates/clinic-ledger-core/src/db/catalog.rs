//! Medicine catalog database operations.

use rusqlite::{params, Connection, OptionalExtension};
use strsim::jaro_winkler;

use super::{Database, DbResult};
use crate::models::{lookup_key, Medicine, SimilarMedicine};

/// Names at least this similar (and not identical) are reported as likely typos.
const SIMILARITY_THRESHOLD: f64 = 0.88;

const MEDICINE_COLUMNS: &str = "id, classification, name, dosage_form, created_at";

fn map_medicine(row: &rusqlite::Row<'_>) -> rusqlite::Result<Medicine> {
    Ok(Medicine {
        id: row.get(0)?,
        classification: row.get(1)?,
        name: row.get(2)?,
        dosage_form: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Insert a catalog entry.
pub fn insert_medicine(conn: &Connection, medicine: &Medicine) -> DbResult<()> {
    let (classification_key, name_key, dosage_form_key) = medicine.lookup_keys();
    conn.execute(
        r#"
        INSERT INTO medicines (
            id, classification, name, dosage_form,
            classification_key, name_key, dosage_form_key, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            medicine.id,
            medicine.classification,
            medicine.name,
            medicine.dosage_form,
            classification_key,
            name_key,
            dosage_form_key,
            medicine.created_at,
        ],
    )?;
    Ok(())
}

/// Get a catalog entry by ID.
pub fn get_medicine(conn: &Connection, id: &str) -> DbResult<Option<Medicine>> {
    conn.query_row(
        &format!("SELECT {} FROM medicines WHERE id = ?", MEDICINE_COLUMNS),
        [id],
        map_medicine,
    )
    .optional()
    .map_err(Into::into)
}

/// Find the entry matching (classification, name, dosage form), ignoring case and spacing.
pub fn find_medicine(
    conn: &Connection,
    classification: &str,
    name: &str,
    dosage_form: &str,
) -> DbResult<Option<Medicine>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM medicines WHERE classification_key = ? AND name_key = ? AND dosage_form_key = ?",
            MEDICINE_COLUMNS
        ),
        params![lookup_key(classification), lookup_key(name), lookup_key(dosage_form)],
        map_medicine,
    )
    .optional()
    .map_err(Into::into)
}

/// Return the matching entry, creating it if absent. The flag is `true` when created.
pub fn ensure_medicine(
    conn: &Connection,
    classification: &str,
    name: &str,
    dosage_form: &str,
) -> DbResult<(Medicine, bool)> {
    if let Some(existing) = find_medicine(conn, classification, name, dosage_form)? {
        return Ok((existing, false));
    }
    let medicine = Medicine::new(classification, name, dosage_form);
    insert_medicine(conn, &medicine)?;
    Ok((medicine, true))
}

/// All dosage forms of a medicine, optionally within one classification.
pub fn find_medicines(
    conn: &Connection,
    classification: Option<&str>,
    name: &str,
) -> DbResult<Vec<Medicine>> {
    let mut stmt = conn.prepare(&format!(
        r#"
        SELECT {} FROM medicines
        WHERE name_key = ?1 AND (?2 IS NULL OR classification_key = ?2)
        ORDER BY dosage_form_key
        "#,
        MEDICINE_COLUMNS
    ))?;
    let rows = stmt.query_map(
        params![lookup_key(name), classification.map(lookup_key)],
        map_medicine,
    )?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Every catalog entry, ordered for selection menus.
pub fn list_medicines(conn: &Connection) -> DbResult<Vec<Medicine>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM medicines ORDER BY classification_key, name_key, dosage_form_key",
        MEDICINE_COLUMNS
    ))?;
    let rows = stmt.query_map([], map_medicine)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

/// Catalog entries whose name is close to, but not the same as, `name`.
pub fn suggest_similar(conn: &Connection, name: &str, limit: usize) -> DbResult<Vec<SimilarMedicine>> {
    let query = lookup_key(name);
    let mut similar: Vec<SimilarMedicine> = list_medicines(conn)?
        .into_iter()
        .filter_map(|medicine| {
            let key = lookup_key(&medicine.name);
            if key == query {
                return None;
            }
            let similarity = jaro_winkler(&key, &query);
            (similarity >= SIMILARITY_THRESHOLD).then_some(SimilarMedicine { medicine, similarity })
        })
        .collect();

    similar.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    similar.truncate(limit);
    Ok(similar)
}

impl Database {
    /// Return the catalog entry for the triple, creating it if needed.
    pub fn ensure_medicine(
        &self,
        classification: &str,
        name: &str,
        dosage_form: &str,
    ) -> DbResult<Medicine> {
        ensure_medicine(&self.conn, classification, name, dosage_form).map(|(m, _)| m)
    }

    /// Get a catalog entry by ID.
    pub fn get_medicine(&self, id: &str) -> DbResult<Option<Medicine>> {
        get_medicine(&self.conn, id)
    }

    /// All dosage forms of a medicine.
    pub fn find_medicines(&self, classification: Option<&str>, name: &str) -> DbResult<Vec<Medicine>> {
        find_medicines(&self.conn, classification, name)
    }

    /// Every catalog entry.
    pub fn list_medicines(&self) -> DbResult<Vec<Medicine>> {
        list_medicines(&self.conn)
    }

    /// Distinct classifications for the first selection menu.
    pub fn list_classifications(&self) -> DbResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT MIN(classification) FROM medicines GROUP BY classification_key ORDER BY classification_key",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Dosage forms registered for a medicine.
    pub fn list_dosage_forms(&self, classification: &str, name: &str) -> DbResult<Vec<String>> {
        Ok(find_medicines(&self.conn, Some(classification), name)?
            .into_iter()
            .map(|m| m.dosage_form)
            .collect())
    }

    /// Likely-typo suggestions for a medicine name.
    pub fn suggest_similar_medicines(&self, name: &str, limit: usize) -> DbResult<Vec<SimilarMedicine>> {
        suggest_similar(&self.conn, name, limit)
    }
}
