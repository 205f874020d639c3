//! Patient registration and lookup.

use super::{QueueError, QueueResult};
use crate::clock::{format_timestamp, Clock};
use crate::config::LedgerConfig;
use crate::db::events::record_change;
use crate::db::patients::{insert_patient, update_emergency_contact};
use crate::db::{Database, EntityType};
use crate::models::{Patient, PatientRegistration};

/// Patient records. The queued flag is owned by [`VisitQueueManager`](super::VisitQueueManager).
pub struct PatientRegistry<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    max_retries: u32,
}

impl<'a> PatientRegistry<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &LedgerConfig) -> Self {
        Self {
            db,
            clock,
            max_retries: config.dispensing.max_conflict_retries,
        }
    }

    /// Validate and store a new patient.
    pub fn register(&self, form: &PatientRegistration) -> QueueResult<Patient> {
        let mut patient = Patient::from_registration(form)?;
        let now = format_timestamp(self.clock.now());
        patient.created_at = now.clone();
        patient.updated_at = now.clone();

        self.db.write_transaction(self.max_retries, |tx| {
            insert_patient(tx, &patient)?;
            record_change(tx, EntityType::Patient, &patient.id, "registered", &now)?;
            Ok::<_, QueueError>(())
        })?;
        tracing::info!(patient = %patient.id, "patient registered");
        Ok(patient)
    }

    pub fn get(&self, id: &str) -> QueueResult<Patient> {
        self.db
            .get_patient(id)?
            .ok_or_else(|| QueueError::NotFound(format!("patient {}", id)))
    }

    /// Patients whose first or last name starts with `query`.
    pub fn search(&self, query: &str, limit: usize) -> QueueResult<Vec<Patient>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.db.search_patients(query, limit)?)
    }

    pub fn family_members(&self, family_id: &str) -> QueueResult<Vec<Patient>> {
        Ok(self.db.list_family_members(family_id)?)
    }

    /// Replace emergency contact details. Blank values clear the field.
    pub fn update_emergency_contact(
        &self,
        id: &str,
        name: Option<&str>,
        number: Option<&str>,
    ) -> QueueResult<Patient> {
        let name = name.map(str::trim).filter(|s| !s.is_empty());
        let number = number.map(str::trim).filter(|s| !s.is_empty());
        let now = format_timestamp(self.clock.now());

        self.db.write_transaction(self.max_retries, |tx| {
            if !update_emergency_contact(tx, id, name, number, &now)? {
                return Err(QueueError::NotFound(format!("patient {}", id)));
            }
            record_change(tx, EntityType::Patient, id, "updated", &now)?;
            Ok(())
        })?;
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::Sex;

    fn form(first: &str, last: &str) -> PatientRegistration {
        PatientRegistration {
            first_name: first.into(),
            last_name: last.into(),
            sex: "female".into(),
            family_id: Some("fam-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        let config = LedgerConfig::default();
        let registry = PatientRegistry::new(&db, &SystemClock, &config);

        let ana = registry.register(&form("Ana", "Reyes")).unwrap();
        registry.register(&form("Bea", "Reyes")).unwrap();

        assert_eq!(registry.get(&ana.id).unwrap().sex, Sex::Female);
        assert_eq!(registry.search("rey", 10).unwrap().len(), 2);
        assert!(registry.search("  ", 10).unwrap().is_empty());
        assert_eq!(registry.family_members("fam-1").unwrap().len(), 2);
        assert!(matches!(registry.get("missing"), Err(QueueError::NotFound(_))));
    }

    #[test]
    fn test_invalid_registration_stores_nothing() {
        let db = Database::open_in_memory().unwrap();
        let config = LedgerConfig::default();
        let registry = PatientRegistry::new(&db, &SystemClock, &config);

        let mut bad = form("Ana", "Reyes");
        bad.sex = "x".into();
        assert!(matches!(registry.register(&bad), Err(QueueError::Validation(_))));
        assert!(db.search_patients("Reyes", 10).unwrap().is_empty());
    }

    #[test]
    fn test_update_emergency_contact() {
        let db = Database::open_in_memory().unwrap();
        let config = LedgerConfig::default();
        let registry = PatientRegistry::new(&db, &SystemClock, &config);
        let ana = registry.register(&form("Ana", "Reyes")).unwrap();

        let updated = registry
            .update_emergency_contact(&ana.id, Some(" Bea Reyes "), Some("0917 000 0000"))
            .unwrap();
        assert_eq!(updated.emergency_contact_name.as_deref(), Some("Bea Reyes"));

        let cleared = registry.update_emergency_contact(&ana.id, Some(""), None).unwrap();
        assert_eq!(cleared.emergency_contact_name, None);

        assert!(matches!(
            registry.update_emergency_contact("missing", None, None),
            Err(QueueError::NotFound(_))
        ));
    }
}
