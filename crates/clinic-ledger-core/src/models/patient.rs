//! Patient models.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::validation::{require_text, ValidationError};

/// Recorded sex.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_lowercase().as_str() {
            "male" | "m" => Ok(Sex::Male),
            "female" | "f" => Ok(Sex::Female),
            other => Err(ValidationError::new("sex", format!("unknown value '{}'", other))),
        }
    }
}

/// A registered patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    /// Local UUID
    pub id: String,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    /// Name suffix (e.g., "Jr.")
    pub suffix: Option<String>,
    pub sex: Sex,
    pub birthdate: Option<NaiveDate>,
    /// Household grouping shared by family members
    pub family_id: Option<String>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_number: Option<String>,
    /// Denormalized: patient currently has a queued visit
    pub is_queued: bool,
    /// Creation timestamp
    pub created_at: String,
    /// Last update timestamp
    pub updated_at: String,
}

/// Registration form input.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientRegistration {
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub suffix: Option<String>,
    pub sex: String,
    /// `YYYY-MM-DD`
    pub birthdate: Option<String>,
    pub family_id: Option<String>,
    pub contact_number: Option<String>,
    pub address: Option<String>,
    pub emergency_contact_name: Option<String>,
    pub emergency_contact_number: Option<String>,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(first_name: String, last_name: String, sex: Sex) -> Self {
        let now = crate::clock::format_timestamp(chrono::Utc::now());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            first_name,
            middle_name: None,
            last_name,
            suffix: None,
            sex,
            birthdate: None,
            family_id: None,
            contact_number: None,
            address: None,
            emergency_contact_name: None,
            emergency_contact_number: None,
            is_queued: false,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Validate a registration form into a new patient.
    pub fn from_registration(form: &PatientRegistration) -> Result<Self, ValidationError> {
        let first_name = require_text("first_name", &form.first_name)?;
        let last_name = require_text("last_name", &form.last_name)?;
        let sex = Sex::parse(&form.sex)?;
        let birthdate = match non_blank(&form.birthdate) {
            Some(raw) => Some(crate::clock::parse_date(&raw).ok_or_else(|| {
                ValidationError::new("birthdate", format!("'{}' is not a YYYY-MM-DD date", raw))
            })?),
            None => None,
        };

        let mut patient = Self::new(first_name, last_name, sex);
        patient.middle_name = non_blank(&form.middle_name);
        patient.suffix = non_blank(&form.suffix);
        patient.birthdate = birthdate;
        patient.family_id = non_blank(&form.family_id);
        patient.contact_number = non_blank(&form.contact_number);
        patient.address = non_blank(&form.address);
        patient.emergency_contact_name = non_blank(&form.emergency_contact_name);
        patient.emergency_contact_number = non_blank(&form.emergency_contact_number);
        Ok(patient)
    }

    /// "Last, First Middle Suffix" as shown in queue lists.
    pub fn display_name(&self) -> String {
        let mut name = format!("{}, {}", self.last_name, self.first_name);
        if let Some(middle) = &self.middle_name {
            name.push(' ');
            name.push_str(middle);
        }
        if let Some(suffix) = &self.suffix {
            name.push(' ');
            name.push_str(suffix);
        }
        name
    }

    /// Age in whole years on `date`.
    pub fn age_on(&self, date: NaiveDate) -> Option<u32> {
        let birth = self.birthdate?;
        if date < birth {
            return None;
        }
        let mut years = date.year() - birth.year();
        if (date.month(), date.day()) < (birth.month(), birth.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_patient() {
        let patient = Patient::new("Juan".into(), "Dela Cruz".into(), Sex::Male);
        assert_eq!(patient.id.len(), 36);
        assert!(!patient.is_queued);
        assert_eq!(patient.display_name(), "Dela Cruz, Juan");
    }

    #[test]
    fn test_from_registration_validates() {
        let form = PatientRegistration {
            first_name: "Maria".into(),
            last_name: "Santos".into(),
            sex: "F".into(),
            birthdate: Some("1990-02-14".into()),
            middle_name: Some("  ".into()),
            ..Default::default()
        };
        let patient = Patient::from_registration(&form).unwrap();
        assert_eq!(patient.sex, Sex::Female);
        assert_eq!(patient.middle_name, None);
        assert_eq!(patient.birthdate, NaiveDate::from_ymd_opt(1990, 2, 14));

        let bad = PatientRegistration {
            birthdate: Some("14/02/1990".into()),
            ..form.clone()
        };
        assert_eq!(Patient::from_registration(&bad).unwrap_err().field, "birthdate");

        let missing = PatientRegistration {
            last_name: "".into(),
            ..form
        };
        assert_eq!(Patient::from_registration(&missing).unwrap_err().field, "last_name");
    }

    #[test]
    fn test_age_on() {
        let mut patient = Patient::new("Ana".into(), "Reyes".into(), Sex::Female);
        patient.birthdate = NaiveDate::from_ymd_opt(2000, 6, 15);
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2025, 6, 14).unwrap()), Some(24));
        assert_eq!(patient.age_on(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()), Some(25));
    }
}
