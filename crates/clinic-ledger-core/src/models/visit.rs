//! Visit record models and the visit status machine.

use serde::{Deserialize, Serialize};

use super::validation::{require_positive_quantity, require_text, ValidationError};

/// Visit status.
///
/// `Queued` is the only initial state; `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VisitStatus {
    /// Waiting for a clinician
    Queued,
    /// Charted and dispensed
    Completed,
    /// Withdrawn by staff
    Cancelled,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Queued => "queued",
            VisitStatus::Completed => "completed",
            VisitStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(VisitStatus::Queued),
            "completed" => Some(VisitStatus::Completed),
            "cancelled" => Some(VisitStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, VisitStatus::Queued)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(&self, next: VisitStatus) -> bool {
        matches!(
            (self, next),
            (VisitStatus::Queued, VisitStatus::Completed) | (VisitStatus::Queued, VisitStatus::Cancelled)
        )
    }
}

/// Blood pressure reading.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BloodPressure {
    pub systolic: u16,
    pub diastolic: u16,
}

impl BloodPressure {
    /// Parse `SYS/DIA` (e.g., "120/80").
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let malformed =
            || ValidationError::new("blood_pressure", format!("'{}' is not SYS/DIA", raw.trim()));

        let (sys, dia) = raw.trim().split_once('/').ok_or_else(malformed)?;
        let systolic: u16 = sys.trim().parse().map_err(|_| malformed())?;
        let diastolic: u16 = dia.trim().parse().map_err(|_| malformed())?;

        for value in [systolic, diastolic] {
            if !(40..=300).contains(&value) {
                return Err(ValidationError::new(
                    "blood_pressure",
                    format!("{} mmHg is outside 40-300", value),
                ));
            }
        }
        if systolic <= diastolic {
            return Err(ValidationError::new(
                "blood_pressure",
                "systolic must be greater than diastolic",
            ));
        }
        Ok(Self { systolic, diastolic })
    }
}

impl std::fmt::Display for BloodPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.systolic, self.diastolic)
    }
}

/// Vital signs taken at intake.
///
/// Optional at the storage level because legacy rows may lack them; new visits
/// are created from a validated [`VitalsForm`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Vitals {
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub blood_pressure: Option<String>,
    pub temperature_c: Option<f64>,
}

/// Raw vitals as typed into the intake form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VitalsForm {
    pub height_cm: Option<String>,
    pub weight_kg: Option<String>,
    pub blood_pressure: Option<String>,
    pub temperature_c: Option<String>,
}

impl VitalsForm {
    /// Validate. Weight, temperature and blood pressure are required.
    pub fn parse(&self) -> Result<Vitals, ValidationError> {
        let height_cm = match present(&self.height_cm) {
            Some(raw) => Some(parse_measure("height_cm", raw, 0.0, 300.0)?),
            None => None,
        };
        let weight_kg = parse_measure(
            "weight_kg",
            present(&self.weight_kg).ok_or_else(|| ValidationError::new("weight_kg", "is required"))?,
            0.0,
            500.0,
        )?;
        let temperature_c = parse_measure(
            "temperature_c",
            present(&self.temperature_c)
                .ok_or_else(|| ValidationError::new("temperature_c", "is required"))?,
            30.0,
            45.0,
        )?;
        let blood_pressure = BloodPressure::parse(
            present(&self.blood_pressure)
                .ok_or_else(|| ValidationError::new("blood_pressure", "is required"))?,
        )?;

        Ok(Vitals {
            height_cm,
            weight_kg: Some(weight_kg),
            blood_pressure: Some(blood_pressure.to_string()),
            temperature_c: Some(temperature_c),
        })
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Parse a decimal strictly above `min_exclusive` and at most `max`.
fn parse_measure(field: &str, raw: &str, min_exclusive: f64, max: f64) -> Result<f64, ValidationError> {
    let value: f64 = raw
        .parse()
        .map_err(|_| ValidationError::new(field, format!("'{}' is not a number", raw)))?;
    if !value.is_finite() || value <= min_exclusive || value > max {
        return Err(ValidationError::new(
            field,
            format!("{} is outside the plausible range", value),
        ));
    }
    Ok(value)
}

/// One clinical encounter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitRecord {
    /// Unique visit ID
    pub id: String,
    /// Patient ID
    pub patient_id: String,
    pub status: VisitStatus,
    pub vitals: Vitals,
    pub chief_complaint: Option<String>,
    pub doctor_assessment: Option<String>,
    pub doctor_management: Option<String>,
    /// Staff who queued the visit
    pub created_by: Option<String>,
    /// Clinician who completed the visit
    pub completed_by: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Queue-entry timestamp (NULL on some legacy rows)
    pub queued_at: Option<String>,
    pub completed_at: Option<String>,
    pub cancelled_at: Option<String>,
}

impl VisitRecord {
    /// Create a new queued visit.
    pub fn new(patient_id: String, vitals: Vitals, chief_complaint: Option<String>, now: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id,
            status: VisitStatus::Queued,
            vitals,
            chief_complaint,
            doctor_assessment: None,
            doctor_management: None,
            created_by: None,
            completed_by: None,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now.to_string(),
            queued_at: Some(now.to_string()),
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// Timestamp used for FIFO ordering.
    pub fn queue_position_key(&self) -> &str {
        self.queued_at.as_deref().unwrap_or(&self.created_at)
    }
}

/// A medicine line handed out at completion (or walk-in dispensing).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispenseItem {
    pub classification: String,
    pub medicine_name: String,
    /// Restrict to one dosage form; `None` draws from every form of the medicine
    pub dosage_form: Option<String>,
    pub quantity: i64,
}

impl DispenseItem {
    pub fn new(classification: &str, medicine_name: &str, quantity: i64) -> Self {
        Self {
            classification: classification.to_string(),
            medicine_name: medicine_name.to_string(),
            dosage_form: None,
            quantity,
        }
    }

    pub fn with_dosage_form(mut self, dosage_form: &str) -> Self {
        self.dosage_form = Some(dosage_form.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("classification", &self.classification)?;
        require_text("medicine_name", &self.medicine_name)?;
        require_positive_quantity("quantity", self.quantity)?;
        Ok(())
    }
}

/// Clinician's completion input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisitCompletion {
    pub assessment: String,
    pub management: String,
    pub items: Vec<DispenseItem>,
    /// Acting clinician (from the auth provider)
    pub staff_id: String,
    /// Client-generated key; retries with the same key are idempotent
    pub idempotency_key: String,
}

impl VisitCompletion {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_text("assessment", &self.assessment)?;
        require_text("management", &self.management)?;
        require_text("staff_id", &self.staff_id)?;
        require_text("idempotency_key", &self.idempotency_key)?;
        for (index, item) in self.items.iter().enumerate() {
            item.validate().map_err(|e| ValidationError {
                field: format!("items[{}].{}", index, e.field),
                message: e.message,
            })?;
        }
        Ok(())
    }
}
