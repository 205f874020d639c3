//! Dispense ledger models.

use serde::{Deserialize, Serialize};

/// Stock movement direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in" => Some(Direction::In),
            "out" => Some(Direction::Out),
            _ => None,
        }
    }
}

/// Optional context attached to a ledger entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransactionLinks {
    pub visit_record_id: Option<String>,
    pub patient_id: Option<String>,
    pub staff_id: Option<String>,
    pub note: Option<String>,
}

impl TransactionLinks {
    pub fn staff(staff_id: &str) -> Self {
        Self {
            staff_id: Some(staff_id.to_string()),
            ..Default::default()
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// An entry about to be appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTransaction {
    pub direction: Direction,
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub quantity: i64,
    pub links: TransactionLinks,
}

/// An append-only ledger entry. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispenseTransaction {
    /// Append order (1-based, gapless)
    pub seq: i64,
    /// Unique entry ID
    pub id: String,
    pub direction: Direction,
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    /// Units moved (> 0)
    pub quantity: i64,
    pub visit_record_id: Option<String>,
    pub patient_id: Option<String>,
    pub staff_id: Option<String>,
    pub note: Option<String>,
    pub created_at: String,
    /// Hash of the previous entry (empty for the first)
    pub prev_hash: String,
    /// SHA-256 over `prev_hash` and the canonical payload
    pub entry_hash: String,
}

/// Hashed portion of an entry, in fixed field order.
#[derive(Serialize)]
struct ChainPayload<'a> {
    seq: i64,
    id: &'a str,
    direction: Direction,
    medicine_id: &'a str,
    classification: &'a str,
    medicine_name: &'a str,
    dosage_form: &'a str,
    quantity: i64,
    visit_record_id: Option<&'a str>,
    patient_id: Option<&'a str>,
    staff_id: Option<&'a str>,
    note: Option<&'a str>,
    created_at: &'a str,
}

impl DispenseTransaction {
    /// Serialize the hashed fields to canonical JSON.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&ChainPayload {
            seq: self.seq,
            id: &self.id,
            direction: self.direction,
            medicine_id: &self.medicine_id,
            classification: &self.classification,
            medicine_name: &self.medicine_name,
            dosage_form: &self.dosage_form,
            quantity: self.quantity,
            visit_record_id: self.visit_record_id.as_deref(),
            patient_id: self.patient_id.as_deref(),
            staff_id: self.staff_id.as_deref(),
            note: self.note.as_deref(),
            created_at: &self.created_at,
        })
    }

    /// Signed quantity: positive for intake, negative for dispensing.
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            Direction::In => self.quantity,
            Direction::Out => -self.quantity,
        }
    }
}
