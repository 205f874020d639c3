//! Medicine catalog models.

use serde::{Deserialize, Serialize};

/// A catalog entry: one (classification, name, dosage form) combination.
///
/// Lots and ledger entries reference the `id`, so differently typed spellings
/// of the same medicine resolve to one row instead of becoming phantom
/// medicines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Medicine {
    /// Stable identifier
    pub id: String,
    /// Therapeutic classification (e.g., "Antibiotics")
    pub classification: String,
    /// Medicine name as first registered (canonical spelling)
    pub name: String,
    /// Dosage form (e.g., "500mg capsule", "tablet", "syrup")
    pub dosage_form: String,
    /// Creation timestamp
    pub created_at: String,
}

impl Medicine {
    /// Create a new catalog entry with normalized labels.
    pub fn new(classification: &str, name: &str, dosage_form: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            classification: normalize_label(classification),
            name: normalize_label(name),
            dosage_form: normalize_label(dosage_form),
            created_at: crate::clock::format_timestamp(chrono::Utc::now()),
        }
    }

    /// Case-insensitive lookup keys for (classification, name, dosage form).
    pub fn lookup_keys(&self) -> (String, String, String) {
        (
            lookup_key(&self.classification),
            lookup_key(&self.name),
            lookup_key(&self.dosage_form),
        )
    }
}

/// A catalog entry close to a queried name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarMedicine {
    pub medicine: Medicine,
    /// Jaro-Winkler similarity (0.0 - 1.0)
    pub similarity: f64,
}

/// Trim and collapse internal whitespace.
pub fn normalize_label(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching key: normalized and lowercased.
pub fn lookup_key(s: &str) -> String {
    normalize_label(s).to_lowercase()
}
