//! Field-level validation errors.

use serde::{Deserialize, Serialize};

/// Input rejected before any state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Form field the error belongs to
    pub field: String,
    /// Human-readable reason
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Require a non-blank text field; returns the trimmed value.
pub fn require_text(field: &str, value: &str) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, "is required"));
    }
    Ok(trimmed.to_string())
}

/// Largest quantity a single lot, dispense or ledger entry may carry.
pub const MAX_QUANTITY: i64 = 1_000_000;

/// Require a quantity in `1..=MAX_QUANTITY`.
pub fn require_positive_quantity(field: &str, quantity: i64) -> Result<i64, ValidationError> {
    if quantity <= 0 {
        return Err(ValidationError::new(
            field,
            format!("must be greater than zero (got {})", quantity),
        ));
    }
    if quantity > MAX_QUANTITY {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} (got {})", MAX_QUANTITY, quantity),
        ));
    }
    Ok(quantity)
}

/// Sum stock quantities, saturating instead of wrapping.
pub fn total_quantity(quantities: impl IntoIterator<Item = i64>) -> i64 {
    quantities
        .into_iter()
        .fold(0i64, |total, quantity| total.saturating_add(quantity))
}

/// Parse a quantity typed into a form.
pub fn parse_quantity(field: &str, raw: &str) -> Result<i64, ValidationError> {
    let quantity: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::new(field, format!("'{}' is not a whole number", raw.trim())))?;
    require_positive_quantity(field, quantity)
}
