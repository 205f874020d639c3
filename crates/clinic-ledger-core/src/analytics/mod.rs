//! Stock alerts and demand forecasting.
//!
//! Everything here is read-only aggregation over current lots and the
//! transaction log; nothing is cached between calls.

mod alerts;
mod forecast;

pub use alerts::*;
pub use forecast::*;

use thiserror::Error;

use crate::db::DbError;
use crate::models::{lookup_key, ValidationError};

/// Analytics errors.
#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Grouping key for "the same medicine" across lots, forms and spellings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct MedicineKey {
    pub classification: String,
    pub name: String,
}

impl MedicineKey {
    pub fn new(classification: &str, name: &str) -> Self {
        Self {
            classification: lookup_key(classification),
            name: lookup_key(name),
        }
    }
}
