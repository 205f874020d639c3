//! Patient registration and the visit queue state machine.

mod manager;
mod registry;

pub use manager::*;
pub use registry::*;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{DbError, RetryableError};
use crate::ledger::{Dispensed, LedgerError};
use crate::models::{InsufficientStock, ValidationError, VisitRecord, VisitStatus};

/// Visit queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Visit {visit_id} cannot move from {} to {}", from.as_str(), to.as_str())]
    IllegalTransition {
        visit_id: String,
        from: VisitStatus,
        to: VisitStatus,
    },

    #[error("Conflict after {attempts} attempts: {cause}")]
    Conflict { attempts: u32, cause: String },
}

impl QueueError {
    /// The stock shortfall behind this error, if that is what it is.
    pub fn insufficient_stock(&self) -> Option<&InsufficientStock> {
        match self {
            QueueError::Ledger(LedgerError::InsufficientStock(short)) => Some(short),
            _ => None,
        }
    }
}

impl RetryableError for QueueError {
    fn is_conflict(&self) -> bool {
        match self {
            QueueError::Database(e) => e.is_conflict(),
            QueueError::Ledger(e) => e.is_conflict(),
            _ => false,
        }
    }

    fn conflict(attempts: u32, cause: String) -> Self {
        QueueError::Conflict { attempts, cause }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// What a completion did. Stored with the visit so a retried completion
/// returns the same answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionOutcome {
    pub visit: VisitRecord,
    /// One entry per dispensed item, in request order
    pub dispensed: Vec<Dispensed>,
    /// This call replayed an earlier completion with the same idempotency key
    #[serde(default)]
    pub replayed: bool,
}

impl CompletionOutcome {
    /// Whether every item was dispensed in full.
    pub fn fully_dispensed(&self) -> bool {
        self.dispensed.iter().all(|d| d.allocation.is_complete())
    }
}
