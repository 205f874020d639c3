//! Hash chain construction and verification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::db::transactions::{list_transactions, TransactionFilter};
use crate::db::Database;

/// Audit errors.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AuditResult<T> = Result<T, AuditError>;

/// Compute SHA-256 hash of data.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of a ledger entry: SHA-256 over the previous hash followed by the
/// entry's canonical JSON.
pub fn chain_hash(prev_hash: &str, canonical_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical_json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of walking the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainReport {
    pub entry_count: i64,
    /// Hash of the newest entry
    pub head_hash: Option<String>,
    /// Sequence number of the first entry that does not verify
    pub first_broken_seq: Option<i64>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_broken_seq.is_none()
    }
}

/// Verifies the ledger hash chain.
pub struct ChainVerifier<'a> {
    db: &'a Database,
}

impl<'a> ChainVerifier<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Recompute every entry hash and check the links between them.
    ///
    /// An entry is broken when its sequence number skips, its `prev_hash` does
    /// not match the previous entry, or its stored hash does not match its
    /// contents.
    pub fn verify(&self) -> AuditResult<ChainReport> {
        let entries = list_transactions(self.db.conn(), &TransactionFilter::default())?;

        let mut expected_prev = String::new();
        let mut first_broken_seq = None;

        for (index, entry) in entries.iter().enumerate() {
            let recomputed = chain_hash(&entry.prev_hash, &entry.to_canonical_json()?);
            let intact = entry.seq == index as i64 + 1
                && entry.prev_hash == expected_prev
                && entry.entry_hash == recomputed;
            if !intact {
                first_broken_seq = Some(entry.seq);
                break;
            }
            expected_prev = entry.entry_hash.clone();
        }

        if let Some(seq) = first_broken_seq {
            tracing::warn!(seq, "ledger hash chain broken");
        }

        Ok(ChainReport {
            entry_count: entries.len() as i64,
            head_hash: entries.last().map(|e| e.entry_hash.clone()),
            first_broken_seq,
        })
    }
}
