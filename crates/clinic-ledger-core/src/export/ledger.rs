//! Ledger export for auditors and spreadsheets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{hash_data, AuditResult, ChainVerifier};
use crate::clock::{format_timestamp, Clock};
use crate::db::transactions::{list_transactions, TransactionFilter};
use crate::db::Database;
use crate::models::DispenseTransaction;

const CSV_HEADER: &str = "seq,id,created_at,direction,classification,medicine_name,dosage_form,quantity,visit_record_id,patient_id,staff_id,note,prev_hash,entry_hash\n";

/// Export metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerExportMetadata {
    pub exported_at: String,
    /// Inclusive window start, if any
    pub window_from: Option<String>,
    /// Exclusive window end, if any
    pub window_to: Option<String>,
    pub entry_count: usize,
    /// Newest entry in the whole ledger, not just the window
    pub chain_head_seq: Option<i64>,
    pub chain_head_hash: Option<String>,
    pub chain_intact: bool,
    /// SHA-256 of the CSV rendering of `entries`
    pub csv_sha256: String,
}

/// A window of ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerExport {
    pub metadata: LedgerExportMetadata,
    pub entries: Vec<DispenseTransaction>,
}

impl LedgerExport {
    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV format.
    pub fn to_csv(&self) -> String {
        entries_to_csv(&self.entries)
    }
}

fn entries_to_csv(entries: &[DispenseTransaction]) -> String {
    let mut csv = String::from(CSV_HEADER);

    for entry in entries {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            entry.seq,
            escape_csv(&entry.id),
            escape_csv(&entry.created_at),
            entry.direction.as_str(),
            escape_csv(&entry.classification),
            escape_csv(&entry.medicine_name),
            escape_csv(&entry.dosage_form),
            entry.quantity,
            escape_csv(entry.visit_record_id.as_deref().unwrap_or("")),
            escape_csv(entry.patient_id.as_deref().unwrap_or("")),
            escape_csv(entry.staff_id.as_deref().unwrap_or("")),
            escape_csv(entry.note.as_deref().unwrap_or("")),
            entry.prev_hash,
            entry.entry_hash,
        ));
    }

    csv
}

/// Ledger exporter.
pub struct LedgerExporter<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
}

impl<'a> LedgerExporter<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock) -> Self {
        Self { db, clock }
    }

    fn build(
        &self,
        entries: Vec<DispenseTransaction>,
        window_from: Option<String>,
        window_to: Option<String>,
    ) -> AuditResult<LedgerExport> {
        let report = ChainVerifier::new(self.db).verify()?;
        let metadata = LedgerExportMetadata {
            exported_at: format_timestamp(self.clock.now()),
            window_from,
            window_to,
            entry_count: entries.len(),
            chain_head_seq: (report.entry_count > 0).then_some(report.entry_count),
            chain_head_hash: report.head_hash.clone(),
            chain_intact: report.is_intact(),
            csv_sha256: hash_data(entries_to_csv(&entries).as_bytes()),
        };
        Ok(LedgerExport { metadata, entries })
    }

    /// Every entry.
    pub fn export_all(&self) -> AuditResult<LedgerExport> {
        self.export_window(None, None)
    }

    /// Entries with `from <= created_at < to`; an absent bound is open.
    pub fn export_window(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AuditResult<LedgerExport> {
        let from = from.map(format_timestamp);
        let to = to.map(format_timestamp);
        let entries = list_transactions(
            self.db.conn(),
            &TransactionFilter {
                from: from.as_deref(),
                to: to.as_deref(),
                ..Default::default()
            },
        )?;
        self.build(entries, from, to)
    }
}

/// Escape a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
