//! Inventory lot models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One stock intake batch: a single medicine, dosage form and expiry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryLot {
    /// Unique lot ID
    pub id: String,
    /// Catalog entry this lot belongs to
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    /// Units on the shelf (never negative)
    pub quantity: i64,
    pub expiration_date: NaiveDate,
    /// Optimistic-lock version, bumped on every quantity change
    pub version: i64,
    /// Intake timestamp
    pub received_at: String,
}

impl InventoryLot {
    /// Expired lots are invisible to allocation and on-hand totals.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiration_date < today
    }

    /// Short code printed on shelf labels, e.g. `AMO-20250301-1f3a`.
    pub fn display_code(&self) -> String {
        let prefix: String = self
            .medicine_name
            .chars()
            .filter(|c| c.is_alphanumeric())
            .take(3)
            .collect::<String>()
            .to_uppercase();
        let suffix: String = self.id.chars().filter(|c| *c != '-').take(4).collect();
        format!(
            "{}-{}-{}",
            prefix,
            self.expiration_date.format("%Y%m%d"),
            suffix
        )
    }
}

/// Stock intake input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotIntake {
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub quantity: i64,
    pub expiration_date: NaiveDate,
    /// Staff receiving the stock
    pub staff_id: Option<String>,
    pub note: Option<String>,
}

/// Aggregate of non-expired lots for one (classification, name, dosage form).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockLine {
    pub medicine_id: String,
    pub classification: String,
    pub medicine_name: String,
    pub dosage_form: String,
    pub total_quantity: i64,
    pub lot_count: usize,
    pub nearest_expiry: Option<NaiveDate>,
}

/// Units taken from one lot during a decrement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotConsumption {
    pub lot_id: String,
    pub medicine_id: String,
    pub dosage_form: String,
    pub expiration_date: NaiveDate,
    /// Units taken from this lot
    pub taken: i64,
    /// Units left in the lot afterwards
    pub remaining: i64,
}

/// Requested quantity could not be covered by non-expired stock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("insufficient stock for {medicine}: requested {requested}, available {available}")]
pub struct InsufficientStock {
    pub medicine: String,
    pub requested: i64,
    pub available: i64,
}

/// Outcome of a FEFO decrement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub classification: String,
    pub medicine_name: String,
    pub requested: i64,
    /// Units actually taken (sum of `consumptions[].taken`)
    pub consumed: i64,
    /// Per-lot breakdown, soonest-expiring first
    pub consumptions: Vec<LotConsumption>,
    /// Present when the request was only partially filled
    pub shortfall: Option<InsufficientStock>,
}

impl Allocation {
    pub fn is_complete(&self) -> bool {
        self.shortfall.is_none()
    }

    /// Consumed units grouped per (medicine id, dosage form), in first-touched order.
    pub fn totals_by_form(&self) -> Vec<(String, String, i64)> {
        let mut totals: Vec<(String, String, i64)> = Vec::new();
        for c in &self.consumptions {
            match totals
                .iter_mut()
                .find(|(id, _, _)| *id == c.medicine_id)
            {
                Some(entry) => entry.2 += c.taken,
                None => totals.push((c.medicine_id.clone(), c.dosage_form.clone(), c.taken)),
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot(name: &str, expiry: (i32, u32, u32)) -> InventoryLot {
        InventoryLot {
            id: "1f3a9c2e-0000-4000-8000-000000000000".into(),
            medicine_id: "med-1".into(),
            classification: "Antibiotics".into(),
            medicine_name: name.into(),
            dosage_form: "tablet".into(),
            quantity: 10,
            expiration_date: NaiveDate::from_ymd_opt(expiry.0, expiry.1, expiry.2).unwrap(),
            version: 0,
            received_at: "2024-12-01T00:00:00.000000Z".into(),
        }
    }

    #[test]
    fn test_display_code() {
        assert_eq!(lot("Amoxicillin", (2025, 3, 1)).display_code(), "AMO-20250301-1f3a");
        assert_eq!(lot("B-complex", (2026, 1, 9)).display_code(), "BCO-20260109-1f3a");
    }

    #[test]
    fn test_expiry_is_inclusive_of_today() {
        let l = lot("Amoxicillin", (2025, 3, 1));
        assert!(!l.is_expired(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()));
        assert!(l.is_expired(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()));
    }

    #[test]
    fn test_totals_by_form() {
        let mk = |med: &str, form: &str, taken| LotConsumption {
            lot_id: "l".into(),
            medicine_id: med.into(),
            dosage_form: form.into(),
            expiration_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            taken,
            remaining: 0,
        };
        let alloc = Allocation {
            classification: "Analgesic".into(),
            medicine_name: "Paracetamol".into(),
            requested: 9,
            consumed: 9,
            consumptions: vec![mk("m-tab", "tablet", 4), mk("m-syr", "syrup", 2), mk("m-tab", "tablet", 3)],
            shortfall: None,
        };
        assert_eq!(
            alloc.totals_by_form(),
            vec![("m-tab".into(), "tablet".into(), 7), ("m-syr".into(), "syrup".into(), 2)]
        );
    }
}
