//! Stock alert panel.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::AnalyticsResult;
use crate::clock::{CivilCalendar, Clock};
use crate::config::{AlertConfig, LedgerConfig};
use crate::db::catalog::list_medicines;
use crate::db::lots::{list_lots, LotFilter};
use crate::db::Database;
use crate::models::{lookup_key, InventoryLot};

/// Alert severity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Out,
    Low,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Out => "OUT",
            AlertLevel::Low => "LOW",
        }
    }
}

/// One alerted medicine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockAlert {
    pub medicine_name: String,
    /// Non-expired units across every lot, form and classification
    pub quantity: i64,
    pub level: AlertLevel,
}

/// Alert panel contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertReport {
    /// OUT alphabetically, then LOW by ascending quantity
    pub alerts: Vec<StockAlert>,
    /// First `preview_limit` alerts
    pub preview: Vec<StockAlert>,
}

impl AlertReport {
    /// Alerts hidden behind "show all".
    pub fn hidden_count(&self) -> usize {
        self.alerts.len() - self.preview.len()
    }
}

/// Classify per-name totals and order them for display.
pub fn classify_stock(totals: &[(String, i64)], low_at_or_below: i64) -> Vec<StockAlert> {
    let mut out: Vec<StockAlert> = Vec::new();
    let mut low: Vec<StockAlert> = Vec::new();

    for (name, quantity) in totals {
        let alert = |level| StockAlert {
            medicine_name: name.clone(),
            quantity: *quantity,
            level,
        };
        if *quantity <= 0 {
            out.push(alert(AlertLevel::Out));
        } else if *quantity <= low_at_or_below {
            low.push(alert(AlertLevel::Low));
        }
    }

    out.sort_by_key(|a| a.medicine_name.to_lowercase());
    low.sort_by(|a, b| {
        a.quantity
            .cmp(&b.quantity)
            .then_with(|| a.medicine_name.to_lowercase().cmp(&b.medicine_name.to_lowercase()))
    });
    out.extend(low);
    out
}

/// Classifies current stock into OUT / LOW / not alerted.
pub struct AlertEvaluator<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    calendar: CivilCalendar,
    config: AlertConfig,
}

impl<'a> AlertEvaluator<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &LedgerConfig) -> Self {
        Self {
            db,
            clock,
            calendar: config.calendar(),
            config: config.alerts.clone(),
        }
    }

    /// Non-expired units per medicine name. Every catalog name is present,
    /// so a medicine whose lots all expired or ran out reports zero.
    pub fn totals_by_name(&self) -> AnalyticsResult<Vec<(String, i64)>> {
        let today = self.calendar.today(self.clock);
        let mut totals: BTreeMap<String, (String, i64)> = BTreeMap::new();

        for medicine in list_medicines(self.db.conn())? {
            totals
                .entry(lookup_key(&medicine.name))
                .or_insert_with(|| (medicine.name.clone(), 0));
        }
        let lots = list_lots(
            self.db.conn(),
            &LotFilter {
                not_expired_on: Some(today),
                ..Default::default()
            },
        )?;
        for lot in lots {
            let total = &mut totals
                .entry(lookup_key(&lot.medicine_name))
                .or_insert_with(|| (lot.medicine_name.clone(), 0))
                .1;
            *total = total.saturating_add(lot.quantity);
        }

        Ok(totals.into_values().collect())
    }

    /// Current alerts with the capped preview.
    pub fn evaluate(&self) -> AnalyticsResult<AlertReport> {
        let alerts = classify_stock(&self.totals_by_name()?, self.config.low_stock_at_or_below);
        let preview = alerts.iter().take(self.config.preview_limit).cloned().collect();
        Ok(AlertReport { alerts, preview })
    }

    /// Stocked, non-expired lots expiring within the configured window,
    /// soonest first.
    pub fn expiring_soon(&self) -> AnalyticsResult<Vec<InventoryLot>> {
        let today = self.calendar.today(self.clock);
        let horizon: NaiveDate = today + Duration::days(i64::from(self.config.expiring_within_days));
        Ok(list_lots(
            self.db.conn(),
            &LotFilter {
                not_expired_on: Some(today),
                in_stock_only: true,
                ..Default::default()
            },
        )?
        .into_iter()
        .filter(|lot| lot.expiration_date <= horizon)
        .collect())
    }
}
