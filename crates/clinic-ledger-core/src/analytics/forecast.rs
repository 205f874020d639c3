//! Demand forecasting from the transaction log.
//!
//! Every figure is recomputed from `out` entries on each call. Windows are
//! half-open ranges of civil days, `[from, to)`, converted to instants with
//! the configured calendar.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{AnalyticsResult, MedicineKey};
use crate::clock::{format_timestamp, parse_timestamp, CivilCalendar, Clock};
use crate::config::{ForecastConfig, LedgerConfig};
use crate::db::catalog::list_medicines;
use crate::db::lots::{list_lots, LotFilter};
use crate::db::transactions::{list_transactions, TransactionFilter};
use crate::db::Database;
use crate::models::{Direction, DispenseTransaction, ValidationError};

/// Stock status relative to forecast demand.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    Stable,
    LowStock,
    ReorderSoon,
    Monitor,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Stable => "stable",
            StockStatus::LowStock => "low_stock",
            StockStatus::ReorderSoon => "reorder_soon",
            StockStatus::Monitor => "monitor",
        }
    }
}

/// Narrows demand queries.
#[derive(Debug, Clone, Default)]
pub struct DemandFilter<'a> {
    pub classification: Option<&'a str>,
    pub dosage_form: Option<&'a str>,
    /// Split rows per dosage form instead of per medicine
    pub by_dosage_form: bool,
}

/// Total dispensed for one medicine (or one form of it) over a window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DemandRow {
    pub classification: String,
    pub medicine_name: String,
    /// Set only when grouping by dosage form
    pub dosage_form: Option<String>,
    pub quantity: i64,
}

/// Dispensed quantity for one medicine on one civil day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyDemand {
    pub date: NaiveDate,
    pub classification: String,
    pub medicine_name: String,
    pub quantity: i64,
}

/// One line of the forecast report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastRow {
    pub classification: String,
    pub medicine_name: String,
    /// Non-expired units on hand as of the report date
    pub current_stock: i64,
    pub daily_average: f64,
    pub forecast: i64,
    pub status: StockStatus,
    /// `YYYY-MM` of the month stock is projected to run out in
    pub restock_before: Option<String>,
}

/// Average units per day over a lookback.
pub fn daily_average(total_out: i64, lookback_days: u32) -> f64 {
    if lookback_days == 0 {
        return 0.0;
    }
    total_out as f64 / f64::from(lookback_days)
}

/// Expected units over `days`, rounded to whole units.
pub fn forecast_quantity(daily_average: f64, days: u32) -> i64 {
    (daily_average * f64::from(days)).round() as i64
}

/// Classify stock `s` against forecast `f`. Checks run in order, so a
/// low-stock medicine is `LowStock` even when it covers the forecast.
pub fn classify_status(stock: i64, forecast: i64, config: &ForecastConfig) -> StockStatus {
    if stock > config.stable_above {
        StockStatus::Stable
    } else if stock <= config.low_stock_at_or_below {
        StockStatus::LowStock
    } else if stock <= forecast {
        StockStatus::ReorderSoon
    } else {
        StockStatus::Monitor
    }
}

/// First month in which projected stock reaches zero, as `YYYY-MM`.
///
/// The month containing `as_of` only counts its remaining days, `as_of`
/// included. Returns `None` when there is no demand or stock outlasts the
/// horizon.
pub fn restock_month(
    stock: i64,
    daily_average: f64,
    as_of: NaiveDate,
    horizon_months: u32,
) -> Option<String> {
    if daily_average <= 0.0 {
        return None;
    }
    let mut remaining = stock as f64;
    let mut cursor = as_of;
    for month in 0..horizon_months {
        let days = if month == 0 {
            CivilCalendar::days_in_month(cursor) - cursor.day0()
        } else {
            CivilCalendar::days_in_month(cursor)
        };
        remaining -= daily_average * f64::from(days);
        if remaining <= 0.0 {
            return Some(CivilCalendar::month_label(cursor));
        }
        cursor = CivilCalendar::next_month_start(cursor);
    }
    None
}

/// Observed demand, averages and restock projections.
pub struct ForecastEngine<'a> {
    db: &'a Database,
    clock: &'a dyn Clock,
    calendar: CivilCalendar,
    config: ForecastConfig,
}

impl<'a> ForecastEngine<'a> {
    pub fn new(db: &'a Database, clock: &'a dyn Clock, config: &LedgerConfig) -> Self {
        Self {
            db,
            clock,
            calendar: config.calendar(),
            config: config.forecast.clone(),
        }
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// `out` entries created within civil days `[from, to)`.
    fn out_entries(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        classification: Option<&str>,
        medicine_name: Option<&str>,
        dosage_form: Option<&str>,
    ) -> AnalyticsResult<Vec<DispenseTransaction>> {
        if to < from {
            return Err(ValidationError::new("to", "window end precedes its start").into());
        }
        let start = format_timestamp(self.calendar.start_of_day(from));
        let end = format_timestamp(self.calendar.start_of_day(to));
        Ok(list_transactions(
            self.db.conn(),
            &TransactionFilter {
                direction: Some(Direction::Out),
                from: Some(&start),
                to: Some(&end),
                classification,
                medicine_name,
                dosage_form,
                ..Default::default()
            },
        )?)
    }

    /// Sum of `out` quantities per medicine over civil days `[from, to)`.
    pub fn observed_demand(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        filter: &DemandFilter<'_>,
    ) -> AnalyticsResult<Vec<DemandRow>> {
        let entries = self.out_entries(from, to, filter.classification, None, filter.dosage_form)?;

        let mut rows: BTreeMap<(MedicineKey, Option<String>), DemandRow> = BTreeMap::new();
        for entry in entries {
            let form = filter
                .by_dosage_form
                .then(|| crate::models::lookup_key(&entry.dosage_form));
            rows.entry((MedicineKey::new(&entry.classification, &entry.medicine_name), form))
                .or_insert_with(|| DemandRow {
                    classification: entry.classification.clone(),
                    medicine_name: entry.medicine_name.clone(),
                    dosage_form: filter.by_dosage_form.then(|| entry.dosage_form.clone()),
                    quantity: 0,
                })
                .quantity += entry.quantity;
        }
        Ok(rows.into_values().collect())
    }

    /// Units per day for one medicine over the lookback ending before `as_of`.
    pub fn daily_average(
        &self,
        classification: Option<&str>,
        medicine_name: &str,
        as_of: NaiveDate,
    ) -> AnalyticsResult<f64> {
        let from = as_of - Duration::days(i64::from(self.config.lookback_days));
        let total: i64 = self
            .out_entries(from, as_of, classification, Some(medicine_name), None)?
            .iter()
            .map(|e| e.quantity)
            .sum();
        Ok(daily_average(total, self.config.lookback_days))
    }

    /// Expected demand for one medicine over the next `days`.
    pub fn forecast(
        &self,
        classification: Option<&str>,
        medicine_name: &str,
        as_of: NaiveDate,
        days: u32,
    ) -> AnalyticsResult<i64> {
        let average = self.daily_average(classification, medicine_name, as_of)?;
        Ok(forecast_quantity(average, days))
    }

    /// Forecast rows for every catalog medicine.
    ///
    /// `next_period_days` defaults to the length of the civil month after
    /// `as_of`.
    pub fn report(
        &self,
        as_of: NaiveDate,
        next_period_days: Option<u32>,
    ) -> AnalyticsResult<Vec<ForecastRow>> {
        let days = next_period_days.unwrap_or_else(|| {
            CivilCalendar::days_in_month(CivilCalendar::next_month_start(as_of))
        });

        let mut names: BTreeMap<MedicineKey, (String, String)> = BTreeMap::new();
        for medicine in list_medicines(self.db.conn())? {
            names
                .entry(MedicineKey::new(&medicine.classification, &medicine.name))
                .or_insert((medicine.classification, medicine.name));
        }

        let mut stock: BTreeMap<MedicineKey, i64> = BTreeMap::new();
        let lots = list_lots(
            self.db.conn(),
            &LotFilter {
                not_expired_on: Some(as_of),
                ..Default::default()
            },
        )?;
        for lot in lots {
            let total = stock
                .entry(MedicineKey::new(&lot.classification, &lot.medicine_name))
                .or_default();
            *total = total.saturating_add(lot.quantity);
        }

        let from = as_of - Duration::days(i64::from(self.config.lookback_days));
        let mut demand: BTreeMap<MedicineKey, i64> = BTreeMap::new();
        for entry in self.out_entries(from, as_of, None, None, None)? {
            *demand
                .entry(MedicineKey::new(&entry.classification, &entry.medicine_name))
                .or_default() += entry.quantity;
        }

        let rows = names
            .into_iter()
            .map(|(key, (classification, medicine_name))| {
                let current_stock = stock.get(&key).copied().unwrap_or(0);
                let average =
                    daily_average(demand.get(&key).copied().unwrap_or(0), self.config.lookback_days);
                let forecast = forecast_quantity(average, days);
                ForecastRow {
                    classification,
                    medicine_name,
                    current_stock,
                    daily_average: average,
                    forecast,
                    status: classify_status(current_stock, forecast, &self.config),
                    restock_before: restock_month(
                        current_stock,
                        average,
                        as_of,
                        self.config.restock_horizon_months,
                    ),
                }
            })
            .collect();
        Ok(rows)
    }

    /// Report as of the civil today.
    pub fn report_today(&self) -> AnalyticsResult<Vec<ForecastRow>> {
        self.report(self.calendar.today(self.clock), None)
    }

    /// Dispensed units per civil day per medicine over `[from, to)`.
    pub fn daily_series(&self, from: NaiveDate, to: NaiveDate) -> AnalyticsResult<Vec<DailyDemand>> {
        let mut days: BTreeMap<(NaiveDate, MedicineKey), DailyDemand> = BTreeMap::new();
        for entry in self.out_entries(from, to, None, None, None)? {
            let Some(at) = parse_timestamp(&entry.created_at) else {
                tracing::warn!(seq = entry.seq, created_at = %entry.created_at, "unparseable ledger timestamp");
                continue;
            };
            let date = self.calendar.civil_date(at);
            days.entry((date, MedicineKey::new(&entry.classification, &entry.medicine_name)))
                .or_insert_with(|| DailyDemand {
                    date,
                    classification: entry.classification.clone(),
                    medicine_name: entry.medicine_name.clone(),
                    quantity: 0,
                })
                .quantity += entry.quantity;
        }
        Ok(days.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ledger::DispenseTransactionLog;
    use crate::models::TransactionLinks;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_status_precedence() {
        let config = ForecastConfig::default();
        assert_eq!(classify_status(150, 500, &config), StockStatus::Stable);
        assert_eq!(classify_status(25, 10, &config), StockStatus::LowStock);
        assert_eq!(classify_status(30, 0, &config), StockStatus::LowStock);
        assert_eq!(classify_status(60, 60, &config), StockStatus::ReorderSoon);
        assert_eq!(classify_status(60, 20, &config), StockStatus::Monitor);
        assert_eq!(classify_status(100, 20, &config), StockStatus::Monitor);
    }

    #[test]
    fn test_restock_projection() {
        // Jan: 17 days left (34), Feb: 56, Mar: runs out
        assert_eq!(restock_month(100, 2.0, date(2025, 1, 15), 12), Some("2025-03".into()));
        assert_eq!(restock_month(0, 0.5, date(2025, 1, 31), 12), Some("2025-01".into()));
        assert_eq!(restock_month(100, 0.1, date(2025, 1, 15), 12), None);
        assert_eq!(restock_month(100, 0.0, date(2025, 1, 15), 12), None);
    }

    #[test]
    fn test_demand_scenario() {
        let config = LedgerConfig::default();
        let calendar = config.calendar();
        let clock = FixedClock::at_civil(&calendar, date(2025, 3, 1), 10, 0);
        let db = Database::open_in_memory().unwrap();
        let log = DispenseTransactionLog::new(&db, &clock, &config);

        log.record(Direction::Out, "Antibiotics", "Amoxicillin", "tablet", 5, TransactionLinks::default())
            .unwrap();
        clock.advance(Duration::days(1));
        log.record(Direction::Out, "Antibiotics", "Amoxicillin", "tablet", 7, TransactionLinks::default())
            .unwrap();
        log.record(Direction::In, "Antibiotics", "Amoxicillin", "tablet", 40, TransactionLinks::default())
            .unwrap();

        let engine = ForecastEngine::new(&db, &clock, &config);
        let demand = engine
            .observed_demand(date(2025, 3, 1), date(2025, 3, 3), &DemandFilter::default())
            .unwrap();
        assert_eq!(demand.len(), 1);
        assert_eq!(demand[0].quantity, 12);

        let average = engine.daily_average(None, "Amoxicillin", date(2025, 3, 3)).unwrap();
        assert!((average - 12.0 / 90.0).abs() < 1e-9);
        assert_eq!(engine.forecast(None, "amoxicillin", date(2025, 3, 3), 30).unwrap(), 4);

        // Window excludes the as-of day itself
        let same_day = engine.daily_average(None, "Amoxicillin", date(2025, 3, 2)).unwrap();
        assert!((same_day - 5.0 / 90.0).abs() < 1e-9);

        let report = engine.report(date(2025, 3, 3), None).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].forecast, 4);
        assert_eq!(report[0].status, StockStatus::LowStock);
        assert_eq!(report[0].restock_before.as_deref(), Some("2025-03"));
        assert_eq!(report, engine.report(date(2025, 3, 3), None).unwrap());

        let series = engine.daily_series(date(2025, 3, 1), date(2025, 3, 3)).unwrap();
        let points: Vec<_> = series.iter().map(|d| (d.date, d.quantity)).collect();
        assert_eq!(points, vec![(date(2025, 3, 1), 5), (date(2025, 3, 2), 7)]);
    }

    #[test]
    fn test_demand_by_dosage_form() {
        let config = LedgerConfig::default();
        let clock = FixedClock::at_civil(&config.calendar(), date(2025, 5, 10), 8, 30);
        let db = Database::open_in_memory().unwrap();
        let log = DispenseTransactionLog::new(&db, &clock, &config);
        let links = TransactionLinks::default();

        log.record(Direction::Out, "Analgesic", "Paracetamol", "tablet", 4, links.clone()).unwrap();
        log.record(Direction::Out, "Analgesic", "Paracetamol", "syrup", 1, links.clone()).unwrap();
        log.record(Direction::Out, "Antibiotics", "Amoxicillin", "capsule", 6, links.clone()).unwrap();

        let engine = ForecastEngine::new(&db, &clock, &config);
        let window = (date(2025, 5, 10), date(2025, 5, 11));

        let merged = engine
            .observed_demand(window.0, window.1, &DemandFilter {
                classification: Some("analgesic"),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].quantity, 5);

        let split = engine
            .observed_demand(window.0, window.1, &DemandFilter {
                by_dosage_form: true,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(split.len(), 3);

        assert!(matches!(
            engine.observed_demand(window.1, window.0, &DemandFilter::default()),
            Err(crate::analytics::AnalyticsError::Validation(_))
        ));
    }

    #[test]
    fn test_civil_day_boundary() {
        // 23:30 at +08:00 is 15:30 UTC the same civil day
        let config = LedgerConfig::default();
        let clock = FixedClock::at_civil(&config.calendar(), date(2025, 6, 1), 23, 30);
        let db = Database::open_in_memory().unwrap();
        let log = DispenseTransactionLog::new(&db, &clock, &config);
        log.record(Direction::Out, "Vitamins", "Zinc", "tablet", 3, TransactionLinks::default())
            .unwrap();
        clock.advance(Duration::minutes(45));
        log.record(Direction::Out, "Vitamins", "Zinc", "tablet", 2, TransactionLinks::default())
            .unwrap();

        let engine = ForecastEngine::new(&db, &clock, &config);
        let series = engine.daily_series(date(2025, 6, 1), date(2025, 6, 3)).unwrap();
        let points: Vec<_> = series.iter().map(|d| (d.date, d.quantity)).collect();
        assert_eq!(points, vec![(date(2025, 6, 1), 3), (date(2025, 6, 2), 2)]);
    }
}
