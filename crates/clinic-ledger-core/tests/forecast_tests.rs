//! Forecast report scenarios over a seeded ledger.

use chrono::{Duration, NaiveDate};

use clinic_ledger_core::analytics::{AnalyticsError, ForecastEngine, ForecastRow, StockStatus};
use clinic_ledger_core::models::{Direction, LotIntake, TransactionLinks};
use clinic_ledger_core::{
    Database, DispenseTransactionLog, FixedClock, InventoryLedger, LedgerConfig,
};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()
}

struct Pharmacy {
    db: Database,
    clock: FixedClock,
    config: LedgerConfig,
}

impl Pharmacy {
    fn new(config: LedgerConfig) -> Self {
        let clock = FixedClock::at_civil(&config.calendar(), as_of() - Duration::days(60), 10, 0);
        Self {
            db: Database::open_in_memory().unwrap(),
            clock,
            config,
        }
    }

    fn dispensed_days_ago(&self, days: i64, class: &str, name: &str, qty: i64) {
        self.clock
            .set(self.config.calendar().start_of_day(as_of() - Duration::days(days)) + Duration::hours(10));
        DispenseTransactionLog::new(&self.db, &self.clock, &self.config)
            .record(Direction::Out, class, name, "tablet", qty, TransactionLinks::staff("nurse-1"))
            .unwrap();
    }

    fn stock(&self, class: &str, name: &str, qty: i64) {
        self.clock
            .set(self.config.calendar().start_of_day(as_of()) + Duration::hours(8));
        InventoryLedger::new(&self.db, &self.clock, &self.config)
            .add_lot(&LotIntake {
                classification: class.into(),
                medicine_name: name.into(),
                dosage_form: "tablet".into(),
                quantity: qty,
                expiration_date: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
                staff_id: None,
                note: None,
            })
            .unwrap();
    }

    fn engine(&self) -> ForecastEngine<'_> {
        ForecastEngine::new(&self.db, &self.clock, &self.config)
    }
}

fn seeded(config: LedgerConfig) -> Pharmacy {
    let pharmacy = Pharmacy::new(config);
    for days in [60, 40, 20] {
        pharmacy.dispensed_days_ago(days, "Antibiotics", "Amoxicillin", 10);
    }
    pharmacy.dispensed_days_ago(10, "Analgesic", "Paracetamol", 180);

    pharmacy.stock("Antibiotics", "Amoxicillin", 25);
    pharmacy.stock("Analgesic", "Paracetamol", 60);
    pharmacy.stock("Analgesic", "Ibuprofen", 150);
    pharmacy.stock("Antihistamine", "Cetirizine", 80);
    pharmacy
}

fn row<'r>(rows: &'r [ForecastRow], name: &str) -> &'r ForecastRow {
    rows.iter().find(|r| r.medicine_name == name).unwrap()
}

#[test]
fn test_report_classifies_each_medicine() {
    let pharmacy = seeded(LedgerConfig::default());
    let report = pharmacy.engine().report(as_of(), Some(30)).unwrap();
    assert_eq!(report.len(), 4);

    // Stock 25 covers a forecast of 10, but low stock wins
    let amoxicillin = row(&report, "Amoxicillin");
    assert_eq!(amoxicillin.current_stock, 25);
    assert_eq!(amoxicillin.forecast, 10);
    assert_eq!(amoxicillin.status, StockStatus::LowStock);
    // 16 days left in June, then July, then August runs dry
    assert_eq!(amoxicillin.restock_before.as_deref(), Some("2025-08"));

    let paracetamol = row(&report, "Paracetamol");
    assert!((paracetamol.daily_average - 2.0).abs() < 1e-9);
    assert_eq!(paracetamol.forecast, 60);
    assert_eq!(paracetamol.status, StockStatus::ReorderSoon);
    assert_eq!(paracetamol.restock_before.as_deref(), Some("2025-07"));

    let cetirizine = row(&report, "Cetirizine");
    assert_eq!(cetirizine.forecast, 0);
    assert_eq!(cetirizine.status, StockStatus::Monitor);
    assert_eq!(cetirizine.restock_before, None);

    assert_eq!(row(&report, "Ibuprofen").status, StockStatus::Stable);
}

#[test]
fn test_default_period_is_next_month() {
    let pharmacy = seeded(LedgerConfig::default());
    let engine = pharmacy.engine();

    // July has 31 days
    let report = engine.report(as_of(), None).unwrap();
    assert_eq!(row(&report, "Paracetamol").forecast, 62);
    assert_eq!(row(&report, "Amoxicillin").forecast, 10);

    assert_eq!(engine.report_today().unwrap(), report);
}

#[test]
fn test_lookback_is_configurable() {
    let mut config = LedgerConfig::default();
    config.forecast.lookback_days = 30;
    let pharmacy = seeded(config);
    let report = pharmacy.engine().report(as_of(), Some(30)).unwrap();

    // Only the dispense 20 days back falls inside 30 days
    let amoxicillin = row(&report, "Amoxicillin");
    assert!((amoxicillin.daily_average - 10.0 / 30.0).abs() < 1e-9);
    assert_eq!(amoxicillin.forecast, 10);
    assert_eq!(row(&report, "Paracetamol").forecast, 180);
}

#[test]
fn test_closed_window_is_repeatable() {
    let pharmacy = seeded(LedgerConfig::default());
    let before = pharmacy.engine().report(as_of(), Some(30)).unwrap();

    // Activity on the as-of day is outside the lookback
    pharmacy.dispensed_days_ago(0, "Antibiotics", "Amoxicillin", 7);
    let after = pharmacy.engine().report(as_of(), Some(30)).unwrap();
    assert_eq!(before, after);

    let next_day = pharmacy
        .engine()
        .report(as_of() + Duration::days(1), Some(30))
        .unwrap();
    assert_eq!(row(&next_day, "Amoxicillin").forecast, 12);
}

#[test]
fn test_reversed_window_rejected() {
    let pharmacy = seeded(LedgerConfig::default());
    let err = pharmacy
        .engine()
        .daily_series(as_of(), as_of() - Duration::days(1))
        .unwrap_err();
    assert!(matches!(err, AnalyticsError::Validation(_)));
}
