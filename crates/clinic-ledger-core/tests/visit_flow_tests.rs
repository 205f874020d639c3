//! Visit lifecycle integration tests: queue, completion with dispensing,
//! ledger entries, alerts and change notification working together.

use chrono::NaiveDate;

use clinic_ledger_core::analytics::{AlertEvaluator, AlertLevel};
use clinic_ledger_core::audit::ChainVerifier;
use clinic_ledger_core::db::EntityType;
use clinic_ledger_core::ledger::{DispenseTransactionLog, LedgerError};
use clinic_ledger_core::logging;
use clinic_ledger_core::models::{
    Direction, DispenseItem, LotIntake, PatientRegistration, TransactionLinks, VisitCompletion,
    VisitStatus, VitalsForm,
};
use clinic_ledger_core::notify::{ChangeCursor, ChangeFeed, ChangeFilter};
use clinic_ledger_core::queue::QueueError;
use clinic_ledger_core::{
    Database, FixedClock, InventoryLedger, LedgerConfig, ShortfallPolicy, VisitQueueManager,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Clinic {
    db: Database,
    clock: FixedClock,
    config: LedgerConfig,
}

impl Clinic {
    fn open() -> Self {
        logging::init_test();
        let config = LedgerConfig::default();
        let clock = FixedClock::at_civil(&config.calendar(), date(2024, 12, 1), 9, 0);
        Self {
            db: Database::open_in_memory().unwrap(),
            clock,
            config,
        }
    }

    fn queue(&self) -> VisitQueueManager<'_> {
        VisitQueueManager::new(&self.db, &self.clock, &self.config)
    }

    fn ledger(&self) -> InventoryLedger<'_> {
        InventoryLedger::new(&self.db, &self.clock, &self.config)
    }

    fn receive(&self, class: &str, name: &str, qty: i64, expires: NaiveDate) -> String {
        self.ledger()
            .add_lot(&LotIntake {
                classification: class.into(),
                medicine_name: name.into(),
                dosage_form: "tablet".into(),
                quantity: qty,
                expiration_date: expires,
                staff_id: Some("pharm-1".into()),
                note: None,
            })
            .unwrap()
            .lot
            .id
    }

    fn lot_quantity(&self, id: &str) -> i64 {
        self.db.get_lot(id).unwrap().unwrap().quantity
    }
}

fn walk_in(first: &str) -> PatientRegistration {
    PatientRegistration {
        first_name: first.into(),
        last_name: "Santos".into(),
        sex: "female".into(),
        ..Default::default()
    }
}

fn vitals() -> VitalsForm {
    VitalsForm {
        height_cm: Some("158".into()),
        weight_kg: Some("52.5".into()),
        blood_pressure: Some("110/70".into()),
        temperature_c: Some("38.1".into()),
    }
}

fn completion(key: &str, items: Vec<DispenseItem>) -> VisitCompletion {
    VisitCompletion {
        assessment: "Acute tonsillitis".into(),
        management: "Amoxicillin 500mg TID x 5 days".into(),
        items,
        staff_id: "dr-reyes".into(),
        idempotency_key: key.into(),
    }
}

#[test]
fn test_completion_dispenses_fefo_and_logs() {
    let clinic = Clinic::open();
    let lot_a = clinic.receive("Antibiotics", "Amoxicillin", 10, date(2025, 1, 1));
    let lot_b = clinic.receive("Antibiotics", "Amoxicillin", 20, date(2025, 3, 1));

    let (patient, visit) = clinic
        .queue()
        .register_and_queue(&walk_in("Maria"), &vitals(), Some("sore throat"), Some("nurse-1"))
        .unwrap();
    assert!(clinic.db.get_patient(&patient.id).unwrap().unwrap().is_queued);

    let outcome = clinic
        .queue()
        .complete(
            &visit.id,
            &completion("visit-1", vec![DispenseItem::new("Antibiotics", "Amoxicillin", 15)]),
            None,
        )
        .unwrap();

    assert_eq!(outcome.visit.status, VisitStatus::Completed);
    assert!(outcome.fully_dispensed());
    assert_eq!(clinic.lot_quantity(&lot_a), 0);
    assert_eq!(clinic.lot_quantity(&lot_b), 15);
    assert!(!clinic.db.get_patient(&patient.id).unwrap().unwrap().is_queued);
    assert!(clinic.queue().list_queued().unwrap().is_empty());

    let log = DispenseTransactionLog::new(&clinic.db, &clinic.clock, &clinic.config);
    let entries = log.for_visit(&visit.id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].quantity, 15);
    assert_eq!(entries[0].patient_id.as_deref(), Some(patient.id.as_str()));
    assert_eq!(entries[0].staff_id.as_deref(), Some("dr-reyes"));

    let report = ChainVerifier::new(&clinic.db).verify().unwrap();
    assert!(report.is_intact());
    assert_eq!(report.entry_count, 3);

    let alerts = AlertEvaluator::new(&clinic.db, &clinic.clock, &clinic.config)
        .evaluate()
        .unwrap();
    assert_eq!(alerts.alerts.len(), 1);
    assert_eq!(alerts.alerts[0].level, AlertLevel::Low);
    assert_eq!(alerts.alerts[0].quantity, 15);
}

#[test]
fn test_retry_with_same_key_replays() {
    let clinic = Clinic::open();
    clinic.receive("Analgesic", "Paracetamol", 30, date(2025, 6, 30));
    let (_, visit) = clinic
        .queue()
        .register_and_queue(&walk_in("Ana"), &vitals(), None, None)
        .unwrap();
    let request = completion("retry-key", vec![DispenseItem::new("Analgesic", "Paracetamol", 12)]);

    let first = clinic.queue().complete(&visit.id, &request, None).unwrap();
    let second = clinic.queue().complete(&visit.id, &request, None).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.dispensed, second.dispensed);
    assert_eq!(clinic.ledger().on_hand(None, "Paracetamol").unwrap(), 18);

    let other_key = completion("other-key", request.items.clone());
    assert!(matches!(
        clinic.queue().complete(&visit.id, &other_key, None),
        Err(QueueError::IllegalTransition { .. })
    ));
}

#[test]
fn test_shortfall_rolls_back_whole_completion() {
    let clinic = Clinic::open();
    let lot = clinic.receive("Analgesic", "Paracetamol", 5, date(2025, 6, 30));
    clinic.receive("Antibiotics", "Amoxicillin", 40, date(2025, 6, 30));
    let (_, visit) = clinic
        .queue()
        .register_and_queue(&walk_in("Lea"), &vitals(), None, None)
        .unwrap();
    let seq_before = clinic.db.latest_change_seq().unwrap();
    let entries_before = clinic.db.transaction_count().unwrap();

    let request = completion(
        "k",
        vec![
            DispenseItem::new("Antibiotics", "Amoxicillin", 10),
            DispenseItem::new("Analgesic", "Paracetamol", 10),
        ],
    );
    let err = clinic
        .queue()
        .complete(&visit.id, &request, Some(ShortfallPolicy::Reject))
        .unwrap_err();
    let short = err.insufficient_stock().unwrap();
    assert_eq!((short.requested, short.available), (10, 5));

    // Nothing from the first item survived
    assert_eq!(clinic.ledger().on_hand(None, "Amoxicillin").unwrap(), 40);
    assert_eq!(clinic.lot_quantity(&lot), 5);
    assert_eq!(clinic.queue().get_visit(&visit.id).unwrap().status, VisitStatus::Queued);
    assert_eq!(clinic.db.latest_change_seq().unwrap(), seq_before);
    assert_eq!(clinic.db.transaction_count().unwrap(), entries_before);

    let partial = clinic
        .queue()
        .complete(&visit.id, &request, Some(ShortfallPolicy::PartialFill))
        .unwrap();
    assert!(!partial.fully_dispensed());
    assert_eq!(partial.dispensed[1].allocation.consumed, 5);
    assert_eq!(clinic.lot_quantity(&lot), 0);
}

#[test]
fn test_cancelled_visit_cannot_complete() {
    let clinic = Clinic::open();
    clinic.receive("Analgesic", "Paracetamol", 30, date(2025, 6, 30));
    let (_, visit) = clinic
        .queue()
        .register_and_queue(&walk_in("Joy"), &vitals(), None, None)
        .unwrap();

    let cancelled = clinic
        .queue()
        .cancel(&visit.id, "nurse-1", Some("left before consult"))
        .unwrap();
    assert_eq!(cancelled.status, VisitStatus::Cancelled);

    let err = clinic
        .queue()
        .complete(
            &visit.id,
            &completion("k", vec![DispenseItem::new("Analgesic", "Paracetamol", 2)]),
            None,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::IllegalTransition {
            from: VisitStatus::Cancelled,
            to: VisitStatus::Completed,
            ..
        }
    ));
    assert_eq!(clinic.ledger().on_hand(None, "Paracetamol").unwrap(), 30);

    // Terminal states stay terminal
    assert!(matches!(
        clinic.queue().cancel(&visit.id, "nurse-1", None),
        Err(QueueError::IllegalTransition { .. })
    ));
}

#[test]
fn test_push_and_poll_apply_once() {
    let clinic = Clinic::open();
    let feed = ChangeFeed::from_head(&clinic.db).unwrap();
    let visits = feed.subscribe(ChangeFilter::entity_type(EntityType::Visit));
    let start = clinic.db.latest_change_seq().unwrap();

    let (_, visit) = clinic
        .queue()
        .register_and_queue(&walk_in("Rosa"), &vitals(), None, None)
        .unwrap();
    clinic
        .queue()
        .complete(&visit.id, &completion("k", Vec::new()), None)
        .unwrap();
    feed.publish(&clinic.db).unwrap();

    let pushed: Vec<_> = visits.try_iter().collect();
    let changes: Vec<_> = pushed.iter().map(|e| e.change.as_str()).collect();
    assert_eq!(changes, vec!["queued", "completed"]);

    // A dashboard that also polls sees every visit event only once
    let polled = clinic.db.changes_since(start, 100).unwrap();
    let mut cursor = ChangeCursor::resume_at(start);
    let applied = cursor
        .fresh(pushed.iter().chain(polled.iter().filter(|e| e.entity_type == EntityType::Visit)))
        .len();
    assert_eq!(applied, 2);
    assert_eq!(cursor.position(), pushed[1].seq);
}

#[test]
fn test_manual_entry_links_must_agree() {
    let clinic = Clinic::open();
    let (maria, visit) = clinic
        .queue()
        .register_and_queue(&walk_in("Maria"), &vitals(), None, None)
        .unwrap();
    let (ana, _) = clinic
        .queue()
        .register_and_queue(&walk_in("Ana"), &vitals(), None, None)
        .unwrap();
    let log = DispenseTransactionLog::new(&clinic.db, &clinic.clock, &clinic.config);
    let links = |patient_id: &str| TransactionLinks {
        visit_record_id: Some(visit.id.clone()),
        patient_id: Some(patient_id.to_string()),
        staff_id: Some("nurse-1".into()),
        note: None,
    };

    let err = log
        .record(Direction::Out, "Analgesic", "Paracetamol", "tablet", 2, links(&ana.id))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(ref v) if v.field == "patient_id"));

    let entry = log
        .record(Direction::Out, "Analgesic", "Paracetamol", "tablet", 2, links(&maria.id))
        .unwrap();
    assert_eq!(log.for_visit(&visit.id).unwrap(), vec![entry]);
}
