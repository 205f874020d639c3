//! SQLite schema definition.

/// Complete database schema for the clinic ledger.
pub const SCHEMA: &str = r#"
-- Enable foreign keys
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Medicine Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS medicines (
    id TEXT PRIMARY KEY,
    classification TEXT NOT NULL,
    name TEXT NOT NULL,
    dosage_form TEXT NOT NULL,
    classification_key TEXT NOT NULL,            -- lowercased, whitespace-collapsed
    name_key TEXT NOT NULL,
    dosage_form_key TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (classification_key, name_key, dosage_form_key)
);

CREATE INDEX IF NOT EXISTS idx_medicines_name ON medicines(name_key);

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    first_name TEXT NOT NULL,
    middle_name TEXT,
    last_name TEXT NOT NULL,
    suffix TEXT,
    sex TEXT NOT NULL CHECK (sex IN ('male', 'female')),
    birthdate TEXT,
    family_id TEXT,
    contact_number TEXT,
    address TEXT,
    emergency_contact_name TEXT,
    emergency_contact_number TEXT,
    is_queued INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_patients_last_name ON patients(last_name);
CREATE INDEX IF NOT EXISTS idx_patients_family ON patients(family_id);

-- ============================================================================
-- Visit Records
-- ============================================================================

CREATE TABLE IF NOT EXISTS visit_records (
    id TEXT PRIMARY KEY,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    -- NULL only on legacy rows that predate the status column
    status TEXT CHECK (status IS NULL OR status IN ('queued', 'completed', 'cancelled')),
    is_queued INTEGER NOT NULL DEFAULT 0,        -- legacy boolean queue flag
    height_cm REAL,
    weight_kg REAL,
    blood_pressure TEXT,
    temperature_c REAL,
    chief_complaint TEXT,
    doctor_assessment TEXT,
    doctor_management TEXT,
    created_by TEXT,
    completed_by TEXT,
    cancelled_by TEXT,
    cancel_reason TEXT,
    created_at TEXT NOT NULL,
    queued_at TEXT,
    completed_at TEXT,
    cancelled_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_visits_patient ON visit_records(patient_id);
CREATE INDEX IF NOT EXISTS idx_visits_status ON visit_records(status);

-- One row per completed visit; the key makes completion retries idempotent
CREATE TABLE IF NOT EXISTS visit_completions (
    visit_id TEXT PRIMARY KEY REFERENCES visit_records(id),
    idempotency_key TEXT NOT NULL,
    outcome TEXT NOT NULL,                       -- JSON CompletionOutcome
    created_at TEXT NOT NULL
);

-- ============================================================================
-- Inventory Lots
-- ============================================================================

CREATE TABLE IF NOT EXISTS inventory_lots (
    id TEXT PRIMARY KEY,
    medicine_id TEXT NOT NULL REFERENCES medicines(id),
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    expiration_date TEXT NOT NULL,               -- YYYY-MM-DD
    version INTEGER NOT NULL DEFAULT 0,
    received_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_lots_medicine_expiry ON inventory_lots(medicine_id, expiration_date);

-- ============================================================================
-- Dispense Transactions (Append-Only - Immutable after creation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS dispense_transactions (
    seq INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    direction TEXT NOT NULL CHECK (direction IN ('in', 'out')),
    medicine_id TEXT NOT NULL REFERENCES medicines(id),
    classification TEXT NOT NULL,
    medicine_name TEXT NOT NULL,
    dosage_form TEXT NOT NULL,
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    visit_record_id TEXT REFERENCES visit_records(id),
    patient_id TEXT REFERENCES patients(id),
    staff_id TEXT,
    note TEXT,
    created_at TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    entry_hash TEXT NOT NULL UNIQUE
);

CREATE TRIGGER IF NOT EXISTS dispense_transactions_no_update BEFORE UPDATE ON dispense_transactions
BEGIN
    SELECT RAISE(ABORT, 'dispense_transactions is append-only');
END;

CREATE TRIGGER IF NOT EXISTS dispense_transactions_no_delete BEFORE DELETE ON dispense_transactions
BEGIN
    SELECT RAISE(ABORT, 'dispense_transactions is append-only');
END;

CREATE INDEX IF NOT EXISTS idx_tx_created ON dispense_transactions(direction, created_at);
CREATE INDEX IF NOT EXISTS idx_tx_visit ON dispense_transactions(visit_record_id);
CREATE INDEX IF NOT EXISTS idx_tx_medicine ON dispense_transactions(medicine_id);

-- ============================================================================
-- Change Events (outbox for the change feed)
-- ============================================================================

CREATE TABLE IF NOT EXISTS change_events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    change TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_entity ON change_events(entity_type, entity_id);
"#;
