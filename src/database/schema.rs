//! SQLite schema, applied idempotently at startup.
//!
//! Timestamps are stored as canonical RFC 3339 TEXT (see `models::canonical_ts`)
//! so that every persisted hash can be recomputed bit-for-bit from stored fields.

pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS studies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        slug TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        summary TEXT NOT NULL DEFAULT '',
        purpose TEXT NOT NULL DEFAULT '',
        contact TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'draft',
        join_code TEXT,
        retention_default_days INTEGER NOT NULL,
        owner_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS data_categories (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id INTEGER NOT NULL REFERENCES studies(id),
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        required INTEGER NOT NULL DEFAULT 0,
        retention_days INTEGER,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_categories_study ON data_categories(study_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS enrollments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id INTEGER NOT NULL REFERENCES studies(id),
        participant_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (study_id, participant_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id INTEGER NOT NULL REFERENCES studies(id),
        participant_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        granted INTEGER NOT NULL,
        withdrawn_at TEXT,
        receipt_hash TEXT NOT NULL,
        receipt_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (study_id, participant_id, version)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_consents_pair ON consents(study_id, participant_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS consent_choices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        consent_id INTEGER NOT NULL REFERENCES consents(id),
        category_id INTEGER NOT NULL REFERENCES data_categories(id),
        allowed INTEGER NOT NULL,
        UNIQUE (consent_id, category_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS uploads (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id INTEGER NOT NULL REFERENCES studies(id),
        participant_id TEXT NOT NULL,
        category_id INTEGER NOT NULL REFERENCES data_categories(id),
        filename TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        study_id INTEGER NOT NULL REFERENCES studies(id),
        actor_role TEXT NOT NULL,
        actor_id TEXT,
        action TEXT NOT NULL,
        details TEXT NOT NULL,
        prev_hash TEXT,
        entry_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_audit_study ON audit_log(study_id, id)
    "#,
];
