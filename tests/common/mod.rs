use chrono::Utc;

use consent_app::audit::AuditChain;
use consent_app::consent::ConsentEngine;
use consent_app::database::models::{canonical_ts, StudyStatus};
use consent_app::database::Database;
use consent_app::enrollment::EnrollmentGate;
use consent_app::study::{CategoryEntry, StudyInput, StudyService};

/// Setup an in-memory SQLite database for testing
pub async fn setup_test_db() -> Database {
    Database::new_in_memory()
        .await
        .expect("Failed to create test database")
}

pub struct TestApp {
    pub database: Database,
    pub chain: AuditChain,
    pub engine: ConsentEngine,
    pub gate: EnrollmentGate,
    pub studies: StudyService,
}

pub async fn setup_test_app() -> TestApp {
    let database = setup_test_db().await;
    build_test_app(database)
}

pub fn build_test_app(database: Database) -> TestApp {
    let chain = AuditChain::new(&database);
    let engine = ConsentEngine::new(database.clone(), chain.clone());
    let gate = EnrollmentGate::new(database.clone(), chain.clone());
    let studies = StudyService::new(database.clone(), chain.clone(), engine.clone(), 365);

    TestApp {
        database,
        chain,
        engine,
        gate,
        studies,
    }
}

/// Standard three-category study input: Email (optional), Usage Logs
/// (required), Accelerometer (optional).
pub fn standard_study_input(status: StudyStatus) -> StudyInput {
    StudyInput {
        title: "Sleep Quality Study".to_string(),
        summary: "How sleep affects daily performance".to_string(),
        purpose: "Academic research".to_string(),
        contact: "ethics@example.org".to_string(),
        status,
        retention_default_days: None,
        categories: vec![
            CategoryEntry {
                name: "Email".to_string(),
                description: "Contact address".to_string(),
                required: false,
                retention_days: None,
            },
            CategoryEntry {
                name: "Usage Logs".to_string(),
                description: "Application usage logs".to_string(),
                required: true,
                retention_days: Some(90),
            },
            CategoryEntry {
                name: "Accelerometer".to_string(),
                description: "Motion sensor readings".to_string(),
                required: false,
                retention_days: None,
            },
        ],
    }
}

/// Insert a bare study row directly, bypassing the service, so tests can
/// exercise the category guarantor against studies with missing categories.
pub async fn insert_bare_study(database: &Database, slug: &str) -> i64 {
    let now = canonical_ts(&Utc::now());

    sqlx::query(
        r#"
        INSERT INTO studies (slug, title, summary, purpose, contact, status, join_code,
                             retention_default_days, owner_id, created_at, updated_at)
        VALUES (?, ?, '', '', '', 'public', NULL, 365, 'r-owner', ?, ?)
        "#,
    )
    .bind(slug)
    .bind(format!("Bare study {}", slug))
    .bind(&now)
    .bind(&now)
    .execute(database.pool())
    .await
    .expect("Failed to insert bare study")
    .last_insert_rowid()
}

pub async fn count_rows(database: &Database, table: &str, study_id: i64) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE study_id = ?",
        table
    ))
    .bind(study_id)
    .fetch_one(database.pool())
    .await
    .expect("Failed to count rows")
}
