//! End-to-end tests for enrollment, consent versioning, receipts, and the
//! category guarantor.

mod common;

use common::*;

use consent_app::consent::engine::CategoryDecision;
use consent_app::consent::receipt::verify_receipt;
use consent_app::database::models::{Actor, ActorRole, DataCategory, StudyStatus};
use consent_app::database::queries::Queries;
use consent_app::error::ConsentError;
use consent_app::study::categories::ensure_minimum_categories;

fn category_id(categories: &[DataCategory], name: &str) -> i64 {
    categories
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("category '{}' missing", name))
        .id
}

#[tokio::test]
async fn test_guarantor_synthesizes_and_is_idempotent() {
    let app = setup_test_app().await;
    let study_id = insert_bare_study(&app.database, "bare").await;

    let first = ensure_minimum_categories(app.database.pool(), study_id)
        .await
        .unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(
        first.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["Email", "Usage Logs", "Accelerometer"]
    );

    let second = ensure_minimum_categories(app.database.pool(), study_id)
        .await
        .unwrap();
    assert_eq!(second.len(), 3);

    let first_ids: Vec<i64> = first.iter().map(|c| c.id).collect();
    let second_ids: Vec<i64> = second.iter().map(|c| c.id).collect();
    assert_eq!(first_ids, second_ids);
}

#[tokio::test]
async fn test_guarantor_fills_with_first_unused_defaults() {
    let app = setup_test_app().await;
    let study_id = insert_bare_study(&app.database, "partial").await;

    sqlx::query(
        "INSERT INTO data_categories (study_id, name, description, required, retention_days, created_at)
         VALUES (?, 'Accelerometer', '', 0, NULL, '2026-01-01T00:00:00.000000Z')",
    )
    .bind(study_id)
    .execute(app.database.pool())
    .await
    .unwrap();

    let categories = ensure_minimum_categories(app.database.pool(), study_id)
        .await
        .unwrap();

    assert_eq!(categories.len(), 3);
    // Existing category first (creation order), then the first unused defaults.
    assert_eq!(categories[0].name, "Accelerometer");
    assert_eq!(categories[1].name, "Email");
    assert_eq!(categories[2].name, "Usage Logs");
}

#[tokio::test]
async fn test_version_sequence_is_gapless() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let categories = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();
    let email = category_id(&categories, "Email");

    let v1 = app
        .engine
        .record_decision(
            study.id,
            "p-1",
            &[CategoryDecision {
                category_id: email,
                allowed: true,
            }],
            false,
        )
        .await
        .unwrap();
    let v2 = app
        .engine
        .record_decision(study.id, "p-1", &[], false)
        .await
        .unwrap();
    let v3 = app.engine.withdraw(study.id, "p-1").await.unwrap();
    let v4 = app
        .engine
        .record_decision(
            study.id,
            "p-1",
            &[CategoryDecision {
                category_id: email,
                allowed: true,
            }],
            false,
        )
        .await
        .unwrap();

    assert_eq!(
        vec![v1.version, v2.version, v3.version, v4.version],
        vec![1, 2, 3, 4]
    );
    assert!(v3.withdrawn_at.is_some());
    assert!(v1.withdrawn_at.is_none());
    assert!(v4.withdrawn_at.is_none());

    // Another participant starts back at 1.
    let other = app
        .engine
        .record_decision(study.id, "p-2", &[], false)
        .await
        .unwrap();
    assert_eq!(other.version, 1);
}

#[tokio::test]
async fn test_receipt_roundtrip() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let categories = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();

    let consent = app
        .engine
        .record_decision(
            study.id,
            "p-1",
            &[CategoryDecision {
                category_id: category_id(&categories, "Email"),
                allowed: true,
            }],
            false,
        )
        .await
        .unwrap();

    assert!(consent.receipt_hash.starts_with("sha256:"));
    assert_eq!(consent.receipt_json["receipt_hash"], consent.receipt_hash);
    assert!(verify_receipt(&consent.receipt_json));

    // The persisted copy verifies too.
    let stored = Queries::get_consent_version(app.database.pool(), study.id, "p-1", 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.receipt_hash, consent.receipt_hash);
    assert!(verify_receipt(&stored.receipt_json));
}

#[tokio::test]
async fn test_required_category_forced_and_withdrawal() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let categories = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();
    let email = category_id(&categories, "Email");
    let logs = category_id(&categories, "Usage Logs");
    let accel = category_id(&categories, "Accelerometer");

    // Submit Email: true, Accelerometer: false; Usage Logs is required.
    let v1 = app
        .engine
        .record_decision(
            study.id,
            "p-1",
            &[
                CategoryDecision {
                    category_id: email,
                    allowed: true,
                },
                CategoryDecision {
                    category_id: accel,
                    allowed: false,
                },
            ],
            false,
        )
        .await
        .unwrap();

    assert_eq!(v1.version, 1);
    assert!(v1.granted);

    let choices = Queries::get_choices(app.database.pool(), v1.id).await.unwrap();
    assert_eq!(choices.len(), 3);
    let allowed_of = |id: i64| choices.iter().find(|c| c.category_id == id).unwrap().allowed;
    assert!(allowed_of(email));
    assert!(allowed_of(logs), "required category must be force-allowed");
    assert!(!allowed_of(accel));

    // Withdrawal denies everything, including the required category.
    let v2 = app.engine.withdraw(study.id, "p-1").await.unwrap();
    assert_eq!(v2.version, 2);
    assert!(!v2.granted);
    assert!(v2.withdrawn_at.is_some());

    let withdrawn_choices = Queries::get_choices(app.database.pool(), v2.id).await.unwrap();
    assert_eq!(withdrawn_choices.len(), 3);
    assert!(withdrawn_choices.iter().all(|c| !c.allowed));

    // Version 1 is retrievable, unchanged.
    let stored_v1 = Queries::get_consent_version(app.database.pool(), study.id, "p-1", 1)
        .await
        .unwrap()
        .unwrap();
    assert!(stored_v1.granted);
    assert!(stored_v1.withdrawn_at.is_none());
    assert_eq!(stored_v1.receipt_hash, v1.receipt_hash);
}

#[tokio::test]
async fn test_unknown_category_decisions_are_ignored() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();

    let consent = app
        .engine
        .record_decision(
            study.id,
            "p-1",
            &[CategoryDecision {
                category_id: 999_999,
                allowed: true,
            }],
            false,
        )
        .await
        .unwrap();

    let choices = Queries::get_choices(app.database.pool(), consent.id)
        .await
        .unwrap();
    assert_eq!(choices.len(), 3);
    assert!(choices.iter().all(|c| c.category_id != 999_999));
    // Only the required category is allowed.
    assert_eq!(choices.iter().filter(|c| c.allowed).count(), 1);
}

#[tokio::test]
async fn test_record_decision_unknown_study() {
    let app = setup_test_app().await;

    let err = app
        .engine
        .record_decision(4242, "p-1", &[], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::NotFound(_)));
}

#[tokio::test]
async fn test_enrollment_is_idempotent() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Invite))
        .await
        .unwrap();
    let code = study.join_code.clone().expect("invite study gets a code");

    let first = app.gate.join(study.id, "p-1", Some(&code)).await.unwrap();
    let second = app.gate.join(study.id, "p-1", Some(&code)).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(count_rows(&app.database, "enrollments", study.id).await, 1);
}

#[tokio::test]
async fn test_invite_gating_rejects_bad_code() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Invite))
        .await
        .unwrap();

    let err = app
        .gate
        .join(study.id, "p-1", Some("WRONGCODE"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Conflict(_)));

    assert_eq!(count_rows(&app.database, "enrollments", study.id).await, 0);
    assert_eq!(count_rows(&app.database, "consents", study.id).await, 0);

    // Codes are case-folded and trimmed on comparison.
    let code = study.join_code.clone().unwrap();
    let sloppy = format!("  {} ", code.to_lowercase());
    app.gate.join(study.id, "p-1", Some(&sloppy)).await.unwrap();
}

#[tokio::test]
async fn test_draft_study_not_joinable() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Draft))
        .await
        .unwrap();

    let err = app.gate.join(study.id, "p-1", None).await.unwrap_err();
    assert!(matches!(err, ConsentError::NotFound(_)));
}

#[tokio::test]
async fn test_regenerated_code_invalidates_previous() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Invite))
        .await
        .unwrap();
    let original = study.join_code.clone().unwrap();

    let first = app
        .studies
        .regenerate_join_code("r-1", &study.slug)
        .await
        .unwrap();
    let second = app
        .studies
        .regenerate_join_code("r-1", &study.slug)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_ne!(original, first);

    let err = app.gate.join(study.id, "p-1", Some(&first)).await.unwrap_err();
    assert!(matches!(err, ConsentError::Conflict(_)));

    app.gate.join(study.id, "p-1", Some(&second)).await.unwrap();

    // Only the owner may regenerate.
    let err = app
        .studies
        .regenerate_join_code("r-2", &study.slug)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden(_)));
}

#[tokio::test]
async fn test_unenroll_preserves_consent_history() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();

    app.gate.join(study.id, "p-1", None).await.unwrap();
    app.engine
        .record_decision(study.id, "p-1", &[], false)
        .await
        .unwrap();

    app.gate.unenroll(study.id, "p-1").await.unwrap();

    assert_eq!(count_rows(&app.database, "enrollments", study.id).await, 0);
    assert_eq!(count_rows(&app.database, "consents", study.id).await, 1);

    // Unenrolling again is harmless.
    app.gate.unenroll(study.id, "p-1").await.unwrap();
}

#[tokio::test]
async fn test_slug_collision_gets_numeric_suffix() {
    let app = setup_test_app().await;

    let first = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let second = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();

    assert_eq!(first.slug, "sleep-quality-study");
    assert_eq!(second.slug, "sleep-quality-study-2");
}

#[tokio::test]
async fn test_upload_gate() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let categories = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();
    let email = category_id(&categories, "Email");
    let logs = category_id(&categories, "Usage Logs");
    let accel = category_id(&categories, "Accelerometer");

    app.engine
        .record_decision(
            study.id,
            "p-1",
            &[
                CategoryDecision {
                    category_id: email,
                    allowed: true,
                },
                CategoryDecision {
                    category_id: accel,
                    allowed: false,
                },
            ],
            false,
        )
        .await
        .unwrap();

    // Denied category is rejected with no upload row.
    let err = app
        .studies
        .record_upload(study.id, "p-1", accel, "walk.csv")
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden(_)));
    assert_eq!(count_rows(&app.database, "uploads", study.id).await, 0);

    // Allowed and required categories are accepted.
    app.studies
        .record_upload(study.id, "p-1", email, "contact.txt")
        .await
        .unwrap();
    app.studies
        .record_upload(study.id, "p-1", logs, "usage.json")
        .await
        .unwrap();
    assert_eq!(count_rows(&app.database, "uploads", study.id).await, 2);

    // Foreign category id is NotFound, not Forbidden.
    let err = app
        .studies
        .record_upload(study.id, "p-1", 999_999, "x.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::NotFound(_)));
}

#[tokio::test]
async fn test_receipt_access_control() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();

    app.engine
        .record_decision(study.id, "p-1", &[], false)
        .await
        .unwrap();

    let participant = Actor {
        id: "p-1".to_string(),
        role: ActorRole::Participant,
    };
    let owner = Actor {
        id: "r-1".to_string(),
        role: ActorRole::Researcher,
    };
    let stranger = Actor {
        id: "r-2".to_string(),
        role: ActorRole::Researcher,
    };
    let other_participant = Actor {
        id: "p-2".to_string(),
        role: ActorRole::Participant,
    };

    let receipt = app
        .studies
        .fetch_receipt(&study.slug, "p-1", 1, &participant)
        .await
        .unwrap();
    assert!(verify_receipt(&receipt));

    app.studies
        .fetch_receipt(&study.slug, "p-1", 1, &owner)
        .await
        .unwrap();

    let err = app
        .studies
        .fetch_receipt(&study.slug, "p-1", 1, &stranger)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden(_)));

    let err = app
        .studies
        .fetch_receipt(&study.slug, "p-1", 1, &other_participant)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden(_)));

    let err = app
        .studies
        .fetch_receipt(&study.slug, "p-1", 7, &participant)
        .await
        .unwrap_err();
    assert!(matches!(err, ConsentError::NotFound(_)));
}

#[tokio::test]
async fn test_category_edit_preserves_identity() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let before = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();

    let consent = app
        .engine
        .record_decision(
            study.id,
            "p-1",
            &[CategoryDecision {
                category_id: before[0].id,
                allowed: true,
            }],
            false,
        )
        .await
        .unwrap();

    let mut input = standard_study_input(StudyStatus::Public);
    input.categories[0].name = "Contact Email".to_string();
    app.studies
        .update_study("r-1", &study.slug, input)
        .await
        .unwrap();

    let after = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();
    let before_ids: Vec<i64> = before.iter().map(|c| c.id).collect();
    let after_ids: Vec<i64> = after.iter().map(|c| c.id).collect();
    assert_eq!(before_ids, after_ids, "edits must not recreate categories");
    assert_eq!(after[0].name, "Contact Email");

    // Historic choices still resolve against the renamed category.
    let choices = Queries::get_choices(app.database.pool(), consent.id)
        .await
        .unwrap();
    assert!(choices.iter().any(|c| c.category_id == after[0].id && c.allowed));
}

#[tokio::test]
async fn test_study_delete_cascades() {
    let app = setup_test_app().await;
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    let categories = Queries::get_categories(app.database.pool(), study.id)
        .await
        .unwrap();

    app.gate.join(study.id, "p-1", None).await.unwrap();
    app.engine
        .record_decision(study.id, "p-1", &[], false)
        .await
        .unwrap();
    app.studies
        .record_upload(study.id, "p-1", categories[1].id, "usage.json")
        .await
        .unwrap();

    let err = app.studies.delete_study("r-2", &study.slug).await.unwrap_err();
    assert!(matches!(err, ConsentError::Forbidden(_)));

    app.studies.delete_study("r-1", &study.slug).await.unwrap();

    for table in [
        "uploads",
        "consents",
        "enrollments",
        "audit_log",
        "data_categories",
    ] {
        assert_eq!(
            count_rows(&app.database, table, study.id).await,
            0,
            "{} not cleaned up",
            table
        );
    }
    assert!(Queries::get_study(app.database.pool(), study.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_create_study_validation() {
    let app = setup_test_app().await;

    let mut input = standard_study_input(StudyStatus::Public);
    input.title = "   ".to_string();
    let err = app.studies.create_study("r-1", input).await.unwrap_err();
    assert!(matches!(err, ConsentError::InvalidInput(_)));

    let mut input = standard_study_input(StudyStatus::Public);
    input.categories.pop();
    let err = app.studies.create_study("r-1", input).await.unwrap_err();
    assert!(matches!(err, ConsentError::InvalidInput(_)));

    // Public studies get no join code.
    let study = app
        .studies
        .create_study("r-1", standard_study_input(StudyStatus::Public))
        .await
        .unwrap();
    assert!(study.join_code.is_none());
}
