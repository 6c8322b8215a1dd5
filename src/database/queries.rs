use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::database::models::*;
use crate::error::Result;

pub struct Queries;

impl Queries {
    pub async fn get_study(pool: &SqlitePool, study_id: i64) -> Result<Option<Study>> {
        let row = sqlx::query(
            r#"
            SELECT id, slug, title, summary, purpose, contact, status, join_code,
                   retention_default_days, owner_id, created_at, updated_at
            FROM studies
            WHERE id = ?
            "#,
        )
        .bind(study_id)
        .fetch_optional(pool)
        .await?;

        row.map(map_study).transpose()
    }

    pub async fn get_study_by_slug(pool: &SqlitePool, slug: &str) -> Result<Option<Study>> {
        let row = sqlx::query(
            r#"
            SELECT id, slug, title, summary, purpose, contact, status, join_code,
                   retention_default_days, owner_id, created_at, updated_at
            FROM studies
            WHERE slug = ?
            "#,
        )
        .bind(slug)
        .fetch_optional(pool)
        .await?;

        row.map(map_study).transpose()
    }

    pub async fn get_all_studies(pool: &SqlitePool) -> Result<Vec<Study>> {
        let rows = sqlx::query(
            r#"
            SELECT id, slug, title, summary, purpose, contact, status, join_code,
                   retention_default_days, owner_id, created_at, updated_at
            FROM studies
            ORDER BY id ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(map_study).collect()
    }

    /// Categories in stable creation order. Consent choices reference these
    /// by id, so callers must never recreate rows to rename them.
    pub async fn get_categories(pool: &SqlitePool, study_id: i64) -> Result<Vec<DataCategory>> {
        let rows = sqlx::query(
            r#"
            SELECT id, study_id, name, description, required, retention_days, created_at
            FROM data_categories
            WHERE study_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(study_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(map_category).collect()
    }

    pub async fn get_enrollment(
        pool: &SqlitePool,
        study_id: i64,
        participant_id: &str,
    ) -> Result<Option<Enrollment>> {
        let row = sqlx::query(
            r#"
            SELECT id, study_id, participant_id, created_at
            FROM enrollments
            WHERE study_id = ? AND participant_id = ?
            "#,
        )
        .bind(study_id)
        .bind(participant_id)
        .fetch_optional(pool)
        .await?;

        row.map(map_enrollment).transpose()
    }

    /// The current consent is the row with the maximum version for the pair.
    pub async fn get_current_consent(
        pool: &SqlitePool,
        study_id: i64,
        participant_id: &str,
    ) -> Result<Option<Consent>> {
        let row = sqlx::query(
            r#"
            SELECT id, study_id, participant_id, version, granted, withdrawn_at,
                   receipt_hash, receipt_json, created_at
            FROM consents
            WHERE study_id = ? AND participant_id = ?
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(study_id)
        .bind(participant_id)
        .fetch_optional(pool)
        .await?;

        row.map(map_consent).transpose()
    }

    pub async fn get_consent_version(
        pool: &SqlitePool,
        study_id: i64,
        participant_id: &str,
        version: i64,
    ) -> Result<Option<Consent>> {
        let row = sqlx::query(
            r#"
            SELECT id, study_id, participant_id, version, granted, withdrawn_at,
                   receipt_hash, receipt_json, created_at
            FROM consents
            WHERE study_id = ? AND participant_id = ? AND version = ?
            "#,
        )
        .bind(study_id)
        .bind(participant_id)
        .bind(version)
        .fetch_optional(pool)
        .await?;

        row.map(map_consent).transpose()
    }

    pub async fn get_choices(pool: &SqlitePool, consent_id: i64) -> Result<Vec<ConsentChoice>> {
        let rows = sqlx::query(
            r#"
            SELECT id, consent_id, category_id, allowed
            FROM consent_choices
            WHERE consent_id = ?
            ORDER BY category_id ASC
            "#,
        )
        .bind(consent_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(map_choice).collect()
    }

    /// Audit entries oldest first; row id is append order.
    pub async fn get_audit_entries(pool: &SqlitePool, study_id: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, study_id, actor_role, actor_id, action, details,
                   prev_hash, entry_hash, created_at
            FROM audit_log
            WHERE study_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(study_id)
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(map_audit_entry).collect()
    }
}

fn map_study(row: SqliteRow) -> Result<Study> {
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Study {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        purpose: row.try_get("purpose")?,
        contact: row.try_get("contact")?,
        status: StudyStatus::parse(&status)?,
        join_code: row.try_get("join_code")?,
        retention_default_days: row.try_get("retention_default_days")?,
        owner_id: row.try_get("owner_id")?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn map_category(row: SqliteRow) -> Result<DataCategory> {
    let created_at: String = row.try_get("created_at")?;

    Ok(DataCategory {
        id: row.try_get("id")?,
        study_id: row.try_get("study_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        required: row.try_get("required")?,
        retention_days: row.try_get("retention_days")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn map_enrollment(row: SqliteRow) -> Result<Enrollment> {
    let created_at: String = row.try_get("created_at")?;

    Ok(Enrollment {
        id: row.try_get("id")?,
        study_id: row.try_get("study_id")?,
        participant_id: row.try_get("participant_id")?,
        created_at: parse_ts(&created_at)?,
    })
}

fn map_consent(row: SqliteRow) -> Result<Consent> {
    let withdrawn_at: Option<String> = row.try_get("withdrawn_at")?;
    let receipt_json: String = row.try_get("receipt_json")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Consent {
        id: row.try_get("id")?,
        study_id: row.try_get("study_id")?,
        participant_id: row.try_get("participant_id")?,
        version: row.try_get("version")?,
        granted: row.try_get("granted")?,
        withdrawn_at: withdrawn_at.as_deref().map(parse_ts).transpose()?,
        receipt_hash: row.try_get("receipt_hash")?,
        receipt_json: serde_json::from_str(&receipt_json)?,
        created_at: parse_ts(&created_at)?,
    })
}

fn map_choice(row: SqliteRow) -> Result<ConsentChoice> {
    Ok(ConsentChoice {
        id: row.try_get("id")?,
        consent_id: row.try_get("consent_id")?,
        category_id: row.try_get("category_id")?,
        allowed: row.try_get("allowed")?,
    })
}

fn map_audit_entry(row: SqliteRow) -> Result<AuditEntry> {
    let details: String = row.try_get("details")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        study_id: row.try_get("study_id")?,
        actor_role: row.try_get("actor_role")?,
        actor_id: row.try_get("actor_id")?,
        action: row.try_get("action")?,
        details: serde_json::from_str(&details)?,
        prev_hash: row.try_get("prev_hash")?,
        entry_hash: row.try_get("entry_hash")?,
        created_at: parse_ts(&created_at)?,
    })
}
