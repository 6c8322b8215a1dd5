//! Category consistency guarantor.
//!
//! Consent forms and positional edits assume at least three categories per
//! study. Missing ones are synthesized from a fixed default sequence and
//! persisted, so the set is stable on every subsequent read. Category ids
//! are never reused or recreated; historic consent choices stay valid.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::debug;

use crate::database::models::{canonical_ts, DataCategory};
use crate::database::queries::Queries;
use crate::error::{ConsentError, Result};

pub const MIN_CATEGORIES: usize = 3;

pub const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("Email", "Email address used to contact you about this study"),
    ("Usage Logs", "Application usage and interaction logs"),
    ("Accelerometer", "Motion sensor readings from your device"),
];

/// Returns the study's categories in creation order, synthesizing and
/// persisting defaults first when fewer than three exist. Idempotent: once
/// the minimum holds, the call is a plain read.
pub async fn ensure_minimum_categories(
    pool: &SqlitePool,
    study_id: i64,
) -> Result<Vec<DataCategory>> {
    Queries::get_study(pool, study_id)
        .await?
        .ok_or_else(|| ConsentError::NotFound(format!("study {} not found", study_id)))?;

    let existing = Queries::get_categories(pool, study_id).await?;
    if existing.len() >= MIN_CATEGORIES {
        return Ok(existing);
    }

    let taken: HashSet<&str> = existing.iter().map(|c| c.name.as_str()).collect();
    let missing = MIN_CATEGORIES - existing.len();
    let now = canonical_ts(&Utc::now());

    let mut tx = pool.begin().await?;

    for (name, description) in DEFAULT_CATEGORIES
        .iter()
        .filter(|(name, _)| !taken.contains(name))
        .take(missing)
    {
        sqlx::query(
            r#"
            INSERT INTO data_categories (study_id, name, description, required, retention_days, created_at)
            VALUES (?, ?, ?, 0, NULL, ?)
            "#,
        )
        .bind(study_id)
        .bind(name)
        .bind(description)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    debug!(study_id, missing, "synthesized default categories");

    Queries::get_categories(pool, study_id).await
}
