//! Researcher-facing study operations and the participant upload gate.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::audit::chain::{append_in_tx, AuditChain};
use crate::consent::engine::ConsentEngine;
use crate::database::models::{
    canonical_ts, Actor, ActorRole, AuditAction, Study, StudyStatus, Upload,
};
use crate::database::queries::Queries;
use crate::database::Database;
use crate::enrollment::join_code;
use crate::error::{ConsentError, Result};
use crate::study::categories::{self, MIN_CATEGORIES};
use crate::study::slug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub retention_days: Option<i64>,
}

/// Create/edit payload. Categories are a fixed-arity ordered list of exactly
/// three entries; on update they address the first three existing categories
/// in stable order and edit them in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyInput {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub contact: String,
    pub status: StudyStatus,
    #[serde(default)]
    pub retention_default_days: Option<i64>,
    pub categories: Vec<CategoryEntry>,
}

#[derive(Clone)]
pub struct StudyService {
    database: Database,
    chain: AuditChain,
    engine: ConsentEngine,
    retention_default_days: i64,
}

impl StudyService {
    pub fn new(
        database: Database,
        chain: AuditChain,
        engine: ConsentEngine,
        retention_default_days: i64,
    ) -> Self {
        Self {
            database,
            chain,
            engine,
            retention_default_days,
        }
    }

    fn pool(&self) -> &SqlitePool {
        self.database.pool()
    }

    fn validate(input: &StudyInput) -> Result<()> {
        if input.title.trim().is_empty() {
            return Err(ConsentError::InvalidInput("title must not be empty".to_string()));
        }

        if input.categories.len() != MIN_CATEGORIES {
            return Err(ConsentError::InvalidInput(format!(
                "exactly {} category entries required, got {}",
                MIN_CATEGORIES,
                input.categories.len()
            )));
        }

        for entry in &input.categories {
            if entry.name.trim().is_empty() {
                return Err(ConsentError::InvalidInput(
                    "category name must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub async fn create_study(&self, owner_id: &str, input: StudyInput) -> Result<Study> {
        Self::validate(&input)?;

        let study_slug = slug::unique_slug(self.pool(), &input.title).await?;
        let code = match input.status {
            StudyStatus::Invite => Some(join_code::generate()),
            _ => None,
        };
        let retention = input
            .retention_default_days
            .unwrap_or(self.retention_default_days);
        let now = canonical_ts(&Utc::now());

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO studies (slug, title, summary, purpose, contact, status, join_code,
                                 retention_default_days, owner_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&study_slug)
        .bind(input.title.trim())
        .bind(&input.summary)
        .bind(&input.purpose)
        .bind(&input.contact)
        .bind(input.status.as_str())
        .bind(&code)
        .bind(retention)
        .bind(owner_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let study_id = result.last_insert_rowid();

        for entry in &input.categories {
            sqlx::query(
                r#"
                INSERT INTO data_categories (study_id, name, description, required, retention_days, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(study_id)
            .bind(entry.name.trim())
            .bind(&entry.description)
            .bind(entry.required)
            .bind(entry.retention_days)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        append_in_tx(
            &mut tx,
            study_id,
            ActorRole::Researcher,
            Some(owner_id),
            AuditAction::StudyCreated,
            json!({ "slug": study_slug }),
        )
        .await?;

        tx.commit().await?;

        info!(study_id, slug = %study_slug, "study created");

        Queries::get_study(self.pool(), study_id)
            .await?
            .ok_or_else(|| ConsentError::Database("study row missing after insert".to_string()))
    }

    /// Read a study for rendering or editing. Runs the category guarantor so
    /// callers always see at least three categories in stable order.
    pub async fn get_study_for_render(
        &self,
        study_slug: &str,
    ) -> Result<(Study, Vec<crate::database::models::DataCategory>)> {
        let study = Queries::get_study_by_slug(self.pool(), study_slug)
            .await?
            .ok_or_else(|| ConsentError::study_not_found(study_slug))?;

        let cats = categories::ensure_minimum_categories(self.pool(), study.id).await?;
        Ok((study, cats))
    }

    pub async fn update_study(
        &self,
        owner_id: &str,
        study_slug: &str,
        input: StudyInput,
    ) -> Result<Study> {
        let study = Queries::get_study_by_slug(self.pool(), study_slug)
            .await?
            .ok_or_else(|| ConsentError::study_not_found(study_slug))?;

        if study.owner_id != owner_id {
            return Err(ConsentError::not_owner());
        }

        Self::validate(&input)?;

        // Guarantor before a positional edit; categories are updated by id,
        // never recreated, so consent choices keep their references.
        let existing = categories::ensure_minimum_categories(self.pool(), study.id).await?;

        let lock = self.chain.study_lock(study.id).await;
        let _guard = lock.lock().await;

        let retention = input
            .retention_default_days
            .unwrap_or(study.retention_default_days);
        let now = canonical_ts(&Utc::now());

        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r#"
            UPDATE studies
            SET title = ?, summary = ?, purpose = ?, contact = ?, status = ?,
                retention_default_days = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(input.title.trim())
        .bind(&input.summary)
        .bind(&input.purpose)
        .bind(&input.contact)
        .bind(input.status.as_str())
        .bind(retention)
        .bind(&now)
        .bind(study.id)
        .execute(&mut *tx)
        .await?;

        for (current, entry) in existing.iter().zip(&input.categories) {
            sqlx::query(
                r#"
                UPDATE data_categories
                SET name = ?, description = ?, required = ?, retention_days = ?
                WHERE id = ?
                "#,
            )
            .bind(entry.name.trim())
            .bind(&entry.description)
            .bind(entry.required)
            .bind(entry.retention_days)
            .bind(current.id)
            .execute(&mut *tx)
            .await?;
        }

        append_in_tx(
            &mut tx,
            study.id,
            ActorRole::Researcher,
            Some(owner_id),
            AuditAction::StudyUpdated,
            json!({ "slug": study.slug }),
        )
        .await?;

        tx.commit().await?;

        info!(study_id = study.id, slug = %study.slug, "study updated");

        Queries::get_study(self.pool(), study.id)
            .await?
            .ok_or_else(|| ConsentError::Database("study row missing after update".to_string()))
    }

    /// Delete a study and every dependent row in one transaction.
    pub async fn delete_study(&self, owner_id: &str, study_slug: &str) -> Result<()> {
        let study = Queries::get_study_by_slug(self.pool(), study_slug)
            .await?
            .ok_or_else(|| ConsentError::study_not_found(study_slug))?;

        if study.owner_id != owner_id {
            return Err(ConsentError::not_owner());
        }

        let lock = self.chain.study_lock(study.id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM uploads WHERE study_id = ?")
            .bind(study.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM consent_choices WHERE consent_id IN (SELECT id FROM consents WHERE study_id = ?)",
        )
        .bind(study.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM consents WHERE study_id = ?")
            .bind(study.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM enrollments WHERE study_id = ?")
            .bind(study.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM audit_log WHERE study_id = ?")
            .bind(study.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM data_categories WHERE study_id = ?")
            .bind(study.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM studies WHERE id = ?")
            .bind(study.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(study_id = study.id, slug = %study.slug, "study deleted with dependents");
        Ok(())
    }

    /// Replace the join code immediately. The old code stops admitting as
    /// soon as this commits; the code itself is never written to the audit
    /// log.
    pub async fn regenerate_join_code(&self, owner_id: &str, study_slug: &str) -> Result<String> {
        let study = Queries::get_study_by_slug(self.pool(), study_slug)
            .await?
            .ok_or_else(|| ConsentError::study_not_found(study_slug))?;

        if study.owner_id != owner_id {
            return Err(ConsentError::not_owner());
        }

        let code = join_code::generate();
        let now = canonical_ts(&Utc::now());

        let lock = self.chain.study_lock(study.id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE studies SET join_code = ?, updated_at = ? WHERE id = ?")
            .bind(&code)
            .bind(&now)
            .bind(study.id)
            .execute(&mut *tx)
            .await?;

        append_in_tx(
            &mut tx,
            study.id,
            ActorRole::Researcher,
            Some(owner_id),
            AuditAction::JoinCodeRegenerated,
            json!({ "slug": study.slug }),
        )
        .await?;

        tx.commit().await?;

        info!(study_id = study.id, "join code regenerated");
        Ok(code)
    }

    /// Upload acceptance gate: the category must belong to the study and be
    /// covered by the participant's current consent (or be required).
    /// Storage and MIME handling stay outside the core.
    pub async fn record_upload(
        &self,
        study_id: i64,
        participant_id: &str,
        category_id: i64,
        filename: &str,
    ) -> Result<Upload> {
        Queries::get_study(self.pool(), study_id)
            .await?
            .ok_or_else(|| ConsentError::NotFound(format!("study {} not found", study_id)))?;

        let cats = Queries::get_categories(self.pool(), study_id).await?;
        let category = cats
            .iter()
            .find(|c| c.id == category_id)
            .ok_or_else(|| {
                ConsentError::NotFound(format!(
                    "category {} is not part of study {}",
                    category_id, study_id
                ))
            })?;

        let allowed = self
            .engine
            .category_allowed(study_id, participant_id, category_id)
            .await?;
        if !allowed {
            warn!(study_id, participant_id, category_id, "upload rejected by consent gate");
            return Err(ConsentError::Forbidden(
                "current consent does not cover this category".to_string(),
            ));
        }

        let created_at = Utc::now();

        let lock = self.chain.study_lock(study_id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO uploads (study_id, participant_id, category_id, filename, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(study_id)
        .bind(participant_id)
        .bind(category_id)
        .bind(filename)
        .bind(canonical_ts(&created_at))
        .execute(&mut *tx)
        .await?;

        append_in_tx(
            &mut tx,
            study_id,
            ActorRole::Participant,
            Some(participant_id),
            AuditAction::FileUploaded,
            json!({ "category": category.name, "filename": filename }),
        )
        .await?;

        tx.commit().await?;

        Ok(Upload {
            id: result.last_insert_rowid(),
            study_id,
            participant_id: participant_id.to_string(),
            category_id,
            filename: filename.to_string(),
            created_at,
        })
    }

    /// Return the stored receipt body for one consent version. Accessible to
    /// the participant it belongs to and the study owner; the download is
    /// itself audited.
    pub async fn fetch_receipt(
        &self,
        study_slug: &str,
        participant_id: &str,
        version: i64,
        actor: &Actor,
    ) -> Result<serde_json::Value> {
        let study = Queries::get_study_by_slug(self.pool(), study_slug)
            .await?
            .ok_or_else(|| ConsentError::study_not_found(study_slug))?;

        let authorized = match actor.role {
            ActorRole::Participant => actor.id == participant_id,
            ActorRole::Researcher => actor.id == study.owner_id,
            ActorRole::System => true,
        };
        if !authorized {
            return Err(ConsentError::Forbidden("receipt access denied".to_string()));
        }

        let consent = Queries::get_consent_version(self.pool(), study.id, participant_id, version)
            .await?
            .ok_or_else(|| {
                ConsentError::NotFound(format!(
                    "consent version {} not found for this participant",
                    version
                ))
            })?;

        self.chain
            .append(
                study.id,
                actor.role,
                Some(&actor.id),
                AuditAction::ReceiptDownloaded,
                json!({ "participant": participant_id, "version": version }),
            )
            .await?;

        Ok(consent.receipt_json)
    }
}
