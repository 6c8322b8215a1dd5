//! Consent versioning engine.
//!
//! `record_decision` turns a submission into the next immutable consent
//! version for a (study, participant) pair: versions are gapless integers
//! from 1, categories are read fresh from the study at write time, and the
//! consent row, its choices, and the audit entry commit in one transaction
//! under the study's writer lock.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::info;

use crate::audit::chain::{append_in_tx, AuditChain};
use crate::consent::receipt;
use crate::database::models::{
    canonical_ts, parse_ts, ActorRole, AuditAction, Consent, DataCategory,
};
use crate::database::queries::Queries;
use crate::database::Database;
use crate::error::{ConsentError, Result};

/// One submitted allow/deny choice. Choices referencing categories that do
/// not belong to the study are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDecision {
    pub category_id: i64,
    pub allowed: bool,
}

#[derive(Clone)]
pub struct ConsentEngine {
    database: Database,
    chain: AuditChain,
}

impl ConsentEngine {
    pub fn new(database: Database, chain: AuditChain) -> Self {
        Self { database, chain }
    }

    fn pool(&self) -> &SqlitePool {
        self.database.pool()
    }

    /// Record a new consent version. `required` categories are forced to
    /// allowed; a withdrawal forces every choice to denied and stamps
    /// `withdrawn_at`. Prior versions are never modified.
    pub async fn record_decision(
        &self,
        study_id: i64,
        participant_id: &str,
        decisions: &[CategoryDecision],
        is_withdrawal: bool,
    ) -> Result<Consent> {
        let study = Queries::get_study(self.pool(), study_id)
            .await?
            .ok_or_else(|| ConsentError::NotFound(format!("study {} not found", study_id)))?;

        let lock = self.chain.study_lock(study_id).await;
        let _guard = lock.lock().await;

        let categories = Queries::get_categories(self.pool(), study_id).await?;

        let submitted: HashMap<i64, bool> = decisions
            .iter()
            .map(|d| (d.category_id, d.allowed))
            .collect();

        let effective: Vec<(&DataCategory, bool)> = categories
            .iter()
            .map(|category| {
                let allowed = if is_withdrawal {
                    false
                } else if category.required {
                    true
                } else {
                    submitted.get(&category.id).copied().unwrap_or(false)
                };
                (category, allowed)
            })
            .collect();

        let granted = effective.iter().any(|(_, allowed)| *allowed);

        let mut tx = self.pool().begin().await?;

        let max_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM consents WHERE study_id = ? AND participant_id = ?",
        )
        .bind(study_id)
        .bind(participant_id)
        .fetch_one(&mut *tx)
        .await?;
        let version = max_version + 1;

        let now = Utc::now();
        let effective_at = canonical_ts(&now);
        let withdrawal = if is_withdrawal {
            Some(effective_at.clone())
        } else {
            None
        };

        let named: Vec<(String, bool)> = effective
            .iter()
            .map(|(category, allowed)| (category.name.clone(), *allowed))
            .collect();

        let (receipt_json, receipt_hash) = receipt::build_receipt(
            &study,
            participant_id,
            version,
            &named,
            &effective_at,
            withdrawal.as_deref(),
        )?;

        let receipt_raw = serde_json::to_string(&receipt_json)?;

        let result = sqlx::query(
            r#"
            INSERT INTO consents (study_id, participant_id, version, granted, withdrawn_at,
                                  receipt_hash, receipt_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(study_id)
        .bind(participant_id)
        .bind(version)
        .bind(granted)
        .bind(&withdrawal)
        .bind(&receipt_hash)
        .bind(&receipt_raw)
        .bind(&effective_at)
        .execute(&mut *tx)
        .await?;

        let consent_id = result.last_insert_rowid();

        for (category, allowed) in &effective {
            sqlx::query(
                "INSERT INTO consent_choices (consent_id, category_id, allowed) VALUES (?, ?, ?)",
            )
            .bind(consent_id)
            .bind(category.id)
            .bind(allowed)
            .execute(&mut *tx)
            .await?;
        }

        let action = if is_withdrawal {
            AuditAction::Withdrawn
        } else if version == 1 {
            AuditAction::ConsentGiven
        } else {
            AuditAction::ConsentEdited
        };

        append_in_tx(
            &mut tx,
            study_id,
            ActorRole::Participant,
            Some(participant_id),
            action,
            json!({ "version": version, "granted": granted }),
        )
        .await?;

        tx.commit().await?;

        info!(
            study_id,
            participant_id,
            version,
            granted,
            withdrawal = is_withdrawal,
            "recorded consent version"
        );

        Ok(Consent {
            id: consent_id,
            study_id,
            participant_id: participant_id.to_string(),
            version,
            granted,
            withdrawn_at: withdrawal.as_deref().map(parse_ts).transpose()?,
            receipt_hash,
            receipt_json,
            created_at: now,
        })
    }

    /// Withdraw: a new all-denied version with `withdrawn_at` set.
    pub async fn withdraw(&self, study_id: i64, participant_id: &str) -> Result<Consent> {
        self.record_decision(study_id, participant_id, &[], true)
            .await
    }

    pub async fn current_consent(
        &self,
        study_id: i64,
        participant_id: &str,
    ) -> Result<Option<Consent>> {
        Queries::get_current_consent(self.pool(), study_id, participant_id).await
    }

    /// Gate input for upload acceptance: true iff the category belongs to
    /// the study and is either required or allowed by the participant's
    /// current consent version.
    pub async fn category_allowed(
        &self,
        study_id: i64,
        participant_id: &str,
        category_id: i64,
    ) -> Result<bool> {
        let categories = Queries::get_categories(self.pool(), study_id).await?;
        let category = match categories.iter().find(|c| c.id == category_id) {
            Some(category) => category,
            None => return Ok(false),
        };

        if category.required {
            return Ok(true);
        }

        let current = Queries::get_current_consent(self.pool(), study_id, participant_id).await?;
        let consent = match current {
            Some(consent) => consent,
            None => return Ok(false),
        };

        let choices = Queries::get_choices(self.pool(), consent.id).await?;
        Ok(choices
            .iter()
            .any(|choice| choice.category_id == category_id && choice.allowed))
    }
}
