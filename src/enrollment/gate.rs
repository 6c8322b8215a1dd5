//! Enrollment gate.
//!
//! Admission: draft studies are invisible, public studies admit anyone,
//! invite studies with a configured code demand a matching code. Enrolling
//! an already-enrolled participant is a no-op success.

use chrono::Utc;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::audit::chain::{append_in_tx, AuditChain};
use crate::database::models::{canonical_ts, ActorRole, AuditAction, Enrollment, StudyStatus};
use crate::database::queries::Queries;
use crate::database::Database;
use crate::error::{ConsentError, Result};
use crate::enrollment::join_code;

#[derive(Clone)]
pub struct EnrollmentGate {
    database: Database,
    chain: AuditChain,
}

impl EnrollmentGate {
    pub fn new(database: Database, chain: AuditChain) -> Self {
        Self { database, chain }
    }

    fn pool(&self) -> &SqlitePool {
        self.database.pool()
    }

    /// Admit a participant into a study, idempotently.
    pub async fn join(
        &self,
        study_id: i64,
        participant_id: &str,
        supplied_code: Option<&str>,
    ) -> Result<Enrollment> {
        let study = Queries::get_study(self.pool(), study_id)
            .await?
            .ok_or_else(|| ConsentError::NotFound(format!("study {} not found", study_id)))?;

        match study.status {
            StudyStatus::Draft => {
                return Err(ConsentError::NotFound(format!(
                    "study '{}' is not open for enrollment",
                    study.slug
                )));
            }
            StudyStatus::Public => {}
            StudyStatus::Invite => {
                if let Some(configured) = study.join_code.as_deref() {
                    if !configured.is_empty()
                        && !join_code::matches(configured, supplied_code.unwrap_or(""))
                    {
                        warn!(study_id, participant_id, "join rejected: bad code");
                        return Err(ConsentError::invalid_join_code());
                    }
                }
            }
        }

        let lock = self.chain.study_lock(study_id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO enrollments (study_id, participant_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (study_id, participant_id) DO NOTHING
            "#,
        )
        .bind(study_id)
        .bind(participant_id)
        .bind(canonical_ts(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        let newly_enrolled = result.rows_affected() > 0;
        if newly_enrolled {
            append_in_tx(
                &mut tx,
                study_id,
                ActorRole::Participant,
                Some(participant_id),
                AuditAction::Enrolled,
                json!({}),
            )
            .await?;
        }

        tx.commit().await?;

        if newly_enrolled {
            info!(study_id, participant_id, "participant enrolled");
        }

        Queries::get_enrollment(self.pool(), study_id, participant_id)
            .await?
            .ok_or_else(|| ConsentError::Database("enrollment row missing after upsert".to_string()))
    }

    /// Unconditional removal of the membership row. Consent history and the
    /// audit chain are untouched.
    pub async fn unenroll(&self, study_id: i64, participant_id: &str) -> Result<()> {
        Queries::get_study(self.pool(), study_id)
            .await?
            .ok_or_else(|| ConsentError::NotFound(format!("study {} not found", study_id)))?;

        let lock = self.chain.study_lock(study_id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool().begin().await?;

        let result = sqlx::query(
            "DELETE FROM enrollments WHERE study_id = ? AND participant_id = ?",
        )
        .bind(study_id)
        .bind(participant_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            append_in_tx(
                &mut tx,
                study_id,
                ActorRole::Participant,
                Some(participant_id),
                AuditAction::Unenrolled,
                json!({}),
            )
            .await?;
        }

        tx.commit().await?;

        info!(study_id, participant_id, "participant unenrolled");
        Ok(())
    }
}
