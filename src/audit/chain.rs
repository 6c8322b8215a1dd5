//! Hash-chain append path.
//!
//! Each entry's hash covers the previous entry's hash, the action, the
//! canonical JSON of the details payload, and the creation timestamp, so the
//! stored fields alone reproduce the chain.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::database::models::{canonical_ts, ActorRole, AuditAction, AuditEntry};
use crate::database::Database;
use crate::error::Result;

/// Append-only audit chain over the shared store.
///
/// Holds the per-study writer locks: an append reads the previous head hash
/// and inserts the new entry under the study's lock, so concurrent writers
/// cannot fork the chain.
#[derive(Clone)]
pub struct AuditChain {
    pool: SqlitePool,
    locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl AuditChain {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Writer lock for one study. Every code path that reads chain or
    /// version state and then writes must hold this across the pair.
    pub async fn study_lock(&self, study_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(study_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append one entry in its own transaction.
    pub async fn append(
        &self,
        study_id: i64,
        actor_role: ActorRole,
        actor_id: Option<&str>,
        action: AuditAction,
        details: serde_json::Value,
    ) -> Result<AuditEntry> {
        let lock = self.study_lock(study_id).await;
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        let entry = append_in_tx(&mut tx, study_id, actor_role, actor_id, action, details).await?;
        tx.commit().await?;

        Ok(entry)
    }
}

/// Append one entry inside a caller-owned transaction, so a business write
/// and its audit entry commit or roll back together. The caller must hold
/// the study lock from [`AuditChain::study_lock`].
pub async fn append_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    study_id: i64,
    actor_role: ActorRole,
    actor_id: Option<&str>,
    action: AuditAction,
    details: serde_json::Value,
) -> Result<AuditEntry> {
    let prev_hash: Option<String> = sqlx::query_scalar(
        "SELECT entry_hash FROM audit_log WHERE study_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(study_id)
    .fetch_optional(&mut **tx)
    .await?;

    let created_at = Utc::now();
    let created_raw = canonical_ts(&created_at);
    let details_json = serde_json::to_string(&details)?;
    let entry_hash = compute_entry_hash(
        prev_hash.as_deref(),
        action.as_str(),
        &details_json,
        &created_raw,
    );

    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (study_id, actor_role, actor_id, action, details,
                               prev_hash, entry_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(study_id)
    .bind(actor_role.as_str())
    .bind(actor_id)
    .bind(action.as_str())
    .bind(&details_json)
    .bind(&prev_hash)
    .bind(&entry_hash)
    .bind(&created_raw)
    .execute(&mut **tx)
    .await?;

    debug!(study_id, action = action.as_str(), "appended audit entry");

    Ok(AuditEntry {
        id: result.last_insert_rowid(),
        study_id,
        actor_role: actor_role.as_str().to_string(),
        actor_id: actor_id.map(str::to_string),
        action: action.as_str().to_string(),
        details,
        prev_hash,
        entry_hash,
        created_at,
    })
}

/// `sha256(prev_hash + action + details_json + created_at)`, hex-encoded.
/// A missing previous hash hashes as the empty string.
pub fn compute_entry_hash(
    prev_hash: Option<&str>,
    action: &str,
    details_json: &str,
    created_at: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.unwrap_or("").as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(details_json.as_bytes());
    hasher.update(created_at.as_bytes());
    hex::encode(hasher.finalize())
}
