//! Audit chain verification.
//!
//! Walks a study's stored entries oldest to newest, recomputing each entry
//! hash from persisted fields and checking the prev-hash linkage. A mismatch
//! is reported as an integrity failure and never corrected in place.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::audit::chain::compute_entry_hash;
use crate::database::models::{canonical_ts, AuditEntry};
use crate::database::queries::Queries;
use crate::error::{ConsentError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub entry_count: usize,
    pub first_invalid: Option<usize>,
    pub error: Option<String>,
}

impl ChainVerification {
    fn ok(entry_count: usize) -> Self {
        Self {
            valid: true,
            entry_count,
            first_invalid: None,
            error: None,
        }
    }

    fn broken(entry_count: usize, index: usize, error: String) -> Self {
        Self {
            valid: false,
            entry_count,
            first_invalid: Some(index),
            error: Some(error),
        }
    }

    pub fn summary(&self) -> String {
        if self.valid {
            format!("✅ Audit chain is valid ({} entries)", self.entry_count)
        } else {
            format!(
                "❌ Audit chain is invalid ({} entries): {}",
                self.entry_count,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }

    /// Surface an invalid chain as an error for callers that need one.
    pub fn into_result(self) -> Result<Self> {
        if self.valid {
            Ok(self)
        } else {
            Err(ConsentError::IntegrityFailure(
                self.error.unwrap_or_else(|| "chain invalid".to_string()),
            ))
        }
    }
}

/// Verify prev-hash linkage and recompute every entry hash.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainVerification {
    for (i, entry) in entries.iter().enumerate() {
        let expected_prev = if i == 0 {
            None
        } else {
            Some(entries[i - 1].entry_hash.as_str())
        };

        if entry.prev_hash.as_deref() != expected_prev {
            return ChainVerification::broken(
                entries.len(),
                i,
                format!(
                    "prev_hash mismatch at entry {}: expected {:?}, got {:?}",
                    i, expected_prev, entry.prev_hash
                ),
            );
        }

        let details_json = match serde_json::to_string(&entry.details) {
            Ok(json) => json,
            Err(e) => {
                return ChainVerification::broken(
                    entries.len(),
                    i,
                    format!("unserializable details at entry {}: {}", i, e),
                )
            }
        };

        let recomputed = compute_entry_hash(
            entry.prev_hash.as_deref(),
            &entry.action,
            &details_json,
            &canonical_ts(&entry.created_at),
        );

        if recomputed != entry.entry_hash {
            return ChainVerification::broken(
                entries.len(),
                i,
                format!("entry_hash mismatch at entry {}", i),
            );
        }
    }

    ChainVerification::ok(entries.len())
}

/// Entries whose own hash no longer matches their stored fields.
pub fn find_tampered_entries(entries: &[AuditEntry]) -> Vec<usize> {
    let mut tampered = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        let details_json = match serde_json::to_string(&entry.details) {
            Ok(json) => json,
            Err(_) => {
                tampered.push(i);
                continue;
            }
        };

        let recomputed = compute_entry_hash(
            entry.prev_hash.as_deref(),
            &entry.action,
            &details_json,
            &canonical_ts(&entry.created_at),
        );

        if recomputed != entry.entry_hash {
            tampered.push(i);
        }
    }

    tampered
}

/// Load a study's chain from the store and verify it.
pub async fn verify_study_chain(pool: &SqlitePool, study_id: i64) -> Result<ChainVerification> {
    let entries = Queries::get_audit_entries(pool, study_id).await?;
    let report = verify_chain(&entries);

    if report.valid {
        info!(study_id, entries = report.entry_count, "audit chain verified");
    } else {
        warn!(study_id, "audit chain verification failed: {}", report.summary());
    }

    Ok(report)
}
