//! Consent receipts.
//!
//! The receipt body is canonical JSON (serde_json serializes object keys in
//! sorted order); its hash is computed over the body without the hash field
//! and then embedded alongside it, so every stored receipt is self-verifying.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::database::models::Study;
use crate::error::Result;

pub const RECEIPT_SCHEMA: &str = "consent-receipt/v1";

/// Build the receipt body for one consent version and return it together
/// with its `sha256:`-prefixed hash. The returned body already embeds the
/// hash under `receipt_hash`.
pub fn build_receipt(
    study: &Study,
    participant_id: &str,
    version: i64,
    decisions: &[(String, bool)],
    effective_at: &str,
    withdrawal: Option<&str>,
) -> Result<(Value, String)> {
    let decision_list: Vec<Value> = decisions
        .iter()
        .map(|(category, allowed)| json!({ "category": category, "allowed": allowed }))
        .collect();

    let mut body = json!({
        "schema": RECEIPT_SCHEMA,
        "study": {
            "slug": study.slug,
            "title": study.title,
            "contact": study.contact,
        },
        "participant": participant_id,
        "version": version,
        "decisions": decision_list,
        "retention_days": study.retention_default_days,
        "effective_at": effective_at,
        "withdrawal": withdrawal,
    });

    let hash = receipt_hash(&body)?;
    body["receipt_hash"] = Value::String(hash.clone());

    Ok((body, hash))
}

/// `"sha256:" + hex(sha256(canonical JSON))` over a body that must not
/// contain the `receipt_hash` field.
pub fn receipt_hash(body: &Value) -> Result<String> {
    let canonical = serde_json::to_string(body)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
}

/// Recompute the hash from the stored body, excluding the hash field, and
/// compare against the embedded value.
pub fn verify_receipt(receipt: &Value) -> bool {
    let obj = match receipt.as_object() {
        Some(obj) => obj,
        None => return false,
    };

    let stored = match obj.get("receipt_hash").and_then(Value::as_str) {
        Some(hash) => hash,
        None => return false,
    };

    let mut body = obj.clone();
    body.remove("receipt_hash");

    match receipt_hash(&Value::Object(body)) {
        Ok(recomputed) => recomputed == stored,
        Err(_) => false,
    }
}
