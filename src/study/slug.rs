//! URL-safe study slugs, unique across the store.

use sqlx::SqlitePool;

use crate::error::Result;

pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;

    for ch in title.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            slug.push(ch.to_ascii_lowercase());
            pending_dash = false;
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "study".to_string()
    } else {
        slug
    }
}

/// Derive a slug from the title, retrying with a numeric suffix until it is
/// free. Slugs are immutable once assigned.
pub async fn unique_slug(pool: &SqlitePool, title: &str) -> Result<String> {
    let base = slugify(title);
    let mut candidate = base.clone();
    let mut suffix = 2;

    loop {
        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM studies WHERE slug = ?")
            .bind(&candidate)
            .fetch_optional(pool)
            .await?;

        if taken.is_none() {
            return Ok(candidate);
        }

        candidate = format!("{}-{}", base, suffix);
        suffix += 1;
    }
}
