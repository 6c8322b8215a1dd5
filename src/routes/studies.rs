//! Researcher-facing study routes.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde_json::{json, Value};

use crate::audit::verify::verify_study_chain;
use crate::database::models::{ActorRole, DataCategory, Study, StudyStatus};
use crate::database::queries::Queries;
use crate::error::ConsentError;
use crate::routes::{actor_from_headers, reject, require_role, AppState};
use crate::study::StudyInput;

/// Join codes are only shown to the study owner.
fn study_json(study: &Study, include_code: bool) -> Value {
    let mut body = json!({
        "id": study.id,
        "slug": study.slug,
        "title": study.title,
        "summary": study.summary,
        "purpose": study.purpose,
        "contact": study.contact,
        "status": study.status,
        "retention_default_days": study.retention_default_days,
        "owner_id": study.owner_id,
        "created_at": study.created_at,
        "updated_at": study.updated_at,
    });

    if include_code {
        body["join_code"] = json!(study.join_code);
    }

    body
}

fn categories_json(categories: &[DataCategory]) -> Value {
    json!(categories)
}

pub async fn create_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<StudyInput>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Researcher).map_err(reject)?;

    let study = state
        .studies
        .create_study(&actor.id, input)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "study": study_json(&study, true) })))
}

pub async fn get_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;

    let (study, categories) = state
        .studies
        .get_study_for_render(&slug)
        .await
        .map_err(reject)?;

    let is_owner = actor.role == ActorRole::Researcher && actor.id == study.owner_id;
    if study.status == StudyStatus::Draft && !is_owner {
        return Err(reject(ConsentError::study_not_found(&slug)));
    }

    Ok(Json(json!({
        "study": study_json(&study, is_owner),
        "categories": categories_json(&categories),
    })))
}

pub async fn update_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(input): Json<StudyInput>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Researcher).map_err(reject)?;

    let study = state
        .studies
        .update_study(&actor.id, &slug, input)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "study": study_json(&study, true) })))
}

pub async fn delete_study(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Researcher).map_err(reject)?;

    state
        .studies
        .delete_study(&actor.id, &slug)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "status": "deleted" })))
}

pub async fn regenerate_join_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Researcher).map_err(reject)?;

    let code = state
        .studies
        .regenerate_join_code(&actor.id, &slug)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "join_code": code })))
}

async fn owned_study(
    state: &AppState,
    headers: &HeaderMap,
    slug: &str,
) -> Result<Study, StatusCode> {
    let actor = actor_from_headers(headers).map_err(reject)?;
    require_role(&actor, ActorRole::Researcher).map_err(reject)?;

    let study = Queries::get_study_by_slug(state.database.pool(), slug)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ConsentError::study_not_found(slug)))?;

    if study.owner_id != actor.id {
        return Err(reject(ConsentError::not_owner()));
    }

    Ok(study)
}

pub async fn list_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let study = owned_study(&state, &headers, &slug).await?;

    let entries = Queries::get_audit_entries(state.database.pool(), study.id)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "entries": entries })))
}

pub async fn verify_audit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let study = owned_study(&state, &headers, &slug).await?;

    let report = verify_study_chain(state.database.pool(), study.id)
        .await
        .map_err(reject)?;

    Ok(Json(json!({
        "summary": report.summary(),
        "report": report,
    })))
}
