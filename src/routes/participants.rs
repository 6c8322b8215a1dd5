//! Participant-facing routes: enrollment, consent, withdrawal, receipts,
//! uploads.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::consent::CategoryDecision;
use crate::database::models::{Actor, ActorRole, Study};
use crate::database::queries::Queries;
use crate::error::ConsentError;
use crate::routes::{actor_from_headers, reject, require_role, AppState};

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    #[serde(default)]
    pub join_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConsentSubmission {
    pub decisions: Vec<CategoryDecision>,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub category_id: i64,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct ParticipantQuery {
    #[serde(default)]
    pub participant: Option<String>,
}

async fn study_by_slug(state: &AppState, slug: &str) -> Result<Study, StatusCode> {
    Queries::get_study_by_slug(state.database.pool(), slug)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ConsentError::study_not_found(slug)))
}

/// Resolve which participant a read is about: participants read their own
/// records, the study owner may name one via `?participant=`.
fn resolve_participant(
    actor: &Actor,
    study: &Study,
    query: &ParticipantQuery,
) -> Result<String, StatusCode> {
    match actor.role {
        ActorRole::Participant => Ok(actor.id.clone()),
        ActorRole::Researcher => {
            if actor.id != study.owner_id {
                return Err(reject(ConsentError::not_owner()));
            }
            query.participant.clone().ok_or_else(|| {
                reject(ConsentError::InvalidInput(
                    "missing participant query parameter".to_string(),
                ))
            })
        }
        ActorRole::System => query.participant.clone().ok_or_else(|| {
            reject(ConsentError::InvalidInput(
                "missing participant query parameter".to_string(),
            ))
        }),
    }
}

pub async fn enroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(request): Json<EnrollRequest>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Participant).map_err(reject)?;

    let study = study_by_slug(&state, &slug).await?;

    let enrollment = state
        .gate
        .join(study.id, &actor.id, request.join_code.as_deref())
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "enrollment": enrollment })))
}

pub async fn unenroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Participant).map_err(reject)?;

    let study = study_by_slug(&state, &slug).await?;

    state
        .gate
        .unenroll(study.id, &actor.id)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "status": "unenrolled" })))
}

pub async fn submit_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(submission): Json<ConsentSubmission>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Participant).map_err(reject)?;

    let study = study_by_slug(&state, &slug).await?;

    let consent = state
        .engine
        .record_decision(study.id, &actor.id, &submission.decisions, false)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "consent": consent })))
}

pub async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Participant).map_err(reject)?;

    let study = study_by_slug(&state, &slug).await?;

    let consent = state
        .engine
        .withdraw(study.id, &actor.id)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "consent": consent })))
}

pub async fn current_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Query(query): Query<ParticipantQuery>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    let study = study_by_slug(&state, &slug).await?;
    let participant_id = resolve_participant(&actor, &study, &query)?;

    let consent = state
        .engine
        .current_consent(study.id, &participant_id)
        .await
        .map_err(reject)?;

    let body = match consent {
        Some(consent) => {
            let choices = Queries::get_choices(state.database.pool(), consent.id)
                .await
                .map_err(reject)?;
            json!({ "consent": consent, "choices": choices })
        }
        None => json!({ "consent": null }),
    };

    Ok(Json(body))
}

pub async fn get_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((slug, version)): Path<(String, i64)>,
    Query(query): Query<ParticipantQuery>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    let study = study_by_slug(&state, &slug).await?;
    let participant_id = resolve_participant(&actor, &study, &query)?;

    let receipt = state
        .studies
        .fetch_receipt(&slug, &participant_id, version, &actor)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "receipt": receipt })))
}

pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<Json<Value>, StatusCode> {
    let actor = actor_from_headers(&headers).map_err(reject)?;
    require_role(&actor, ActorRole::Participant).map_err(reject)?;

    let study = study_by_slug(&state, &slug).await?;

    let upload = state
        .studies
        .record_upload(study.id, &actor.id, request.category_id, &request.filename)
        .await
        .map_err(reject)?;

    Ok(Json(json!({ "upload": upload })))
}
