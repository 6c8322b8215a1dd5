//! HTTP surface. Handlers are thin: resolve the trusted actor identity from
//! headers, call a core service, map the error taxonomy to a status code.

pub mod participants;
pub mod studies;

use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::{extract::State, Router};
use tracing::warn;

use crate::audit::AuditChain;
use crate::config::AppConfig;
use crate::consent::ConsentEngine;
use crate::database::models::{Actor, ActorRole};
use crate::database::Database;
use crate::enrollment::EnrollmentGate;
use crate::error::{ConsentError, Result};
use crate::study::StudyService;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub database: Database,
    pub chain: AuditChain,
    pub engine: ConsentEngine,
    pub gate: EnrollmentGate,
    pub studies: StudyService,
}

impl AppState {
    pub fn new(config: AppConfig, database: Database) -> Self {
        let chain = AuditChain::new(&database);
        let engine = ConsentEngine::new(database.clone(), chain.clone());
        let gate = EnrollmentGate::new(database.clone(), chain.clone());
        let studies = StudyService::new(
            database.clone(),
            chain.clone(),
            engine.clone(),
            config.retention_default_days,
        );

        Self {
            config,
            database,
            chain,
            engine,
            gate,
            studies,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .route("/studies", post(studies::create_study))
        .route(
            "/studies/:slug",
            get(studies::get_study)
                .put(studies::update_study)
                .delete(studies::delete_study),
        )
        .route("/studies/:slug/join-code", post(studies::regenerate_join_code))
        .route("/studies/:slug/audit", get(studies::list_audit))
        .route("/studies/:slug/audit/verify", get(studies::verify_audit))
        .route(
            "/studies/:slug/enroll",
            post(participants::enroll).delete(participants::unenroll),
        )
        .route(
            "/studies/:slug/consent",
            post(participants::submit_consent).get(participants::current_consent),
        )
        .route("/studies/:slug/withdraw", post(participants::withdraw))
        .route("/studies/:slug/receipts/:version", get(participants::get_receipt))
        .route("/studies/:slug/uploads", post(participants::upload))
        .with_state(state)
}

/// Identity arrives pre-verified from the external identity layer; the core
/// trusts these headers completely and performs no authentication itself.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor> {
    let id = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConsentError::InvalidInput("missing X-Actor-Id header".to_string()))?;

    let role = headers
        .get("x-actor-role")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ConsentError::InvalidInput("missing X-Actor-Role header".to_string()))?;

    Ok(Actor {
        id: id.to_string(),
        role: ActorRole::parse(role.trim())?,
    })
}

pub fn require_role(actor: &Actor, role: ActorRole) -> Result<()> {
    if actor.role == role {
        Ok(())
    } else {
        Err(ConsentError::Forbidden(format!(
            "action requires {} role",
            role.as_str()
        )))
    }
}

pub fn error_status(err: &ConsentError) -> StatusCode {
    match err {
        ConsentError::NotFound(_) => StatusCode::NOT_FOUND,
        ConsentError::Forbidden(_) => StatusCode::FORBIDDEN,
        ConsentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ConsentError::Conflict(_) => StatusCode::CONFLICT,
        ConsentError::IntegrityFailure(_)
        | ConsentError::Database(_)
        | ConsentError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn reject(err: ConsentError) -> StatusCode {
    warn!("request failed: {}", err);
    error_status(&err)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "consent-app",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, StatusCode> {
    let study_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM studies")
        .fetch_one(state.database.pool())
        .await
        .map_err(|e| reject(e.into()))?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": "consent-app",
        "timestamp": chrono::Utc::now(),
        "studies": study_count,
    })))
}
