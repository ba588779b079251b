//! Club application surface.

use axum::extract::{Path, State};
use axum::response::Response;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::application::ClubApplication;
use crate::services::applications::{self, ApplicationParams, DecisionEmailType};
use crate::services::perms;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

use super::{load_club, AppState, CurrentUser};

async fn load_application(
    state: &AppState,
    club_id: Uuid,
    application_id: Uuid,
) -> Result<ClubApplication, AppError> {
    sqlx::query_as::<_, ClubApplication>(
        "SELECT * FROM club_applications WHERE id = $1 AND club_id = $2",
    )
    .bind(application_id)
    .bind(club_id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("application {application_id}")))
}

/// POST /clubs/{code}/applications
pub async fn create_application(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
    axum::Json(params): axum::Json<ApplicationParams>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden(
            "only officers may create applications".into(),
        ));
    }
    let application = applications::create_application(&state.pool, club.id, &params).await?;
    Ok(created(application, "Application created"))
}

/// POST /clubs/{code}/applications/{id}/clone
pub async fn clone_application(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, application_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden(
            "only officers may clone applications".into(),
        ));
    }
    load_application(&state, club.id, application_id).await?;
    let clone = applications::clone_application(&state.pool, application_id).await?;
    Ok(created(clone, "Application cloned"))
}

/// POST /clubs/{code}/applications/{id}/normalize-committees
pub async fn normalize_committees(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, application_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden(
            "only officers may normalize committees".into(),
        ));
    }
    load_application(&state, club.id, application_id).await?;
    let merged = applications::normalize_committees(&state.pool, application_id).await?;
    Ok(success(
        serde_json::json!({ "merged": merged }),
        "Committees normalized",
    ))
}

#[derive(Deserialize)]
pub struct SubmitBody {
    pub committee_id: Option<i64>,
}

/// POST /clubs/{code}/applications/{id}/submit
pub async fn submit_application(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, application_id)): Path<(String, Uuid)>,
    axum::Json(body): axum::Json<SubmitBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let application = load_application(&state, club.id, application_id).await?;
    let submission =
        applications::submit_application(&state.pool, user.id, &application, body.committee_id)
            .await?;
    Ok(created(submission, "Application submitted"))
}

#[derive(Deserialize)]
pub struct SendEmailsBody {
    pub email_type: String,
    #[serde(default)]
    pub allow_resend: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /clubs/{code}/applications/{id}/send-emails
pub async fn send_decision_emails(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, application_id)): Path<(String, Uuid)>,
    axum::Json(body): axum::Json<SendEmailsBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden(
            "only officers may send decision emails".into(),
        ));
    }
    let application = load_application(&state, club.id, application_id).await?;
    let email_type = DecisionEmailType::parse(&body.email_type)?;

    let report = applications::send_decision_emails(
        &state.pool,
        &state.config,
        state.dispatcher.as_ref(),
        &application,
        email_type,
        body.allow_resend,
        body.dry_run,
    )
    .await?;
    Ok(success(report, "Decision emails processed"))
}
