//! Club approval surface, membership invites, ownership requests.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::club::PublicClub;
use crate::services::approval;
use crate::services::invites;
use crate::services::perms;
use crate::utils::error::AppError;
use crate::utils::response::{created, empty_success, success};

use super::{load_club, AppState, CurrentUser, MaybeUser};

#[derive(Deserialize)]
pub struct GetClubQuery {
    #[serde(default)]
    pub bypass: bool,
}

/// GET /clubs/{code}
///
/// Non-privileged viewers of a ghosting club get its last approved
/// snapshot; pending non-ghost clubs are invisible to them.
pub async fn get_club(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(code): Path<String>,
    Query(query): Query<GetClubQuery>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;

    let privileged = perms::sees_current_row(&state.pool, user.as_ref(), &club).await?;
    if privileged || query.bypass && user.as_ref().map(|u| u.is_superuser).unwrap_or(false) {
        return Ok(success(club, "Club"));
    }

    if !club.publicly_visible() {
        return Err(AppError::NotFound(format!("club '{code}'")));
    }
    Ok(success(PublicClub::from_club(&club), "Club"))
}

#[derive(Deserialize)]
pub struct PatchClubBody {
    pub approved: Option<bool>,
    pub approved_comment: Option<String>,
    pub active: Option<bool>,
    pub archived: Option<bool>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub email: Option<String>,
}

impl PatchClubBody {
    fn non_approval_fields_present(&self) -> bool {
        self.active.is_some()
            || self.archived.is_some()
            || self.name.is_some()
            || self.description.is_some()
            || self.email.is_some()
    }
}

/// PATCH /clubs/{code}
///
/// Three distinct shapes: an approval decision (approvers only, and the
/// call may modify nothing else), an active flip (renewal/deactivation),
/// or a content edit (sensitive fields re-queue an approved club).
pub async fn patch_club(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
    axum::Json(body): axum::Json<PatchClubBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;

    if let Some(approved) = body.approved {
        if body.non_approval_fields_present() {
            return Err(AppError::Invalid(
                "an approval call may not modify other fields".into(),
            ));
        }
        let updated = approval::review(
            &state.pool,
            state.dispatcher.as_ref(),
            &user,
            &club,
            approved,
            body.approved_comment,
        )
        .await?;
        return Ok(success(updated, "Club reviewed"));
    }

    if let Some(archived) = body.archived {
        let updated = approval::set_archived(&state.pool, &user, &club, archived).await?;
        return Ok(success(updated, "Club updated"));
    }

    if let Some(active) = body.active {
        if !perms::can_manage_club(&state.pool, &user, &club).await? {
            return Err(AppError::Forbidden("only officers may update a club".into()));
        }
        let updated = if active {
            approval::renew_active(&state.pool, state.dispatcher.as_ref(), &user, &club).await?
        } else {
            sqlx::query_as::<_, crate::models::club::Club>(
                "UPDATE clubs SET active = FALSE, updated_at = now() WHERE id = $1 RETURNING *",
            )
            .bind(club.id)
            .fetch_one(&state.pool)
            .await?
        };
        return Ok(success(updated, "Club updated"));
    }

    // content edit
    if !perms::can_manage_club(&state.pool, &user, &club).await? {
        return Err(AppError::Forbidden("only officers may update a club".into()));
    }

    let mut changed: Vec<&str> = Vec::new();
    if let Some(name) = &body.name {
        sqlx::query("UPDATE clubs SET name = $2, updated_at = now() WHERE id = $1")
            .bind(club.id)
            .bind(name)
            .execute(&state.pool)
            .await?;
        changed.push("name");
    }
    if let Some(description) = &body.description {
        sqlx::query("UPDATE clubs SET description = $2, updated_at = now() WHERE id = $1")
            .bind(club.id)
            .bind(description)
            .execute(&state.pool)
            .await?;
        changed.push("description");
    }
    if let Some(email) = &body.email {
        sqlx::query("UPDATE clubs SET email = $2, updated_at = now() WHERE id = $1")
            .bind(club.id)
            .bind(email)
            .execute(&state.pool)
            .await?;
        changed.push("email");
    }

    let updated = approval::handle_sensitive_edit(&state.pool, &club, &changed).await?;
    Ok(success(updated, "Club updated"))
}

/// POST /clubs/{code}/submit
///
/// Enter (or re-enter) the approval queue.
pub async fn submit_club(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let updated = approval::submit(&state.pool, &user, &club).await?;
    Ok(success(updated, "Club submitted for review"))
}

#[derive(Deserialize)]
pub struct InviteBody {
    /// Comma- or newline-separated list.
    pub emails: String,
    pub role: i32,
    pub title: String,
}

/// POST /clubs/{code}/invite
pub async fn create_invites(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
    axum::Json(body): axum::Json<InviteBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let emails = invites::parse_email_list(&body.emails);
    let issued = invites::create_invites(
        &state.pool,
        state.dispatcher.as_ref(),
        &user,
        &club,
        &emails,
        body.role,
        &body.title,
        None,
    )
    .await?;
    Ok(created(
        serde_json::json!({ "invites": issued.len() }),
        "Invites sent",
    ))
}

#[derive(Deserialize)]
pub struct ClaimBody {
    pub token: String,
    pub public: Option<bool>,
}

/// PATCH /clubs/{code}/invites/{id}
///
/// Claim the invite with its secret token.
pub async fn claim_invite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((_code, invite_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<ClaimBody>,
) -> Result<Response, AppError> {
    let membership =
        invites::claim_invite(&state.pool, &user, &invite_id, &body.token, body.public).await?;
    Ok(success(membership, "Invite claimed"))
}

/// DELETE /clubs/{code}/invites/{id}
///
/// Rescind an unclaimed invite.
pub async fn rescind_invite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((_code, invite_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    invites::rescind_invite(&state.pool, &user, &invite_id).await?;
    Ok(empty_success("Invite rescinded"))
}

/// PUT /clubs/{code}/invites/{id}/resend
pub async fn resend_invite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((_code, invite_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    invites::resend_invite(&state.pool, state.dispatcher.as_ref(), &user, &invite_id).await?;
    Ok(empty_success("Invite resent"))
}

/// POST /clubs/{code}/request-ownership
pub async fn request_ownership(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let request =
        invites::create_ownership_request(&state.pool, state.dispatcher.as_ref(), &user, &club)
            .await?;
    Ok(created(request, "Ownership requested"))
}

#[derive(Deserialize)]
pub struct ResolveOwnershipBody {
    pub status: String,
}

/// PATCH /clubs/{code}/ownership-requests/{id}
pub async fn resolve_ownership(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((code, request_id)): Path<(String, Uuid)>,
    axum::Json(body): axum::Json<ResolveOwnershipBody>,
) -> Result<Response, AppError> {
    let club = load_club(&state.pool, &code).await?;
    let request = sqlx::query_as::<_, crate::models::invite::OwnershipRequest>(
        "SELECT * FROM ownership_requests WHERE id = $1 AND club_id = $2",
    )
    .bind(request_id)
    .bind(club.id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("ownership request {request_id}")))?;

    // requesters may withdraw their own request; owners decide the rest
    let is_requester = request.requester_id == user.id;
    if body.status == crate::models::invite::OWNERSHIP_REQUEST_WITHDRAWN {
        if !is_requester && !user.is_superuser {
            return Err(AppError::Forbidden(
                "only the requester may withdraw a request".into(),
            ));
        }
    } else {
        let membership = perms::get_membership(&state.pool, user.id, club.id).await?;
        let is_owner = membership.map(|m| m.is_owner()).unwrap_or(false);
        if !is_owner && !user.is_superuser {
            return Err(AppError::Forbidden(
                "only owners may resolve ownership requests".into(),
            ));
        }
    }

    let resolved =
        invites::resolve_ownership_request(&state.pool, request_id, &body.status).await?;
    Ok(success(resolved, "Ownership request updated"))
}
