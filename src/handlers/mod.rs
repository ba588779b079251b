use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::Config;
use crate::models::club::Club;
use crate::models::event::EventShowing;
use crate::models::membership::User;
use crate::payments::PaymentProvider;
use crate::services::notify::{NotificationDispatcher, SmtpMailer};
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod applications;
pub mod clubs;
pub mod tickets;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub provider: Arc<dyn PaymentProvider>,
    pub dispatcher: Arc<NotificationDispatcher<SmtpMailer>>,
}

/// The authenticated caller. Session handling lives in upstream middleware,
/// which forwards the verified username in `x-authenticated-user`; this
/// extractor resolves it to a user row.
pub struct CurrentUser(pub User);

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get("x-authenticated-user")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthenticated("no authenticated user".into()))?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| AppError::Unauthenticated(format!("unknown user '{username}'")))?;
        Ok(CurrentUser(user))
    }
}

/// Same as [`CurrentUser`] but anonymous callers are allowed.
pub struct MaybeUser(pub Option<User>);

#[axum::async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(CurrentUser(user)) => Ok(MaybeUser(Some(user))),
            Err(AppError::Unauthenticated(_)) => Ok(MaybeUser(None)),
            Err(other) => Err(other),
        }
    }
}

pub async fn load_club(pool: &PgPool, code: &str) -> Result<Club, AppError> {
    sqlx::query_as::<_, Club>("SELECT * FROM clubs WHERE code = $1")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("club '{code}'")))
}

/// Load a showing, verifying it sits under the given club and event.
pub async fn load_showing(
    pool: &PgPool,
    club: &Club,
    event_id: Uuid,
    showing_id: Uuid,
) -> Result<EventShowing, AppError> {
    let showing = sqlx::query_as::<_, EventShowing>(
        "SELECT es.* FROM event_showings es \
         JOIN events e ON e.id = es.event_id \
         WHERE es.id = $1 AND es.event_id = $2 AND e.club_id = $3",
    )
    .bind(showing_id)
    .bind(event_id)
    .bind(club.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("showing {showing_id}")))?;
    Ok(showing)
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "clubhouse-api",
    };
    success(payload, "Health check successful")
}
