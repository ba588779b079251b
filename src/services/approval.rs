//! Club approval lifecycle.
//!
//! Clubs cycle through pending, approved, rejected, inactive, and ghost
//! states. The yearly sweep deactivates everything; re-approval runs through
//! queues that open and close on a schedule. A club that was ever approved
//! keeps its last approved snapshot publicly visible while under re-review.

use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::club::Club;
use crate::models::membership::{User, ROLE_OWNER};
use crate::models::settings::{RegistrationQueueSettings, QUEUE_SETTINGS_ID};
use crate::services::notify::{Mailer, NotificationDispatcher};
use crate::services::perms;
use crate::utils::error::AppError;

#[derive(Serialize)]
struct DecisionContext {
    club_name: String,
    decision: String,
    comment: String,
}

#[derive(Serialize)]
struct ClubContext {
    club_name: String,
}

pub async fn queue_settings(pool: &PgPool) -> Result<RegistrationQueueSettings, AppError> {
    let settings = sqlx::query_as::<_, RegistrationQueueSettings>(
        "SELECT * FROM registration_queue_settings WHERE id = $1",
    )
    .bind(QUEUE_SETTINGS_ID)
    .fetch_one(pool)
    .await?;
    Ok(settings)
}

pub async fn has_approval_history(pool: &PgPool, club_id: Uuid) -> Result<bool, AppError> {
    let (exists,): (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM club_approval_history WHERE club_id = $1 AND approved)",
    )
    .bind(club_id)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

/// Which queue a club submits into, and whether that queue is open.
pub fn check_queue_open(
    settings: &RegistrationQueueSettings,
    ever_approved: bool,
) -> Result<(), AppError> {
    let open = if ever_approved {
        settings.reapproval_queue_open
    } else {
        settings.new_approval_queue_open
    };
    if open {
        Ok(())
    } else if ever_approved {
        Err(AppError::QueueClosed(
            "the re-approval queue is not currently open".into(),
        ))
    } else {
        Err(AppError::QueueClosed(
            "the new club approval queue is not currently open".into(),
        ))
    }
}

/// Submit (or resubmit) for review. A no-op when already pending.
pub async fn submit(pool: &PgPool, user: &User, club: &Club) -> Result<Club, AppError> {
    if !perms::can_manage_club(pool, user, club).await? {
        return Err(AppError::Forbidden(
            "only officers may submit a club for review".into(),
        ));
    }
    if club.is_pending() && club.active {
        return Ok(club.clone());
    }

    let ever_approved = has_approval_history(pool, club.id).await?;
    check_queue_open(&queue_settings(pool).await?, ever_approved)?;

    let updated = sqlx::query_as::<_, Club>(
        "UPDATE clubs SET approved = NULL, approved_by = NULL, approved_comment = NULL, \
         active = TRUE, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(club.id)
    .fetch_one(pool)
    .await?;
    tracing::info!(club = %club.code, "Club submitted for review");
    Ok(updated)
}

/// Apply an edit to an approved club. Touched sensitive fields send it back
/// to the queue; prior approval keeps the old version publicly visible.
pub async fn handle_sensitive_edit(
    pool: &PgPool,
    club: &Club,
    changed_fields: &[&str],
) -> Result<Club, AppError> {
    let sensitive_touched = changed_fields
        .iter()
        .any(|f| crate::models::club::SENSITIVE_FIELDS.contains(f));
    if !sensitive_touched || club.approved != Some(true) {
        // the caller's edits already ran; hand back the current row, not
        // the pre-edit snapshot it loaded
        let current = sqlx::query_as::<_, Club>("SELECT * FROM clubs WHERE id = $1")
            .bind(club.id)
            .fetch_one(pool)
            .await?;
        return Ok(current);
    }

    let ever_approved = has_approval_history(pool, club.id).await?;
    let updated = sqlx::query_as::<_, Club>(
        "UPDATE clubs SET approved = NULL, approved_by = NULL, ghost = $2, updated_at = now() \
         WHERE id = $1 RETURNING *",
    )
    .bind(club.id)
    .bind(ever_approved)
    .fetch_one(pool)
    .await?;
    tracing::info!(club = %club.code, ghost = ever_approved, "Sensitive edit; club re-queued");
    Ok(updated)
}

/// Reviewer decision. Approval records the reviewer, snapshots the approved
/// content, and clears the ghost flag; either way the club is notified.
pub async fn review<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    reviewer: &User,
    club: &Club,
    approved: bool,
    comment: Option<String>,
) -> Result<Club, AppError> {
    if !perms::can_approve_clubs(reviewer) {
        return Err(AppError::Forbidden(
            "approval permission is required to review clubs".into(),
        ));
    }
    if club.approved.is_some() {
        return Err(AppError::Invalid(
            "club is not in the review queue".into(),
        ));
    }

    let mut txn = pool.begin().await?;
    let updated = if approved {
        sqlx::query_as::<_, Club>(
            "UPDATE clubs SET approved = TRUE, approved_by = $2, approved_at = $3, \
             approved_comment = $4, ghost = FALSE, \
             approved_name = name, approved_description = description, \
             updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(club.id)
        .bind(reviewer.id)
        .bind(Utc::now())
        .bind(&comment)
        .fetch_one(&mut *txn)
        .await?
    } else {
        sqlx::query_as::<_, Club>(
            "UPDATE clubs SET approved = FALSE, approved_by = $2, approved_comment = $3, \
             updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(club.id)
        .bind(reviewer.id)
        .bind(&comment)
        .fetch_one(&mut *txn)
        .await?
    };

    sqlx::query(
        "INSERT INTO club_approval_history (club_id, approved, approved_by) VALUES ($1, $2, $3)",
    )
    .bind(club.id)
    .bind(approved)
    .bind(reviewer.id)
    .execute(&mut *txn)
    .await?;
    txn.commit().await?;

    let recipients = owner_emails(pool, club.id).await?;
    dispatcher
        .send(
            "approval_decision",
            None,
            &recipients,
            &DecisionContext {
                club_name: updated.name.clone(),
                decision: if approved { "approved" } else { "rejected" }.into(),
                comment: updated.approved_comment.clone().unwrap_or_default(),
            },
            Vec::new(),
        )
        .await?;

    tracing::info!(club = %club.code, approved, reviewer = %reviewer.username, "Club reviewed");
    Ok(updated)
}

/// Yearly sweep: deactivate every club and re-queue it; ever-approved clubs
/// ghost so their public listing survives re-review.
pub async fn deactivate_all<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    send_emails: bool,
) -> Result<u64, AppError> {
    let affected = sqlx::query(
        "UPDATE clubs SET active = FALSE, approved = NULL, approved_by = NULL, \
         ghost = EXISTS(SELECT 1 FROM club_approval_history h \
                        WHERE h.club_id = clubs.id AND h.approved), \
         updated_at = now() \
         WHERE NOT archived",
    )
    .execute(pool)
    .await?
    .rows_affected();

    tracing::info!(affected, "Yearly deactivation sweep complete");

    if send_emails {
        let clubs: Vec<(Uuid, String)> =
            sqlx::query_as("SELECT id, name FROM clubs WHERE NOT archived")
                .fetch_all(pool)
                .await?;
        for (club_id, club_name) in clubs {
            let recipients = owner_emails(pool, club_id).await?;
            if let Err(e) = dispatcher
                .send(
                    "deactivation_notice",
                    None,
                    &recipients,
                    &ClubContext {
                        club_name: club_name.clone(),
                    },
                    Vec::new(),
                )
                .await
            {
                tracing::error!(error = %e, club = %club_name, "Deactivation notice failed");
            }
        }
    }

    Ok(affected)
}

/// Owner marks the club active for the new year.
pub async fn renew_active<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    user: &User,
    club: &Club,
) -> Result<Club, AppError> {
    if !perms::can_manage_club(pool, user, club).await? {
        return Err(AppError::Forbidden("only officers may renew a club".into()));
    }

    let updated = sqlx::query_as::<_, Club>(
        "UPDATE clubs SET active = TRUE, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(club.id)
    .fetch_one(pool)
    .await?;

    dispatcher
        .send(
            "renewal_confirmation",
            None,
            &[user.email.clone()],
            &ClubContext {
                club_name: updated.name.clone(),
            },
            Vec::new(),
        )
        .await?;
    Ok(updated)
}

pub async fn set_archived(
    pool: &PgPool,
    user: &User,
    club: &Club,
    archived: bool,
) -> Result<Club, AppError> {
    if !user.is_superuser {
        return Err(AppError::Forbidden(
            "only administrators may archive clubs".into(),
        ));
    }
    let updated = sqlx::query_as::<_, Club>(
        "UPDATE clubs SET archived = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(club.id)
    .bind(archived)
    .fetch_one(pool)
    .await?;
    Ok(updated)
}

/// Emails of the club's active owners.
pub async fn owner_emails(pool: &PgPool, club_id: Uuid) -> Result<Vec<String>, AppError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT u.email FROM memberships m \
         JOIN users u ON u.id = m.user_id \
         WHERE m.club_id = $1 AND m.active AND m.role <= $2",
    )
    .bind(club_id)
    .bind(ROLE_OWNER)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(e,)| e).collect())
}

/// Count of clubs awaiting review; drives the weekday reviewer reminder.
pub async fn pending_count(pool: &PgPool) -> Result<i64, AppError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM clubs WHERE approved IS NULL AND active AND NOT archived",
    )
    .fetch_one(pool)
    .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(reapproval: bool, new: bool) -> RegistrationQueueSettings {
        RegistrationQueueSettings {
            id: QUEUE_SETTINGS_ID,
            reapproval_queue_open: reapproval,
            new_approval_queue_open: new,
            reapproval_queue_open_at: None,
            new_approval_queue_open_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn new_clubs_use_the_new_queue() {
        assert!(check_queue_open(&settings(false, true), false).is_ok());
        assert!(matches!(
            check_queue_open(&settings(true, false), false),
            Err(AppError::QueueClosed(_))
        ));
    }

    #[test]
    fn previously_approved_clubs_use_the_reapproval_queue() {
        assert!(check_queue_open(&settings(true, false), true).is_ok());
        assert!(matches!(
            check_queue_open(&settings(false, true), true),
            Err(AppError::QueueClosed(_))
        ));
    }
}
