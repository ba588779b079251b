//! Membership invites and ownership requests.
//!
//! Invites pair a short public id with a long secret token and flip inactive
//! exactly once, on claim or rescission. Ownership requests carry a 180-day
//! cooldown that withdrawn requests do not count toward.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::club::Club;
use crate::models::invite::{
    self, MembershipInvite, OwnershipRequest, OWNERSHIP_REQUEST_ACCEPTED,
    OWNERSHIP_REQUEST_PENDING, OWNERSHIP_REQUEST_WITHDRAWN,
};
use crate::models::membership::{Membership, User, ROLE_OWNER};
use crate::services::approval::owner_emails;
use crate::services::notify::{Mailer, NotificationDispatcher};
use crate::services::perms;
use crate::utils::error::AppError;

#[derive(Serialize)]
struct InviteContext {
    club_name: String,
    title: String,
    invite_id: String,
}

#[derive(Serialize)]
struct OwnershipRequestContext {
    club_name: String,
    requester: String,
}

/// Split a comma- or newline-separated address list, dropping blanks.
pub fn parse_email_list(raw: &str) -> Vec<String> {
    raw.split(|c| c == ',' || c == '\n')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Issue one invite per address. Owner-level invites get the leadership
/// welcome flow; everyone else gets the standard invite email.
pub async fn create_invites<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    actor: &User,
    club: &Club,
    emails: &[String],
    role: i32,
    title: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<Vec<MembershipInvite>, AppError> {
    let membership = perms::get_membership(pool, actor.id, club.id).await?;
    let is_officer = membership.as_ref().map(|m| m.is_officer()).unwrap_or(false);
    if !actor.is_superuser && !is_officer {
        return Err(AppError::Forbidden(
            "only officers may invite members".into(),
        ));
    }
    if emails.is_empty() {
        return Err(AppError::Invalid("no email addresses supplied".into()));
    }

    let mut created = Vec::with_capacity(emails.len());
    for email in emails {
        if !email.contains('@') {
            return Err(AppError::Invalid(format!("'{email}' is not an email address")));
        }
        let invite = sqlx::query_as::<_, MembershipInvite>(
            "INSERT INTO membership_invites (id, token, club_id, email, role, title, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(invite::generate_invite_id())
        .bind(invite::generate_invite_token())
        .bind(club.id)
        .bind(email)
        .bind(role)
        .bind(title)
        .bind(expires_at)
        .fetch_one(pool)
        .await?;

        let template = if role <= ROLE_OWNER {
            "owner_welcome"
        } else {
            "invite"
        };
        dispatcher
            .send(
                template,
                None,
                &[email.clone()],
                &InviteContext {
                    club_name: club.name.clone(),
                    title: title.to_string(),
                    invite_id: invite.id.trim().to_string(),
                },
                Vec::new(),
            )
            .await?;
        created.push(invite);
    }

    tracing::info!(club = %club.code, count = created.len(), "Invites issued");
    Ok(created)
}

/// Whether the claimant may claim this invite. University-address invites to
/// established clubs require a matching email local part.
pub fn check_claim_identity(
    invite_email: &str,
    claimant_email: &str,
    club_has_members: bool,
) -> Result<(), AppError> {
    if !invite::is_university_email(invite_email) || !club_has_members {
        return Ok(());
    }
    let invited = invite::email_local_part(invite_email);
    let claiming = invite::email_local_part(claimant_email);
    if invited.is_some() && invited == claiming {
        Ok(())
    } else {
        Err(AppError::IdentityMismatch(
            "this invite was issued to a different university address".into(),
        ))
    }
}

/// Claim an invite: verify (id, token), run the identity check, then in one
/// transaction create (or return) the membership and retire the invite.
pub async fn claim_invite(
    pool: &PgPool,
    claimant: &User,
    invite_id: &str,
    token: &str,
    public: Option<bool>,
) -> Result<Membership, AppError> {
    let now = Utc::now();
    let invite = sqlx::query_as::<_, MembershipInvite>(
        "SELECT * FROM membership_invites WHERE id = $1",
    )
    .bind(invite_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("invite {invite_id}")))?;

    if !invite.token_matches(token) {
        return Err(AppError::Forbidden("invite token does not match".into()));
    }
    if !invite.active || invite.is_expired(now) {
        return Err(AppError::Forbidden("this invite is no longer active".into()));
    }

    let (member_count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM memberships WHERE club_id = $1 AND active")
            .bind(invite.club_id)
            .fetch_one(pool)
            .await?;
    check_claim_identity(&invite.email, &claimant.email, member_count > 0)?;

    let mut txn = pool.begin().await?;

    // claim and rescission race: the first writer wins
    let retired = sqlx::query(
        "UPDATE membership_invites SET active = FALSE, updated_at = now() \
         WHERE id = $1 AND active",
    )
    .bind(invite_id)
    .execute(&mut *txn)
    .await?;
    if retired.rows_affected() == 0 {
        return Err(AppError::Forbidden("this invite is no longer active".into()));
    }

    let membership = sqlx::query_as::<_, Membership>(
        "INSERT INTO memberships (club_id, user_id, role, title, public) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (club_id, user_id) DO UPDATE SET updated_at = now() \
         RETURNING *",
    )
    .bind(invite.club_id)
    .bind(claimant.id)
    .bind(invite.role)
    .bind(&invite.title)
    .bind(public.unwrap_or(true))
    .fetch_one(&mut *txn)
    .await?;

    txn.commit().await?;
    tracing::info!(invite = invite_id, user = %claimant.username, "Invite claimed");
    Ok(membership)
}

pub async fn rescind_invite(pool: &PgPool, actor: &User, invite_id: &str) -> Result<(), AppError> {
    let invite = sqlx::query_as::<_, MembershipInvite>(
        "SELECT * FROM membership_invites WHERE id = $1",
    )
    .bind(invite_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("invite {invite_id}")))?;

    let membership = perms::get_membership(pool, actor.id, invite.club_id).await?;
    let is_officer = membership.map(|m| m.is_officer()).unwrap_or(false);
    if !actor.is_superuser && !is_officer {
        return Err(AppError::Forbidden("only officers may rescind invites".into()));
    }

    sqlx::query(
        "UPDATE membership_invites SET active = FALSE, updated_at = now() WHERE id = $1",
    )
    .bind(invite_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Re-send an active invite's email and bump `updated_at`.
pub async fn resend_invite<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    actor: &User,
    invite_id: &str,
) -> Result<(), AppError> {
    let invite = sqlx::query_as::<_, MembershipInvite>(
        "UPDATE membership_invites SET updated_at = now() \
         WHERE id = $1 AND active RETURNING *",
    )
    .bind(invite_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("active invite {invite_id}")))?;

    let membership = perms::get_membership(pool, actor.id, invite.club_id).await?;
    if !actor.is_superuser && !membership.map(|m| m.is_officer()).unwrap_or(false) {
        return Err(AppError::Forbidden("only officers may resend invites".into()));
    }

    let (club_name,): (String,) = sqlx::query_as("SELECT name FROM clubs WHERE id = $1")
        .bind(invite.club_id)
        .fetch_one(pool)
        .await?;
    let template = if invite.role <= ROLE_OWNER {
        "owner_welcome"
    } else {
        "invite"
    };
    dispatcher
        .send(
            template,
            None,
            &[invite.email.clone()],
            &InviteContext {
                club_name,
                title: invite.title.clone(),
                invite_id: invite.id.trim().to_string(),
            },
            Vec::new(),
        )
        .await?;
    Ok(())
}

/// Scheduler job: retire every invite whose expiry has passed.
pub async fn expire_stale_invites(pool: &PgPool) -> Result<u64, AppError> {
    let expired = sqlx::query(
        "UPDATE membership_invites SET active = FALSE, updated_at = now() \
         WHERE active AND expires_at IS NOT NULL AND expires_at <= now()",
    )
    .execute(pool)
    .await?
    .rows_affected();
    if expired > 0 {
        tracing::info!(expired, "Stale membership invites expired");
    }
    Ok(expired)
}

pub struct RequestEligibility {
    pub allowed: bool,
    pub reason: Option<String>,
    pub recent: Option<OwnershipRequest>,
}

/// A new request is blocked by any pending/accepted/denied request from the
/// same (user, club) within the last 180 days. Withdrawn requests never
/// block.
pub async fn can_request_ownership(
    pool: &PgPool,
    user_id: Uuid,
    club_id: Uuid,
) -> Result<RequestEligibility, AppError> {
    let now = Utc::now();
    let recent = sqlx::query_as::<_, OwnershipRequest>(
        "SELECT * FROM ownership_requests \
         WHERE requester_id = $1 AND club_id = $2 AND status <> $3 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .bind(club_id)
    .bind(OWNERSHIP_REQUEST_WITHDRAWN)
    .fetch_optional(pool)
    .await?;

    match recent {
        Some(request) if request.blocks_at(now) => Ok(RequestEligibility {
            allowed: false,
            reason: Some(format!(
                "a request from {} is still within the 180-day cooldown",
                request.created_at.date_naive()
            )),
            recent: Some(request),
        }),
        recent => Ok(RequestEligibility {
            allowed: true,
            reason: None,
            recent,
        }),
    }
}

pub async fn create_ownership_request<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    requester: &User,
    club: &Club,
) -> Result<OwnershipRequest, AppError> {
    let eligibility = can_request_ownership(pool, requester.id, club.id).await?;
    if !eligibility.allowed {
        return Err(AppError::CooldownActive(
            eligibility.reason.unwrap_or_else(|| "cooldown active".into()),
        ));
    }

    let request = sqlx::query_as::<_, OwnershipRequest>(
        "INSERT INTO ownership_requests (club_id, requester_id, status) \
         VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(club.id)
    .bind(requester.id)
    .bind(OWNERSHIP_REQUEST_PENDING)
    .fetch_one(pool)
    .await?;

    let recipients = owner_emails(pool, club.id).await?;
    dispatcher
        .send(
            "ownership_request",
            None,
            &recipients,
            &OwnershipRequestContext {
                club_name: club.name.clone(),
                requester: requester.full_name(),
            },
            Vec::new(),
        )
        .await?;

    tracing::info!(club = %club.code, requester = %requester.username, "Ownership requested");
    Ok(request)
}

/// Move a pending request to accepted, denied, or withdrawn. Acceptance
/// promotes the requester to owner.
pub async fn resolve_ownership_request(
    pool: &PgPool,
    request_id: Uuid,
    status: &str,
) -> Result<OwnershipRequest, AppError> {
    if !invite::is_resolution_status(status) {
        return Err(AppError::Invalid(format!("unknown request status '{status}'")));
    }

    let mut txn = pool.begin().await?;
    let request = sqlx::query_as::<_, OwnershipRequest>(
        "UPDATE ownership_requests SET status = $2 \
         WHERE id = $1 AND status = $3 RETURNING *",
    )
    .bind(request_id)
    .bind(status)
    .bind(OWNERSHIP_REQUEST_PENDING)
    .fetch_optional(&mut *txn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("pending ownership request {request_id}")))?;

    if status == OWNERSHIP_REQUEST_ACCEPTED {
        sqlx::query(
            "INSERT INTO memberships (club_id, user_id, role, title) \
             VALUES ($1, $2, $3, 'Owner') \
             ON CONFLICT (club_id, user_id) \
             DO UPDATE SET role = $3, active = TRUE, updated_at = now()",
        )
        .bind(request.club_id)
        .bind(request.requester_id)
        .bind(ROLE_OWNER)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commas_and_newlines() {
        let emails = parse_email_list("a@x.edu, b@x.edu\nc@x.edu\n\n");
        assert_eq!(emails, vec!["a@x.edu", "b@x.edu", "c@x.edu"]);
    }

    #[test]
    fn university_invite_to_established_club_requires_matching_local_part() {
        assert!(check_claim_identity("jdoe@upenn.edu", "jdoe@seas.upenn.edu", true).is_ok());
        assert!(matches!(
            check_claim_identity("jdoe@upenn.edu", "other@upenn.edu", true),
            Err(AppError::IdentityMismatch(_))
        ));
    }

    #[test]
    fn first_member_bypasses_identity_check() {
        assert!(check_claim_identity("jdoe@upenn.edu", "other@upenn.edu", false).is_ok());
    }

    #[test]
    fn external_addresses_bypass_identity_check() {
        assert!(check_claim_identity("jdoe@gmail.com", "other@upenn.edu", true).is_ok());
    }
}
