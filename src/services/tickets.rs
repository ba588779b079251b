//! Ticket ownership operations: lookup, transfer, attendance.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::membership::User;
use crate::models::ticket::{Ticket, TicketTransferRecord};
use crate::services::notify::{Mailer, NotificationDispatcher};
use crate::services::perms;
use crate::utils::error::AppError;

#[derive(Serialize)]
struct TransferContext {
    event_name: String,
    ticket_id: String,
    sender: String,
    receiver: String,
}

pub async fn get_ticket(pool: &PgPool, ticket_id: Uuid) -> Result<Ticket, AppError> {
    sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("ticket {ticket_id}")))
}

pub async fn list_owned_tickets(pool: &PgPool, user_id: Uuid) -> Result<Vec<Ticket>, AppError> {
    let tickets = sqlx::query_as::<_, Ticket>(
        "SELECT * FROM tickets WHERE owner_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(tickets)
}

async fn owning_club_id(pool: &PgPool, ticket: &Ticket) -> Result<Uuid, AppError> {
    let (club_id,): (Uuid,) = sqlx::query_as(
        "SELECT e.club_id FROM ticket_classes tc \
         JOIN event_showings es ON es.id = tc.showing_id \
         JOIN events e ON e.id = es.event_id \
         WHERE tc.id = $1",
    )
    .bind(ticket.ticket_class_id)
    .fetch_one(pool)
    .await?;
    Ok(club_id)
}

/// Owners and officers of the selling club may see a ticket.
pub async fn can_view_ticket(pool: &PgPool, user: &User, ticket: &Ticket) -> Result<bool, AppError> {
    if user.is_superuser || ticket.owner_id == Some(user.id) {
        return Ok(true);
    }
    let club_id = owning_club_id(pool, ticket).await?;
    let membership = perms::get_membership(pool, user.id, club_id).await?;
    Ok(membership.map(|m| m.is_officer()).unwrap_or(false))
}

/// Move a ticket to another user: owner-initiated, transferable tickets
/// only, never to yourself. The transfer lands in the append-only audit log
/// and both parties are notified.
pub async fn transfer_ticket<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    sender: &User,
    ticket_id: Uuid,
    receiver_username: &str,
) -> Result<TicketTransferRecord, AppError> {
    let ticket = get_ticket(pool, ticket_id).await?;
    if ticket.owner_id != Some(sender.id) {
        return Err(AppError::Forbidden("only the owner may transfer a ticket".into()));
    }
    if !ticket.transferable {
        return Err(AppError::Forbidden("this ticket is not transferable".into()));
    }

    let receiver = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(receiver_username)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user '{receiver_username}'")))?;
    if receiver.id == sender.id {
        return Err(AppError::Invalid("cannot transfer a ticket to yourself".into()));
    }

    let mut txn = pool.begin().await?;
    sqlx::query(
        "UPDATE tickets SET owner_id = $2, owner_email = $3, attended = FALSE, \
         updated_at = now() WHERE id = $1",
    )
    .bind(ticket_id)
    .bind(receiver.id)
    .bind(&receiver.email)
    .execute(&mut *txn)
    .await?;

    let record = sqlx::query_as::<_, TicketTransferRecord>(
        "INSERT INTO ticket_transfer_records (ticket_id, sender_id, receiver_id) \
         VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(ticket_id)
    .bind(sender.id)
    .bind(receiver.id)
    .fetch_one(&mut *txn)
    .await?;
    txn.commit().await?;

    let (event_name,): (String,) = sqlx::query_as(
        "SELECT e.name FROM ticket_classes tc \
         JOIN event_showings es ON es.id = tc.showing_id \
         JOIN events e ON e.id = es.event_id \
         WHERE tc.id = $1",
    )
    .bind(ticket.ticket_class_id)
    .fetch_one(pool)
    .await?;

    if let Err(e) = dispatcher
        .send(
            "ticket_transfer",
            None,
            &[sender.email.clone(), receiver.email.clone()],
            &TransferContext {
                event_name,
                ticket_id: ticket_id.to_string(),
                sender: sender.full_name(),
                receiver: receiver.full_name(),
            },
            Vec::new(),
        )
        .await
    {
        tracing::error!(error = %e, "Transfer notification failed");
    }

    tracing::info!(ticket = %ticket_id, from = %sender.username, to = %receiver.username, "Ticket transferred");
    Ok(record)
}

/// Attendance marking by officers of the selling club.
pub async fn set_attended(
    pool: &PgPool,
    actor: &User,
    ticket_id: Uuid,
    attended: bool,
) -> Result<Ticket, AppError> {
    let ticket = get_ticket(pool, ticket_id).await?;
    let club_id = owning_club_id(pool, &ticket).await?;
    let membership = perms::get_membership(pool, actor.id, club_id).await?;
    let is_officer = membership.map(|m| m.is_officer()).unwrap_or(false);
    if !actor.is_superuser && !is_officer {
        return Err(AppError::Forbidden(
            "only officers of the organizing club may mark attendance".into(),
        ));
    }

    let updated = sqlx::query_as::<_, Ticket>(
        "UPDATE tickets SET attended = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(ticket_id)
    .bind(attended)
    .fetch_one(pool)
    .await?;
    Ok(updated)
}

/// Tickets backed by a transaction record can never be destroyed.
pub async fn delete_ticket(pool: &PgPool, actor: &User, ticket_id: Uuid) -> Result<(), AppError> {
    if !actor.is_superuser {
        return Err(AppError::Forbidden("only administrators may delete tickets".into()));
    }
    let ticket = get_ticket(pool, ticket_id).await?;
    if !ticket.is_deletable() {
        return Err(AppError::Forbidden(
            "tickets with a transaction record cannot be deleted".into(),
        ));
    }
    sqlx::query("DELETE FROM tickets WHERE id = $1")
        .bind(ticket_id)
        .execute(pool)
        .await?;
    Ok(())
}
