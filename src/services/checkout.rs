//! Checkout.
//!
//! Shepherds a cart from held to owned. The provider call is the only
//! external call made while a database transaction is open; the
//! reconciliation id makes completion replayable when anything after the
//! charge fails.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::ticket::{Ticket, TicketClass, TicketTransactionRecord};
use crate::payments::PaymentProvider;
use crate::services::holds;
use crate::services::inventory;
use crate::services::notify::{Mailer, NotificationDispatcher};
use crate::utils::error::AppError;

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitiateOutcome {
    /// Every line was free; tickets were issued directly.
    SoldFreeTickets { ticket_ids: Vec<Uuid> },
    /// Paid cart; the client drives the provider's hosted UI with this.
    CaptureContext { capture_context: String },
}

#[derive(Debug, Serialize)]
pub struct CheckoutSummary {
    pub reconciliation_id: String,
    pub total_amount: Decimal,
    pub ticket_ids: Vec<Uuid>,
    /// True when this call found an existing record and issued nothing new.
    pub replayed: bool,
}

#[derive(Serialize)]
struct TicketEmailContext {
    event_name: String,
    class_name: String,
    ticket_id: String,
}

/// Cart total: per-line group discount, 2-dp money math, no compounding
/// across classes.
pub fn cart_total(lines: &[(TicketClass, i32)]) -> Decimal {
    lines
        .iter()
        .map(|(class, quantity)| class.line_total(*quantity))
        .sum::<Decimal>()
        .round_dp(2)
}

/// A replayed completion reports tickets only to the user who bought them
/// the first time.
fn replay_belongs_to(tickets: &[(Uuid, Option<Uuid>)], user_id: Uuid) -> bool {
    tickets.iter().all(|(_, owner)| *owner == Some(user_id))
}

struct LoadedCart {
    cart_id: Uuid,
    lines: Vec<(TicketClass, i32)>,
    total: Decimal,
}

/// Lock the cart and load its lines; fails on empty or stale carts.
async fn load_cart_for_checkout(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> Result<LoadedCart, AppError> {
    let now = Utc::now();
    let cart = holds::lock_cart(conn, user_id).await?;

    if holds::staleness_check(conn, cart.id, now).await? {
        return Err(AppError::Stale(
            "cart holds have expired; fetch the cart again".into(),
        ));
    }

    let rows: Vec<(Uuid, i32)> =
        sqlx::query_as("SELECT ticket_class_id, quantity FROM cart_items WHERE cart_id = $1")
            .bind(cart.id)
            .fetch_all(&mut *conn)
            .await?;
    if rows.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut lines = Vec::with_capacity(rows.len());
    for (class_id, quantity) in rows {
        let class =
            sqlx::query_as::<_, TicketClass>("SELECT * FROM ticket_classes WHERE id = $1")
                .bind(class_id)
                .fetch_one(&mut *conn)
                .await?;
        lines.push((class, quantity));
    }

    let total = cart_total(&lines);
    Ok(LoadedCart {
        cart_id: cart.id,
        lines,
        total,
    })
}

/// Insert the transaction record keyed by reconciliation id. A conflict
/// means a previous completion already ran; the existing record comes back
/// with `replayed = true`.
async fn upsert_transaction_record(
    conn: &mut PgConnection,
    reconciliation_id: &str,
    total: Decimal,
    first_name: &str,
    last_name: &str,
    email: &str,
    phone: Option<&str>,
) -> Result<(TicketTransactionRecord, bool), AppError> {
    let inserted = sqlx::query_as::<_, TicketTransactionRecord>(
        "INSERT INTO ticket_transaction_records \
         (reconciliation_id, total_amount, buyer_first_name, buyer_last_name, buyer_email, buyer_phone) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (reconciliation_id) DO NOTHING \
         RETURNING *",
    )
    .bind(reconciliation_id)
    .bind(total)
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(phone)
    .fetch_optional(&mut *conn)
    .await?;

    match inserted {
        Some(record) => Ok((record, false)),
        None => {
            let existing = sqlx::query_as::<_, TicketTransactionRecord>(
                "SELECT * FROM ticket_transaction_records WHERE reconciliation_id = $1",
            )
            .bind(reconciliation_id)
            .fetch_one(&mut *conn)
            .await?;
            Ok((existing, true))
        }
    }
}

async fn materialize_lines(
    conn: &mut PgConnection,
    lines: &[(TicketClass, i32)],
    owner_id: Option<Uuid>,
    owner_email: &str,
    record_id: Uuid,
) -> Result<Vec<Ticket>, AppError> {
    let mut tickets = Vec::new();
    for (class, quantity) in lines {
        for _ in 0..*quantity {
            tickets.push(
                inventory::materialize_ticket(conn, class, owner_id, owner_email, record_id)
                    .await?,
            );
        }
    }
    Ok(tickets)
}

async fn confirmation_contexts(
    pool: &PgPool,
    tickets: &[Ticket],
) -> Result<Vec<TicketEmailContext>, AppError> {
    let mut contexts = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        let (event_name, class_name): (String, String) = sqlx::query_as(
            "SELECT e.name, tc.name FROM ticket_classes tc \
             JOIN event_showings es ON es.id = tc.showing_id \
             JOIN events e ON e.id = es.event_id \
             WHERE tc.id = $1",
        )
        .bind(ticket.ticket_class_id)
        .fetch_one(pool)
        .await?;
        contexts.push(TicketEmailContext {
            event_name,
            class_name,
            ticket_id: ticket.id.to_string(),
        });
    }
    Ok(contexts)
}

async fn send_confirmations<M: Mailer>(
    pool: &PgPool,
    dispatcher: &NotificationDispatcher<M>,
    tickets: &[Ticket],
    recipient: &str,
) {
    // enqueued after commit; a failed email never unwinds a purchase
    match confirmation_contexts(pool, tickets).await {
        Ok(contexts) => {
            for context in contexts {
                if let Err(e) = dispatcher
                    .send(
                        "ticket_confirmation",
                        None,
                        &[recipient.to_string()],
                        &context,
                        Vec::new(),
                    )
                    .await
                {
                    tracing::error!(error = %e, "Failed to send ticket confirmation");
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to load ticket email contexts"),
    }
}

/// Begin checkout. Free-only carts take the fast path and never touch the
/// provider; paid carts get a fresh single-use capture context every call.
pub async fn initiate_checkout<P: PaymentProvider + ?Sized, M: Mailer>(
    pool: &PgPool,
    provider: &P,
    dispatcher: &NotificationDispatcher<M>,
    user_id: Uuid,
    user_email: &str,
) -> Result<InitiateOutcome, AppError> {
    let mut txn = pool.begin().await?;
    let loaded = load_cart_for_checkout(&mut txn, user_id).await?;

    if loaded.total.is_zero() {
        let reconciliation_id = format!("free-{}", Uuid::new_v4());
        let (record, _) = upsert_transaction_record(
            &mut txn,
            &reconciliation_id,
            Decimal::ZERO,
            "",
            "",
            user_email,
            None,
        )
        .await?;
        let tickets =
            materialize_lines(&mut txn, &loaded.lines, Some(user_id), user_email, record.id)
                .await?;
        holds::consume_cart(&mut txn, loaded.cart_id).await?;
        txn.commit().await?;

        tracing::info!(user = %user_id, count = tickets.len(), "Free tickets issued");
        send_confirmations(pool, dispatcher, &tickets, user_email).await;
        return Ok(InitiateOutcome::SoldFreeTickets {
            ticket_ids: tickets.iter().map(|t| t.id).collect(),
        });
    }

    // close the transaction before going to the provider
    let cart_id = loaded.cart_id;
    let total = loaded.total;
    txn.commit().await?;

    let capture_context = provider.capture_context(total).await?;
    sqlx::query("UPDATE carts SET checkout_context = $1, updated_at = now() WHERE id = $2")
        .bind(&capture_context)
        .bind(cart_id)
        .execute(pool)
        .await?;

    Ok(InitiateOutcome::CaptureContext { capture_context })
}

/// Redeem the transient token and hand the held tickets over.
///
/// Ordering: validate token, lock cart, verify holds, charge, then one
/// transaction for record + tickets + cart emptying. A replay with an
/// already-seen reconciliation id is a no-op success.
pub async fn complete_checkout<P: PaymentProvider + ?Sized, M: Mailer>(
    pool: &PgPool,
    provider: &P,
    dispatcher: &NotificationDispatcher<M>,
    user_id: Uuid,
    transient_token: &str,
) -> Result<CheckoutSummary, AppError> {
    let details = provider.validate_token(transient_token).await?;

    let mut txn = pool.begin().await?;
    let loaded = load_cart_for_checkout(&mut txn, user_id).await?;

    if loaded.total != details.amount.round_dp(2) {
        return Err(AppError::AmountMismatch {
            expected: loaded.total.to_string(),
            reported: details.amount.to_string(),
        });
    }

    // replay guard before charging again
    let existing = sqlx::query_as::<_, TicketTransactionRecord>(
        "SELECT * FROM ticket_transaction_records WHERE reconciliation_id = $1",
    )
    .bind(&details.reconciliation_id)
    .fetch_optional(&mut *txn)
    .await?;
    if let Some(record) = existing {
        let tickets: Vec<(Uuid, Option<Uuid>)> =
            sqlx::query_as("SELECT id, owner_id FROM tickets WHERE transaction_record_id = $1")
                .bind(record.id)
                .fetch_all(&mut *txn)
                .await?;
        if !replay_belongs_to(&tickets, user_id) {
            return Err(AppError::Forbidden(
                "this payment session belongs to a different purchase".into(),
            ));
        }
        // whatever the cart holds now was reserved after that purchase and
        // never materialized; the lines stay held, backed by inventory
        drop(txn);
        tracing::info!(
            reconciliation_id = %record.reconciliation_id,
            "Checkout replay; tickets already issued"
        );
        return Ok(CheckoutSummary {
            reconciliation_id: record.reconciliation_id,
            total_amount: record.total_amount,
            ticket_ids: tickets.into_iter().map(|(id, _)| id).collect(),
            replayed: true,
        });
    }

    // The cart lock is deliberately held across this call so a concurrent
    // completion cannot double-charge the same cart.
    let outcome = match provider.submit_payment(transient_token, loaded.total).await {
        Ok(outcome) => outcome,
        Err(e @ AppError::ProviderUnavailable(_)) => {
            // transient outage: keep the holds, let the client retry
            drop(txn);
            return Err(e);
        }
        Err(e) => {
            holds::clear_cart(&mut txn, loaded.cart_id).await?;
            txn.commit().await?;
            return Err(e);
        }
    };

    if !outcome.is_authorized() {
        holds::clear_cart(&mut txn, loaded.cart_id).await?;
        txn.commit().await?;
        return Err(AppError::ProviderRejected(format!(
            "payment not authorized: {}",
            outcome.status
        )));
    }

    let (record, replayed) = upsert_transaction_record(
        &mut txn,
        &outcome.reconciliation_id,
        loaded.total,
        &details.first_name,
        &details.last_name,
        &details.email,
        details.phone.as_deref(),
    )
    .await?;

    let tickets = if replayed {
        Vec::new()
    } else {
        materialize_lines(
            &mut txn,
            &loaded.lines,
            Some(user_id),
            &details.email,
            record.id,
        )
        .await?
    };
    if replayed {
        // no tickets were materialized for these lines; release them
        holds::clear_cart(&mut txn, loaded.cart_id).await?;
    } else {
        holds::consume_cart(&mut txn, loaded.cart_id).await?;
    }
    txn.commit().await?;

    tracing::info!(
        user = %user_id,
        reconciliation_id = %record.reconciliation_id,
        tickets = tickets.len(),
        "Checkout completed"
    );
    send_confirmations(pool, dispatcher, &tickets, &details.email).await;

    Ok(CheckoutSummary {
        reconciliation_id: record.reconciliation_id,
        total_amount: record.total_amount,
        ticket_ids: tickets.iter().map(|t| t.id).collect(),
        replayed,
    })
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct IssueLine {
    pub username: Option<String>,
    pub email: Option<String>,
    pub ticket_type: String,
    pub quantity: i32,
}

/// Organizer-issued tickets bypass the provider: a zero-amount synthetic
/// record, all-or-nothing across lines. Every per-line problem is collected
/// so the caller can fix the whole batch at once.
pub async fn issue_tickets(
    pool: &PgPool,
    showing_id: Uuid,
    lines: &[IssueLine],
) -> Result<Vec<Uuid>, AppError> {
    if lines.is_empty() {
        return Err(AppError::Invalid("no issuance lines supplied".into()));
    }

    let now = Utc::now();
    let mut txn = pool.begin().await?;
    let mut problems: Vec<String> = Vec::new();
    let mut resolved: Vec<(TicketClass, Option<Uuid>, String, i32)> = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if line.quantity <= 0 {
            problems.push(format!("line {index}: quantity must be positive"));
            continue;
        }

        let recipient: Option<(Option<Uuid>, String)> = match (&line.username, &line.email) {
            (Some(username), _) => {
                let user: Option<(Uuid, String)> =
                    sqlx::query_as("SELECT id, email FROM users WHERE username = $1")
                        .bind(username)
                        .fetch_optional(&mut *txn)
                        .await?;
                match user {
                    Some((id, email)) => Some((Some(id), email)),
                    None => {
                        problems.push(format!("line {index}: unknown user '{username}'"));
                        None
                    }
                }
            }
            (None, Some(email)) => Some((None, email.clone())),
            (None, None) => {
                problems.push(format!("line {index}: a username or email is required"));
                None
            }
        };

        let class = sqlx::query_as::<_, TicketClass>(
            "SELECT * FROM ticket_classes WHERE showing_id = $1 AND name = $2",
        )
        .bind(showing_id)
        .bind(&line.ticket_type)
        .fetch_optional(&mut *txn)
        .await?;
        let Some(class) = class else {
            problems.push(format!(
                "line {index}: no ticket class named '{}'",
                line.ticket_type
            ));
            continue;
        };

        if let Some((owner_id, email)) = recipient {
            match inventory::reserve(&mut txn, class.id, line.quantity, now).await {
                Ok(_) => resolved.push((class, owner_id, email, line.quantity)),
                Err(AppError::Insufficient(msg))
                | Err(AppError::Ended(msg))
                | Err(AppError::NotDropped(msg)) => {
                    problems.push(format!("line {index}: {msg}"));
                }
                Err(other) => return Err(other),
            }
        }
    }

    if !problems.is_empty() {
        // rollback drops every reservation taken above
        return Err(AppError::Invalid(problems.join("; ")));
    }

    let reconciliation_id = format!("issued-{}", Uuid::new_v4());
    let (record, _) = upsert_transaction_record(
        &mut txn,
        &reconciliation_id,
        Decimal::ZERO,
        "",
        "",
        "",
        None,
    )
    .await?;

    let mut ticket_ids = Vec::new();
    for (class, owner_id, email, quantity) in &resolved {
        for _ in 0..*quantity {
            let ticket =
                inventory::materialize_ticket(&mut txn, class, *owner_id, email, record.id)
                    .await?;
            ticket_ids.push(ticket.id);
        }
    }

    txn.commit().await?;
    tracing::info!(showing = %showing_id, count = ticket_ids.len(), "Tickets issued");
    Ok(ticket_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn class(price: Decimal, discount: Option<(Decimal, i32)>) -> TicketClass {
        TicketClass {
            id: Uuid::new_v4(),
            showing_id: Uuid::new_v4(),
            name: "normal".into(),
            price,
            quantity: 50,
            remaining: 50,
            group_discount: discount.map(|(d, _)| d),
            group_size: discount.map(|(_, s)| s),
            transferable: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn total_sums_lines_at_two_decimal_places() {
        let lines = vec![
            (class(dec!(15.00), None), 2),
            (class(dec!(9.99), None), 1),
        ];
        assert_eq!(cart_total(&lines), dec!(39.99));
    }

    #[test]
    fn group_discount_applies_per_line_only() {
        // 4 discounted normals + 1 full-price premium; the premium line is
        // below its own threshold and pays full price
        let lines = vec![
            (class(dec!(10.00), Some((dec!(0.25), 4))), 4),
            (class(dec!(20.00), Some((dec!(0.25), 4))), 1),
        ];
        assert_eq!(cart_total(&lines), dec!(50.00));
    }

    #[test]
    fn replay_is_limited_to_the_original_buyer() {
        let buyer = Uuid::new_v4();
        let tickets = vec![(Uuid::new_v4(), Some(buyer)), (Uuid::new_v4(), Some(buyer))];
        assert!(replay_belongs_to(&tickets, buyer));
        assert!(!replay_belongs_to(&tickets, Uuid::new_v4()));
    }

    #[test]
    fn free_cart_totals_zero() {
        let lines = vec![(class(dec!(0), None), 3)];
        assert_eq!(cart_total(&lines), dec!(0));
        assert!(cart_total(&lines).is_zero());
    }
}
