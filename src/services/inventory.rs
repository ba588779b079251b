//! Ticket inventory.
//!
//! `TicketClass.remaining` is the authoritative availability count. Every
//! decrement and increment happens under a `FOR UPDATE` row lock on the
//! class, so concurrent buyers observe a total order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::models::event::EventShowing;
use crate::models::ticket::{Ticket, TicketClass};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketClassDefinition {
    pub name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub group_discount: Option<Decimal>,
    pub group_size: Option<i32>,
    #[serde(default = "default_transferable")]
    pub transferable: bool,
}

fn default_transferable() -> bool {
    true
}

pub fn validate_definitions(definitions: &[TicketClassDefinition]) -> Result<(), AppError> {
    let mut seen = std::collections::HashSet::new();
    for def in definitions {
        if def.name.trim().is_empty() {
            return Err(AppError::Invalid("ticket class name is required".into()));
        }
        if !seen.insert(def.name.trim()) {
            return Err(AppError::Invalid(format!(
                "duplicate ticket class name '{}'",
                def.name.trim()
            )));
        }
        if def.quantity < 0 {
            return Err(AppError::Invalid(format!(
                "negative quantity for class '{}'",
                def.name
            )));
        }
        if def.price < Decimal::ZERO {
            return Err(AppError::Invalid(format!(
                "negative price for class '{}'",
                def.name
            )));
        }
        match (def.group_discount, def.group_size) {
            (Some(discount), Some(size)) => {
                if discount <= Decimal::ZERO || discount >= Decimal::ONE {
                    return Err(AppError::Invalid(format!(
                        "group discount for class '{}' must be between 0 and 1 exclusive",
                        def.name
                    )));
                }
                if size < 2 {
                    return Err(AppError::Invalid(format!(
                        "group size for class '{}' must be at least 2",
                        def.name
                    )));
                }
            }
            (Some(_), None) => {
                return Err(AppError::Invalid(format!(
                    "class '{}' has a group discount but no group size",
                    def.name
                )));
            }
            (None, Some(_)) => {
                return Err(AppError::Invalid(format!(
                    "class '{}' has a group size but no group discount",
                    def.name
                )));
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// Replace the class set for a showing. Refused once any ticket under the
/// showing has been sold, and once the drop time has passed.
pub async fn define_classes(
    pool: &PgPool,
    showing: &EventShowing,
    definitions: &[TicketClassDefinition],
    drop_time: Option<DateTime<Utc>>,
) -> Result<Vec<TicketClass>, AppError> {
    validate_definitions(definitions)?;

    let now = Utc::now();
    if showing.drop_elapsed(now) {
        return Err(AppError::DropElapsed(
            "ticket classes are frozen after the drop time".into(),
        ));
    }
    if let Some(drop) = drop_time {
        if drop > showing.start_time {
            return Err(AppError::Invalid(
                "drop time must be at or before the showing start".into(),
            ));
        }
    }

    let mut txn = pool.begin().await?;

    let (sold,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM tickets t \
         JOIN ticket_classes tc ON tc.id = t.ticket_class_id \
         WHERE tc.showing_id = $1 \
           AND (t.owner_id IS NOT NULL OR t.transaction_record_id IS NOT NULL)",
    )
    .bind(showing.id)
    .fetch_one(&mut *txn)
    .await?;
    if sold > 0 {
        return Err(AppError::AlreadySold(format!(
            "{sold} tickets already sold for this showing"
        )));
    }

    sqlx::query("DELETE FROM cart_items WHERE ticket_class_id IN \
                 (SELECT id FROM ticket_classes WHERE showing_id = $1)")
        .bind(showing.id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM tickets WHERE ticket_class_id IN \
                 (SELECT id FROM ticket_classes WHERE showing_id = $1)")
        .bind(showing.id)
        .execute(&mut *txn)
        .await?;
    sqlx::query("DELETE FROM ticket_classes WHERE showing_id = $1")
        .bind(showing.id)
        .execute(&mut *txn)
        .await?;

    let mut created = Vec::with_capacity(definitions.len());
    for def in definitions {
        let class = sqlx::query_as::<_, TicketClass>(
            "INSERT INTO ticket_classes \
             (showing_id, name, price, quantity, remaining, group_discount, group_size, transferable) \
             VALUES ($1, $2, $3, $4, $4, $5, $6, $7) RETURNING *",
        )
        .bind(showing.id)
        .bind(&def.name)
        .bind(def.price)
        .bind(def.quantity)
        .bind(def.group_discount)
        .bind(def.group_size)
        .bind(def.transferable)
        .fetch_one(&mut *txn)
        .await?;
        created.push(class);
    }

    sqlx::query("UPDATE event_showings SET ticket_drop_time = $1 WHERE id = $2")
        .bind(drop_time)
        .bind(showing.id)
        .execute(&mut *txn)
        .await?;

    txn.commit().await?;
    tracing::info!(
        showing = %showing.id,
        classes = created.len(),
        "Ticket classes defined"
    );
    Ok(created)
}

pub async fn get_availability(
    pool: &PgPool,
    showing_id: Uuid,
) -> Result<Vec<TicketClass>, AppError> {
    let classes = sqlx::query_as::<_, TicketClass>(
        "SELECT * FROM ticket_classes WHERE showing_id = $1 ORDER BY name",
    )
    .bind(showing_id)
    .fetch_all(pool)
    .await?;
    Ok(classes)
}

/// Lock a class row and decrement `remaining` by `n`. Must run inside the
/// caller's transaction; the lock is held until that transaction ends.
pub async fn reserve(
    conn: &mut PgConnection,
    class_id: Uuid,
    n: i32,
    now: DateTime<Utc>,
) -> Result<TicketClass, AppError> {
    if n <= 0 {
        return Err(AppError::Invalid("reservation quantity must be positive".into()));
    }

    let class = sqlx::query_as::<_, TicketClass>(
        "SELECT * FROM ticket_classes WHERE id = $1 FOR UPDATE",
    )
    .bind(class_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("ticket class {class_id}")))?;

    let showing = sqlx::query_as::<_, EventShowing>(
        "SELECT * FROM event_showings WHERE id = $1",
    )
    .bind(class.showing_id)
    .fetch_one(&mut *conn)
    .await?;

    if showing.has_ended(now) {
        return Err(AppError::Ended("this showing has already ended".into()));
    }
    if !showing.has_dropped(now) {
        return Err(AppError::NotDropped(
            "tickets for this showing have not dropped yet".into(),
        ));
    }
    if class.remaining < n {
        return Err(AppError::Insufficient(format!(
            "{} remaining of '{}', requested {}",
            class.remaining, class.name, n
        )));
    }

    sqlx::query("UPDATE ticket_classes SET remaining = remaining - $1 WHERE id = $2")
        .bind(n)
        .bind(class_id)
        .execute(&mut *conn)
        .await?;

    Ok(class)
}

/// Return `n` units to a class under its row lock. Clamped at `quantity`.
pub async fn release(conn: &mut PgConnection, class_id: Uuid, n: i32) -> Result<(), AppError> {
    if n <= 0 {
        return Ok(());
    }
    sqlx::query(
        "UPDATE ticket_classes SET remaining = LEAST(quantity, remaining + $1) WHERE id = $2",
    )
    .bind(n)
    .bind(class_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Create a ticket row against already-reserved inventory.
pub async fn materialize_ticket(
    conn: &mut PgConnection,
    class: &TicketClass,
    owner_id: Option<Uuid>,
    owner_email: &str,
    transaction_record_id: Uuid,
) -> Result<Ticket, AppError> {
    let ticket = sqlx::query_as::<_, Ticket>(
        "INSERT INTO tickets \
         (ticket_class_id, owner_id, owner_email, transaction_record_id, transferable) \
         VALUES ($1, $2, $3, $4, $5) RETURNING *",
    )
    .bind(class.id)
    .bind(owner_id)
    .bind(owner_email)
    .bind(transaction_record_id)
    .bind(class.transferable)
    .fetch_one(&mut *conn)
    .await?;
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn definition() -> TicketClassDefinition {
        TicketClassDefinition {
            name: "normal".into(),
            quantity: 20,
            price: dec!(15.00),
            group_discount: None,
            group_size: None,
            transferable: true,
        }
    }

    #[test]
    fn plain_definition_is_valid() {
        assert!(validate_definitions(&[definition()]).is_ok());
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut def = definition();
        def.price = dec!(-1.00);
        assert!(matches!(
            validate_definitions(&[def]),
            Err(AppError::Invalid(_))
        ));
    }

    #[test]
    fn discount_bounds_are_exclusive() {
        let mut def = definition();
        def.group_discount = Some(dec!(1.0));
        def.group_size = Some(2);
        assert!(validate_definitions(std::slice::from_ref(&def)).is_err());

        def.group_discount = Some(dec!(0));
        assert!(validate_definitions(std::slice::from_ref(&def)).is_err());

        def.group_discount = Some(dec!(0.5));
        assert!(validate_definitions(std::slice::from_ref(&def)).is_ok());
    }

    #[test]
    fn group_discount_requires_group_size() {
        let mut def = definition();
        def.group_discount = Some(dec!(0.2));
        assert!(validate_definitions(std::slice::from_ref(&def)).is_err());

        def.group_size = Some(1);
        assert!(validate_definitions(std::slice::from_ref(&def)).is_err());

        def.group_size = Some(2);
        assert!(validate_definitions(std::slice::from_ref(&def)).is_ok());
    }

    #[test]
    fn group_size_without_discount_is_rejected() {
        let mut def = definition();
        def.group_size = Some(4);
        assert!(validate_definitions(std::slice::from_ref(&def)).is_err());
    }
}
