//! Cart holds.
//!
//! Adding to a cart reserves inventory and stamps each line with an
//! expiration. The short-cadence sweeper (and every cart read) returns
//! expired reservations to their classes. There is no explicit cancel;
//! removal or expiry both release.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::models::cart::Cart;
use crate::models::event::EventShowing;
use crate::services::inventory;
use crate::utils::error::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct CartLine {
    pub ticket_class_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CartItemView {
    pub id: Uuid,
    pub ticket_class_id: Uuid,
    pub class_name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub holding_expiration: DateTime<Utc>,
    pub showing_id: Uuid,
    pub event_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoldOutItem {
    pub class_name: String,
    pub event_name: String,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CartView {
    pub cart_id: Uuid,
    pub items: Vec<CartItemView>,
    pub sold_out: Vec<SoldOutItem>,
}

/// Enforce the per-showing order limit. `already_held` is the quantity this
/// cart already holds for the showing; successive adds accumulate, so the
/// limit covers the sum, not the single call.
pub fn check_order_limit(
    lines: &[CartLine],
    already_held: i32,
    limit: i32,
) -> Result<i32, AppError> {
    let mut requested: i32 = 0;
    for line in lines {
        if line.quantity <= 0 {
            return Err(AppError::Invalid("line quantity must be positive".into()));
        }
        requested = requested
            .checked_add(line.quantity)
            .ok_or_else(|| AppError::Invalid("order quantity overflow".into()))?;
    }
    if requested == 0 {
        return Err(AppError::Invalid("order contains no tickets".into()));
    }
    let total = requested
        .checked_add(already_held)
        .ok_or_else(|| AppError::Invalid("order quantity overflow".into()))?;
    if total > limit {
        return Err(AppError::OrderLimit(format!(
            "requested {requested} tickets with {already_held} already held, \
             limit is {limit} per showing"
        )));
    }
    Ok(total)
}

/// Lock (creating if needed) the caller's cart row; serializes concurrent
/// cart operations by the same user.
pub async fn lock_cart(conn: &mut PgConnection, user_id: Uuid) -> Result<Cart, AppError> {
    sqlx::query(
        "INSERT INTO carts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    let cart = sqlx::query_as::<_, Cart>("SELECT * FROM carts WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(cart)
}

/// Reserve every line or nothing. All reservations ride one transaction, so
/// a failing line rolls back the earlier ones.
pub async fn add_to_cart(
    pool: &PgPool,
    config: &Config,
    user_id: Uuid,
    showing: &EventShowing,
    lines: &[CartLine],
) -> Result<Uuid, AppError> {
    let now = Utc::now();
    if showing.has_ended(now) {
        return Err(AppError::Ended("this showing has already ended".into()));
    }
    if !showing.has_dropped(now) {
        return Err(AppError::NotDropped(
            "tickets for this showing have not dropped yet".into(),
        ));
    }
    // the selling club must be approved; ghost visibility is enough
    let (approved, ghost): (Option<bool>, bool) = sqlx::query_as(
        "SELECT c.approved, c.ghost FROM clubs c \
         JOIN events e ON e.club_id = c.id \
         WHERE e.id = $1",
    )
    .bind(showing.event_id)
    .fetch_one(pool)
    .await?;
    if approved != Some(true) && !ghost {
        return Err(AppError::Forbidden(
            "tickets are not on sale for an unapproved club".into(),
        ));
    }

    let expiration = now + config.hold_ttl;
    let mut txn = pool.begin().await?;
    let cart = lock_cart(&mut txn, user_id).await?;

    let (already_held,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(ci.quantity), 0) FROM cart_items ci \
         JOIN ticket_classes tc ON tc.id = ci.ticket_class_id \
         WHERE ci.cart_id = $1 AND tc.showing_id = $2",
    )
    .bind(cart.id)
    .bind(showing.id)
    .fetch_one(&mut *txn)
    .await?;
    check_order_limit(lines, already_held as i32, showing.ticket_order_limit)?;

    for line in lines {
        let class = inventory::reserve(&mut txn, line.ticket_class_id, line.quantity, now).await?;
        if class.showing_id != showing.id {
            return Err(AppError::Invalid(format!(
                "ticket class '{}' does not belong to this showing",
                class.name
            )));
        }
        sqlx::query(
            "INSERT INTO cart_items (cart_id, ticket_class_id, quantity, holding_expiration) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (cart_id, ticket_class_id) DO UPDATE \
             SET quantity = cart_items.quantity + EXCLUDED.quantity, \
                 holding_expiration = EXCLUDED.holding_expiration",
        )
        .bind(cart.id)
        .bind(line.ticket_class_id)
        .bind(line.quantity)
        .bind(expiration)
        .execute(&mut *txn)
        .await?;
    }

    txn.commit().await?;
    tracing::info!(user = %user_id, cart = %cart.id, lines = lines.len(), "Added to cart");
    Ok(cart.id)
}

/// Live cart contents. Expired lines (or lines whose showing has ended) are
/// released and reported back as `sold_out` so the client can explain the
/// disappearance.
pub async fn get_cart(pool: &PgPool, user_id: Uuid) -> Result<CartView, AppError> {
    let now = Utc::now();
    let mut txn = pool.begin().await?;
    let cart = lock_cart(&mut txn, user_id).await?;

    let rows: Vec<(Uuid, Uuid, i32, DateTime<Utc>, String, String, DateTime<Utc>)> =
        sqlx::query_as(
            "SELECT ci.id, ci.ticket_class_id, ci.quantity, ci.holding_expiration, \
                    tc.name, e.name, es.end_time \
             FROM cart_items ci \
             JOIN ticket_classes tc ON tc.id = ci.ticket_class_id \
             JOIN event_showings es ON es.id = tc.showing_id \
             JOIN events e ON e.id = es.event_id \
             WHERE ci.cart_id = $1",
        )
        .bind(cart.id)
        .fetch_all(&mut *txn)
        .await?;

    let mut sold_out = Vec::new();
    for (item_id, class_id, quantity, expiration, class_name, event_name, end_time) in &rows {
        if *expiration <= now || *end_time <= now {
            release_item(&mut txn, *item_id, *class_id).await?;
            sold_out.push(SoldOutItem {
                class_name: class_name.clone(),
                event_name: event_name.clone(),
                quantity: *quantity,
            });
        }
    }

    let items = sqlx::query_as::<_, CartItemView>(
        "SELECT ci.id, ci.ticket_class_id, tc.name AS class_name, tc.price, \
                ci.quantity, ci.holding_expiration, tc.showing_id, e.name AS event_name \
         FROM cart_items ci \
         JOIN ticket_classes tc ON tc.id = ci.ticket_class_id \
         JOIN event_showings es ON es.id = tc.showing_id \
         JOIN events e ON e.id = es.event_id \
         WHERE ci.cart_id = $1 \
         ORDER BY ci.holding_expiration",
    )
    .bind(cart.id)
    .fetch_all(&mut *txn)
    .await?;

    txn.commit().await?;
    Ok(CartView {
        cart_id: cart.id,
        items,
        sold_out,
    })
}

/// Release one cart item under its class row lock and delete it. Idempotent:
/// only the transaction that deletes the row performs the release.
async fn release_item(
    conn: &mut PgConnection,
    item_id: Uuid,
    class_id: Uuid,
) -> Result<bool, AppError> {
    // lock ordering: class first, matching the buyer path in reserve()
    sqlx::query("SELECT id FROM ticket_classes WHERE id = $1 FOR UPDATE")
        .bind(class_id)
        .execute(&mut *conn)
        .await?;

    let deleted: Option<(i32,)> =
        sqlx::query_as("DELETE FROM cart_items WHERE id = $1 RETURNING quantity")
            .bind(item_id)
            .fetch_optional(&mut *conn)
            .await?;

    match deleted {
        Some((quantity,)) => {
            inventory::release(conn, class_id, quantity).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// True when any line's hold has lapsed or its showing has ended; checkout
/// refuses stale carts.
pub async fn staleness_check(
    conn: &mut PgConnection,
    cart_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let (stale,): (bool,) = sqlx::query_as(
        "SELECT EXISTS( \
             SELECT 1 FROM cart_items ci \
             JOIN ticket_classes tc ON tc.id = ci.ticket_class_id \
             JOIN event_showings es ON es.id = tc.showing_id \
             WHERE ci.cart_id = $1 \
               AND (ci.holding_expiration <= $2 OR es.end_time <= $2))",
    )
    .bind(cart_id)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(stale)
}

/// Remove every cart line, returning reserved quantities to inventory.
pub async fn clear_cart(conn: &mut PgConnection, cart_id: Uuid) -> Result<(), AppError> {
    let items: Vec<(Uuid, Uuid)> =
        sqlx::query_as("SELECT id, ticket_class_id FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .fetch_all(&mut *conn)
            .await?;
    for (item_id, class_id) in items {
        release_item(conn, item_id, class_id).await?;
    }
    sqlx::query("UPDATE carts SET checkout_context = NULL, updated_at = now() WHERE id = $1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Delete cart lines without releasing inventory; used after purchase, when
/// the reserved units have become tickets.
pub async fn consume_cart(conn: &mut PgConnection, cart_id: Uuid) -> Result<(), AppError> {
    sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE carts SET checkout_context = NULL, updated_at = now() WHERE id = $1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Short-cadence sweep: release every expired hold, one transaction per item
/// so a long queue never starves buyers of the class lock.
pub async fn sweep_expired_holds(pool: &PgPool) -> Result<u64, AppError> {
    let now = Utc::now();
    let expired: Vec<(Uuid, Uuid)> = sqlx::query_as(
        "SELECT id, ticket_class_id FROM cart_items WHERE holding_expiration <= $1",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;

    let mut swept = 0;
    for (item_id, class_id) in expired {
        let mut txn = pool.begin().await?;
        if release_item(&mut txn, item_id, class_id).await? {
            swept += 1;
        }
        txn.commit().await?;
    }

    if swept > 0 {
        tracing::info!(swept, "Expired cart holds released");
    }
    Ok(swept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i32) -> CartLine {
        CartLine {
            ticket_class_id: Uuid::new_v4(),
            quantity,
        }
    }

    #[test]
    fn order_at_limit_is_allowed() {
        assert_eq!(check_order_limit(&[line(1), line(1)], 0, 2).unwrap(), 2);
    }

    #[test]
    fn order_over_limit_is_rejected() {
        assert!(matches!(
            check_order_limit(&[line(2), line(1)], 0, 2),
            Err(AppError::OrderLimit(_))
        ));
    }

    #[test]
    fn held_quantity_counts_toward_the_limit() {
        // a second add of 2 on top of 2 already held busts a limit of 2
        assert!(matches!(
            check_order_limit(&[line(2)], 2, 2),
            Err(AppError::OrderLimit(_))
        ));
        assert_eq!(check_order_limit(&[line(1)], 1, 2).unwrap(), 2);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        assert!(matches!(
            check_order_limit(&[line(0)], 0, 10),
            Err(AppError::Invalid(_))
        ));
        assert!(matches!(
            check_order_limit(&[line(-3)], 0, 10),
            Err(AppError::Invalid(_))
        ));
    }

    #[test]
    fn empty_order_is_rejected() {
        assert!(matches!(
            check_order_limit(&[], 0, 10),
            Err(AppError::Invalid(_))
        ));
    }
}
