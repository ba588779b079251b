use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-user singleton. `checkout_context` is the payment provider's capture
/// context handle, present only between initiate and complete.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub checkout_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A cart line doubles as a hold: the reserved quantity was already taken
/// out of `TicketClass.remaining` and comes back when the line expires.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub ticket_class_id: Uuid,
    pub quantity: i32,
    pub holding_expiration: DateTime<Utc>,
}

impl CartItem {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.holding_expiration <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let item = CartItem {
            id: Uuid::new_v4(),
            cart_id: Uuid::new_v4(),
            ticket_class_id: Uuid::new_v4(),
            quantity: 2,
            holding_expiration: now,
        };
        assert!(item.is_expired(now));
        assert!(!item.is_expired(now - Duration::seconds(1)));
    }
}
