use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketClass {
    pub id: Uuid,
    pub showing_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub quantity: i32,
    pub remaining: i32,
    /// Fractional discount in (0, 1), applied when a single order holds at
    /// least `group_size` of this class.
    pub group_discount: Option<Decimal>,
    pub group_size: Option<i32>,
    pub transferable: bool,
    pub created_at: DateTime<Utc>,
}

impl TicketClass {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    /// Unit price for an order of `quantity`, group discount applied when
    /// the threshold is met. Money math rounds to 2 decimal places.
    pub fn unit_price(&self, quantity: i32) -> Decimal {
        match (self.group_discount, self.group_size) {
            (Some(discount), Some(size)) if quantity >= size => {
                ((Decimal::ONE - discount) * self.price).round_dp(2)
            }
            _ => self.price.round_dp(2),
        }
    }

    pub fn line_total(&self, quantity: i32) -> Decimal {
        (self.unit_price(quantity) * Decimal::from(quantity)).round_dp(2)
    }
}

/// A ticket is in exactly one of three states:
/// free (no owner, no holder), held (holder with unexpired expiration),
/// owned (owner plus transaction record).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub id: Uuid,
    pub ticket_class_id: Uuid,
    pub owner_id: Option<Uuid>,
    pub owner_email: Option<String>,
    pub holder_id: Option<Uuid>,
    pub holding_expiration: Option<DateTime<Utc>>,
    pub transaction_record_id: Option<Uuid>,
    pub attended: bool,
    pub transferable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Free,
    Held,
    Owned,
}

impl Ticket {
    pub fn state(&self, now: DateTime<Utc>) -> TicketState {
        if self.owner_id.is_some() {
            TicketState::Owned
        } else if matches!(self.holding_expiration, Some(exp) if exp > now)
            && self.holder_id.is_some()
        {
            TicketState::Held
        } else {
            TicketState::Free
        }
    }

    /// Tickets backed by a transaction record are permanent.
    pub fn is_deletable(&self) -> bool {
        self.transaction_record_id.is_none()
    }
}

/// Immutable once created; the reconciliation id is the idempotency key for
/// payment completion.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketTransactionRecord {
    pub id: Uuid,
    pub reconciliation_id: String,
    pub total_amount: Decimal,
    pub buyer_first_name: String,
    pub buyer_last_name: String,
    pub buyer_email: String,
    pub buyer_phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit log of ticket transfers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketTransferRecord {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn class(price: Decimal, discount: Option<Decimal>, size: Option<i32>) -> TicketClass {
        TicketClass {
            id: Uuid::new_v4(),
            showing_id: Uuid::new_v4(),
            name: "normal".into(),
            price,
            quantity: 10,
            remaining: 10,
            group_discount: discount,
            group_size: size,
            transferable: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn no_discount_below_group_size() {
        let c = class(dec!(15.00), Some(dec!(0.2)), Some(3));
        assert_eq!(c.unit_price(2), dec!(15.00));
        assert_eq!(c.line_total(2), dec!(30.00));
    }

    #[test]
    fn discount_applies_at_group_size() {
        let c = class(dec!(15.00), Some(dec!(0.2)), Some(3));
        assert_eq!(c.unit_price(3), dec!(12.00));
        assert_eq!(c.line_total(3), dec!(36.00));
    }

    #[test]
    fn discounted_unit_rounds_to_two_places() {
        let c = class(dec!(9.99), Some(dec!(0.15)), Some(2));
        // 9.99 * 0.85 = 8.4915 -> 8.49
        assert_eq!(c.unit_price(2), dec!(8.49));
        assert_eq!(c.line_total(2), dec!(16.98));
    }

    #[test]
    fn class_without_discount_fields_never_discounts() {
        let c = class(dec!(15.00), None, None);
        assert_eq!(c.unit_price(100), dec!(15.00));
    }

    fn ticket() -> Ticket {
        Ticket {
            id: Uuid::new_v4(),
            ticket_class_id: Uuid::new_v4(),
            owner_id: None,
            owner_email: None,
            holder_id: None,
            holding_expiration: None,
            transaction_record_id: None,
            attended: false,
            transferable: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn ticket_state_transitions() {
        let now = Utc::now();
        let mut t = ticket();
        assert_eq!(t.state(now), TicketState::Free);

        t.holder_id = Some(Uuid::new_v4());
        t.holding_expiration = Some(now + chrono::Duration::minutes(10));
        assert_eq!(t.state(now), TicketState::Held);

        // expired hold reads as free again
        t.holding_expiration = Some(now - chrono::Duration::seconds(1));
        assert_eq!(t.state(now), TicketState::Free);

        t.owner_id = Some(Uuid::new_v4());
        assert_eq!(t.state(now), TicketState::Owned);
    }

    #[test]
    fn purchased_tickets_are_not_deletable() {
        let mut t = ticket();
        assert!(t.is_deletable());
        t.transaction_record_id = Some(Uuid::new_v4());
        assert!(!t.is_deletable());
    }
}
